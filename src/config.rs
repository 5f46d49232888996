//! Audit configuration: deserialization, validation, and resolution into
//! [`ServiceDescriptor`]s.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::protocol::ReadPolicy;
use crate::error::AuditError;

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// valid env-var reference.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve a map of env values for a child process.
///
/// `${VAR}` references are looked up in the current environment (unknown
/// variables resolve to the empty string); any other value is passed through
/// as a literal.
pub fn resolve_env_vars(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(k, v)| {
            let resolved = match parse_env_ref(v) {
                Some(var_name) => std::env::var(var_name).unwrap_or_default(),
                None => v.clone(),
            };
            (k.clone(), resolved)
        })
        .collect()
}

/// Implementation language of a service. Only used to pick timing parameters
/// and runtime-specific environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    Go,
    TypeScript,
    Python,
    Rust,
    Other(String),
}

impl Language {
    /// Parse a language tag case-insensitively, keeping unknown tags verbatim.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Language::Go,
            "typescript" | "ts" | "javascript" | "js" | "node" => Language::TypeScript,
            "python" | "py" => Language::Python,
            "rust" | "rs" => Language::Rust,
            _ => Language::Other(tag.to_string()),
        }
    }

    /// Default warm-up and deadline for services written in this language.
    pub fn default_timing(&self) -> TimingProfile {
        match self {
            Language::Python => TimingProfile {
                warmup: Duration::from_secs(5),
                timeout: Duration::from_secs(45),
            },
            _ => TimingProfile {
                warmup: Duration::from_secs(3),
                timeout: Duration::from_secs(30),
            },
        }
    }

    /// Environment the runtime needs to locate its source modules.
    pub fn runtime_env(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Language::Python => &[("PYTHONPATH", "src")],
            _ => &[],
        }
    }
}

impl From<String> for Language {
    fn from(tag: String) -> Self {
        Language::from_tag(&tag)
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Go => f.write_str("Go"),
            Language::TypeScript => f.write_str("TypeScript"),
            Language::Python => f.write_str("Python"),
            Language::Rust => f.write_str("Rust"),
            Language::Other(tag) => f.write_str(tag),
        }
    }
}

/// Warm-up delay before protocol traffic, and the whole-session deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingProfile {
    pub warmup: Duration,
    pub timeout: Duration,
}

/// Immutable description of one service to audit.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub language: Language,
    /// Executable followed by its arguments.
    pub command: Vec<String>,
    pub work_dir: PathBuf,
    /// Resolved env values, applied on top of the language's runtime env.
    pub env: HashMap<String, String>,
    pub timing: TimingProfile,
}

impl ServiceDescriptor {
    /// Descriptor with the language's default timing and no extra env.
    pub fn new(
        name: impl Into<String>,
        language: Language,
        command: Vec<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let timing = language.default_timing();
        Self {
            name: name.into(),
            language,
            command,
            work_dir: work_dir.into(),
            env: HashMap::new(),
            timing,
        }
    }

    pub fn with_timing(mut self, timing: TimingProfile) -> Self {
        self.timing = timing;
        self
    }
}

/// Top-level audit configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// Base for relative `cwd` values. Defaults to the config file's directory.
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub read: ReadConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Configuration for a single service, one `[[servers]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub language: Language,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Overrides the language's default warm-up.
    pub warmup_ms: Option<u64>,
    /// Overrides the language's default session deadline.
    pub timeout_secs: Option<u64>,
}

/// `[read]` table: overrides for the resilient read policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadConfig {
    pub attempts: Option<u32>,
    pub attempt_window_ms: Option<u64>,
    pub backoff_ms: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl ReadConfig {
    /// Apply the configured overrides to the default policy.
    pub fn policy(&self) -> ReadPolicy {
        let mut policy = ReadPolicy::default();
        if let Some(attempts) = self.attempts {
            policy.attempts = attempts;
        }
        if let Some(ms) = self.attempt_window_ms {
            policy.attempt_window = Duration::from_millis(ms);
        }
        if let Some(ms) = self.backoff_ms {
            policy.backoff = Duration::from_millis(ms);
        }
        policy
    }
}

impl ServerConfig {
    fn timing(&self) -> TimingProfile {
        let mut timing = self.language.default_timing();
        if let Some(ms) = self.warmup_ms {
            timing.warmup = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout_secs {
            timing.timeout = Duration::from_secs(secs);
        }
        timing
    }

    /// Resolve into a descriptor. Relative `cwd` values are joined onto `base`.
    pub fn to_descriptor(&self, base: &Path) -> ServiceDescriptor {
        let work_dir = match &self.cwd {
            Some(cwd) if cwd.is_absolute() => cwd.clone(),
            Some(cwd) => base.join(cwd),
            None => base.to_path_buf(),
        };
        ServiceDescriptor {
            name: self.name.clone(),
            language: self.language.clone(),
            command: self.command.clone(),
            work_dir,
            env: resolve_env_vars(&self.env),
            timing: self.timing(),
        }
    }
}

impl AuditConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| AuditError::InvalidConfig("<config>".to_string(), e.to_string()))
    }

    /// Validate the config, failing fast before any service is launched.
    pub fn validate(&self) -> crate::Result<()> {
        if self.read.attempts == Some(0) {
            return Err(AuditError::InvalidConfig(
                "<read>".to_string(),
                "read.attempts must be > 0".to_string(),
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(AuditError::DuplicateService(server.name.clone()));
            }

            if !server.enabled {
                continue;
            }

            let name = &server.name;
            if name.trim().is_empty() {
                return Err(AuditError::InvalidConfig(
                    name.clone(),
                    "service name must be non-empty".to_string(),
                ));
            }

            match server.command.first() {
                None => {
                    return Err(AuditError::InvalidConfig(
                        name.clone(),
                        "'command' must name an executable".to_string(),
                    ));
                }
                Some(program) if program.trim().is_empty() => {
                    return Err(AuditError::InvalidConfig(
                        name.clone(),
                        "'command' must name an executable".to_string(),
                    ));
                }
                Some(_) => {}
            }

            if server.timeout_secs == Some(0) {
                return Err(AuditError::InvalidConfig(
                    name.clone(),
                    "timeout_secs must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Descriptors of every enabled service, in config order.
    ///
    /// `base_override` wins over the config's `base_dir`, which wins over
    /// `config_dir` (the directory holding the config file).
    pub fn descriptors(
        &self,
        base_override: Option<&Path>,
        config_dir: &Path,
    ) -> Vec<ServiceDescriptor> {
        let base = base_override
            .map(Path::to_path_buf)
            .or_else(|| self.base_dir.clone())
            .unwrap_or_else(|| config_dir.to_path_buf());

        self.servers
            .iter()
            .filter(|server| {
                if !server.enabled {
                    tracing::debug!(server = %server.name, "skipping disabled service");
                }
                server.enabled
            })
            .map(|server| server.to_descriptor(&base))
            .collect()
    }

    pub fn read_policy(&self) -> ReadPolicy {
        self.read.policy()
    }
}
