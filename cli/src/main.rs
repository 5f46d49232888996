//! Toolscope: token-footprint auditor for stdio JSON-RPC tool services.
//!
//! Two subcommands:
//! - `toolscope audit`: launch every configured service, measure its tools, write reports
//! - `toolscope validate`: check the config and list the services that would be audited

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use toolscope::{AuditConfig, Auditor, ServiceAudit, ServiceDescriptor, report};
use tracing_subscriber::EnvFilter;

/// Toolscope: token-footprint auditor for stdio JSON-RPC tool services.
#[derive(Parser)]
#[command(
    name = "toolscope",
    version,
    about = "Measure the token footprint of the tools advertised by stdio JSON-RPC services"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit every configured service and write JSON and Markdown reports
    Audit {
        /// Path to toolscope.toml [default: ./toolscope.toml or ~/.config/toolscope/toolscope.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Base directory for relative service `cwd` values
        #[arg(long)]
        base_dir: Option<PathBuf>,
        /// Where to write the JSON report
        #[arg(long, default_value = "toolscope-report.json")]
        json_out: PathBuf,
        /// Where to write the Markdown report
        #[arg(long, default_value = "toolscope-report.md")]
        markdown_out: PathBuf,
        /// Services audited at once
        #[arg(long, default_value = "1")]
        concurrency: usize,
        /// Only audit the named service (repeatable)
        #[arg(short, long = "service")]
        services: Vec<String>,
    },
    /// Validate the config and list the services that would be audited
    Validate {
        /// Path to toolscope.toml [default: ./toolscope.toml or ~/.config/toolscope/toolscope.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    // Ctrl-C cancels in-flight sessions; their processes are still reclaimed
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Cancelling audit...");
        cancel_for_signal.cancel();
    });

    match cli.command {
        Commands::Audit {
            config,
            base_dir,
            json_out,
            markdown_out,
            concurrency,
            services,
        } => {
            let config_path = resolve_config(config)?;
            let outputs = ReportPaths {
                json: json_out,
                markdown: markdown_out,
            };
            run_audit(
                &config_path,
                base_dir.as_deref(),
                &services,
                concurrency,
                &outputs,
                cancel,
            )
            .await?;
        }
        Commands::Validate { config } => {
            let config_path = resolve_config(config)?;
            run_validate(&config_path).await?;
        }
    }

    Ok(())
}

struct ReportPaths {
    json: PathBuf,
    markdown: PathBuf,
}

/// Audit the configured services and write both reports.
///
/// Per-service failures are printed and left out of the reports; only config
/// and report-writing failures end the run with an error.
async fn run_audit(
    config_path: &Path,
    base_dir: Option<&Path>,
    only: &[String],
    concurrency: usize,
    outputs: &ReportPaths,
    cancel: CancellationToken,
) -> Result<()> {
    let config = load_config(config_path).await?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config {:?}: {}", config_path, e))?;
    let descriptors = select_services(&config.descriptors(base_dir, config_dir(config_path)), only)?;

    let auditor = Auditor::new(descriptors, config.read_policy())
        .with_concurrency(concurrency)
        .with_cancellation(cancel);

    println!("Auditing {} services...", auditor.descriptors().len());
    let collection = auditor
        .run_with_progress(|descriptor, outcome| match outcome {
            Ok(audit) => println!(
                "  {} ({}): {} tools, ~{} tokens",
                descriptor.name, descriptor.language, audit.summary.tool_count, audit.total_tokens
            ),
            Err(e) => println!("  {} ({}): FAILED: {}", descriptor.name, descriptor.language, e),
        })
        .await;

    let audits: &[ServiceAudit] = &collection.audits;
    report::write_json_report(&outputs.json, audits).await?;
    report::write_markdown_report(&outputs.markdown, audits, chrono::Local::now()).await?;

    println!();
    println!("JSON report saved to: {}", outputs.json.display());
    println!("Markdown report saved to: {}", outputs.markdown.display());
    if !collection.failures.is_empty() {
        println!(
            "{} of {} services failed and are not included in the reports",
            collection.failures.len(),
            collection.failures.len() + collection.audits.len()
        );
    }
    println!();
    println!("{}", report::console_summary(&collection.totals()));

    Ok(())
}

/// Validate the config and list what an audit would launch.
async fn run_validate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path).await?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config {:?}: {}", config_path, e))?;

    let descriptors = config.descriptors(None, config_dir(config_path));
    println!(
        "Config {:?} is valid: {} services enabled",
        config_path,
        descriptors.len()
    );
    for descriptor in &descriptors {
        println!(
            "  {} ({}): {} in {} [warm-up {:?}, timeout {:?}]",
            descriptor.name,
            descriptor.language,
            descriptor.command.join(" "),
            descriptor.work_dir.display(),
            descriptor.timing.warmup,
            descriptor.timing.timeout
        );
    }
    Ok(())
}

/// Keep only the named services, in config order. An empty filter keeps all.
fn select_services(
    descriptors: &[ServiceDescriptor],
    only: &[String],
) -> Result<Vec<ServiceDescriptor>> {
    if only.is_empty() {
        return Ok(descriptors.to_vec());
    }

    if let Some(unknown) = only
        .iter()
        .find(|name| !descriptors.iter().any(|d| &d.name == *name))
    {
        return Err(anyhow::anyhow!(
            "Unknown or disabled service '{}' passed to --service",
            unknown
        ));
    }

    Ok(descriptors
        .iter()
        .filter(|d| only.contains(&d.name))
        .cloned()
        .collect())
}

/// Directory that relative paths in the config resolve against.
fn config_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Resolve config file path: explicit flag → ./toolscope.toml → ~/.config/toolscope/toolscope.toml.
fn resolve_config(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let local = Path::new("toolscope.toml");
    if local.exists() {
        return Ok(local.to_path_buf());
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("toolscope").join("toolscope.toml");
        if xdg.exists() {
            return Ok(xdg);
        }
    }

    Err(anyhow::anyhow!(
        "No toolscope.toml found. Searched ./toolscope.toml and ~/.config/toolscope/toolscope.toml. \
         Use --config to specify a path."
    ))
}

/// Load and parse a toolscope.toml config file.
async fn load_config(config_path: &Path) -> Result<AuditConfig> {
    let content = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", config_path, e))?;
    let config = AuditConfig::from_toml(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", config_path, e))?;
    Ok(config)
}
