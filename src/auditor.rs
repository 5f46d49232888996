//! Auditor: the entry point that runs a session per configured service and
//! folds the outcomes into one collection.
//!
//! One service's failure is recorded against that service only; the run
//! always attempts every descriptor.

use std::path::Path;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditCollection, ServiceAudit, TokenEstimator};
use crate::client::protocol::ReadPolicy;
use crate::client::session::Session;
use crate::config::{AuditConfig, ServiceDescriptor};

pub struct Auditor {
    descriptors: Vec<ServiceDescriptor>,
    policy: ReadPolicy,
    estimator: TokenEstimator,
    /// Sessions allowed in flight at once.
    concurrency: usize,
    /// Root cancellation token; each session gets a child.
    cancel: CancellationToken,
}

impl Auditor {
    pub fn new(descriptors: Vec<ServiceDescriptor>, policy: ReadPolicy) -> Self {
        Self {
            descriptors,
            policy,
            estimator: TokenEstimator::default(),
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Build from validated config. Returns an error without launching
    /// anything if the config is invalid.
    pub fn from_config(
        config: &AuditConfig,
        base_override: Option<&Path>,
        config_dir: &Path,
    ) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.descriptors(base_override, config_dir),
            config.read_policy(),
        ))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    /// Audit a single service end to end.
    pub async fn audit_service(&self, descriptor: &ServiceDescriptor) -> crate::Result<ServiceAudit> {
        let started = Instant::now();
        tracing::info!(
            server = %descriptor.name,
            language = %descriptor.language,
            "auditing service"
        );

        let session = Session::new(descriptor.clone(), self.policy)
            .with_cancellation(self.cancel.child_token());
        let result = session.run().await.map(|tools| {
            ServiceAudit::build(
                &descriptor.name,
                descriptor.language.clone(),
                &tools,
                &self.estimator,
            )
        });

        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(audit) => tracing::info!(
                server = %descriptor.name,
                tool_count = audit.summary.tool_count,
                total_tokens = audit.total_tokens,
                elapsed_ms = %elapsed_ms,
                "service audited"
            ),
            Err(e) => tracing::warn!(
                server = %descriptor.name,
                error = %e,
                elapsed_ms = %elapsed_ms,
                "service audit failed"
            ),
        }
        result
    }

    /// Audit every service.
    pub async fn run(&self) -> AuditCollection {
        self.run_with_progress(|_, _| {}).await
    }

    /// Audit every service, calling `on_finished` as each one completes
    /// (in completion order).
    pub async fn run_with_progress<F>(&self, mut on_finished: F) -> AuditCollection
    where
        F: FnMut(&ServiceDescriptor, &crate::Result<ServiceAudit>),
    {
        let mut outcomes = futures::stream::iter(self.descriptors.iter())
            .map(|descriptor| async move { (descriptor, self.audit_service(descriptor).await) })
            .buffer_unordered(self.concurrency);

        let mut collection = AuditCollection::new();
        while let Some((descriptor, outcome)) = outcomes.next().await {
            on_finished(descriptor, &outcome);
            collection.record(&descriptor.name, &descriptor.language, outcome);
        }

        tracing::info!(
            audited = collection.audits.len(),
            failed = collection.failures.len(),
            "audit run complete"
        );
        collection
    }
}
