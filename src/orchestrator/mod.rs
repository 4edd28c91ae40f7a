//! 执行编排器：校验变量、解析厂商、渲染模板、调用模型、记录结果并上报指标。
//!
//! # Execution Orchestrator
//!
//! [`ExecutionEngine`] ties the catalog, schema validation, provider
//! resolution, cost normalization, the ledger and metrics together. Each
//! attempt runs through:
//!
//! 1. template lookup (`NotFound`)
//! 2. parameter checks and variable validation/enrichment (`Validation`)
//! 3. provider and model resolution (`UnknownProvider`, `MissingCredential`, `UnknownModel`)
//! 4. rendering (`MissingVariable`)
//! 5. the vendor call, bounded by the configured timeout (`Execution`)
//! 6. pricing, metrics, and the terminal ledger record
//!
//! Failures in steps 1-4 of [`ExecutionEngine::execute`] write no record.
//! Failures in step 5 write an `error` record and are returned to the caller.
//! [`ExecutionEngine::submit`] opens a `pending` record after step 3 and runs
//! the rest in the background.
//!
//! The in-flight gauge is held by an RAII guard for the whole attempt, so it
//! returns to its previous value on every exit path.

mod execution;
mod request;

pub use request::{ExecutionHandle, ExecutionRequest, ExecutionResponse};

use futures::StreamExt;
use std::sync::Arc;

use crate::catalog::{InMemoryPromptCatalog, PromptCatalog};
use crate::config::{EngineConfig, Settings};
use crate::error::{Error, ErrorContext, ExecutionFailure};
use crate::ledger::{ExecutionLedger, ExecutionRecord, InMemoryLedger, LedgerQuery, Pagination};
use crate::provider::ProviderRegistry;
use crate::telemetry::ExecutionMetrics;
use crate::{CallerId, ExecutionId, Result};

struct EngineInner {
    catalog: Arc<dyn PromptCatalog>,
    registry: ProviderRegistry,
    ledger: Arc<dyn ExecutionLedger>,
    metrics: Arc<ExecutionMetrics>,
    config: EngineConfig,
}

/// The prompt execution engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("providers", &self.inner.registry.names())
            .field("ledger", &self.inner.ledger.name())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ExecutionEngine {
    pub fn builder() -> ExecutionEngineBuilder {
        ExecutionEngineBuilder::new()
    }

    /// Run one execution to completion (synchronous variant).
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse> {
        let _inflight = self.inner.metrics.inflight();
        let prepared = self.prepare(&request).await?;
        let prompt = prepared.template.render(&prepared.variables)?;
        self.dispatch(&prepared, prompt, None).await
    }

    /// Open a `pending` record and finish the execution in the background
    /// (asynchronous variant).
    ///
    /// Validation and resolution errors are still returned here, before any
    /// record exists. Later failures, rendering included, move the pending
    /// record to `error` and are reported through [`ExecutionHandle::join`].
    pub async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        let inflight = self.inner.metrics.inflight();
        let prepared = self.prepare(&request).await?;
        let execution_id = self
            .inner
            .ledger
            .create(prepared.new_execution(None))
            .await?;
        let provider_name = prepared.provider.name().to_string();

        let engine = self.clone();
        let task = tokio::spawn(async move {
            let _inflight = inflight;
            match prepared.template.render(&prepared.variables) {
                Ok(prompt) => engine.dispatch(&prepared, prompt, Some(execution_id)).await,
                Err(err) => {
                    engine
                        .record_failure(&prepared, Some(execution_id), &err, 0.0)
                        .await;
                    Err(err)
                }
            }
        });

        Ok(ExecutionHandle {
            execution_id,
            provider_name,
            task,
        })
    }

    /// Execute many requests with bounded concurrency; results keep input order.
    pub async fn execute_batch(
        &self,
        requests: Vec<ExecutionRequest>,
    ) -> Vec<Result<ExecutionResponse>> {
        let n = requests.len();
        if n == 0 {
            return Vec::new();
        }

        let limit = self.inner.config.batch_concurrency.max(1);
        let mut out: Vec<Option<Result<ExecutionResponse>>> = (0..n).map(|_| None).collect();

        let results: Vec<(usize, Result<ExecutionResponse>)> =
            futures::stream::iter(requests.into_iter().enumerate())
                .map(|(idx, req)| async move { (idx, self.execute(req).await) })
                .buffer_unordered(limit)
                .collect()
                .await;

        for (idx, r) in results {
            out[idx] = Some(r);
        }

        out.into_iter()
            .map(|o| {
                o.unwrap_or_else(|| {
                    Err(Error::execution(
                        "batch",
                        ExecutionFailure::Aborted,
                        "batch result missing",
                    ))
                })
            })
            .collect()
    }

    /// Active provider names, sorted.
    pub fn list_providers(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// A record owned by `caller_id`. Records of other callers are reported
    /// as not found.
    pub async fn get_execution(
        &self,
        execution_id: ExecutionId,
        caller_id: CallerId,
    ) -> Result<ExecutionRecord> {
        self.inner
            .ledger
            .get(execution_id)
            .await?
            .filter(|r| r.caller_id == caller_id)
            .ok_or_else(|| Error::not_found("Execution", execution_id))
    }

    /// `caller_id`'s records, newest first. Any caller in `filter` is replaced.
    pub async fn list_executions(
        &self,
        caller_id: CallerId,
        filter: LedgerQuery,
        page: Pagination,
    ) -> Result<Vec<ExecutionRecord>> {
        let query = filter.caller(caller_id);
        Ok(self.inner.ledger.list(&query, page).await?)
    }

    pub fn metrics(&self) -> &Arc<ExecutionMetrics> {
        &self.inner.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn ledger(&self) -> &Arc<dyn ExecutionLedger> {
        &self.inner.ledger
    }
}

/// Builder for [`ExecutionEngine`].
///
/// Defaults: an empty in-memory catalog, the built-in provider catalog, an
/// in-memory ledger and [`EngineConfig::default`].
pub struct ExecutionEngineBuilder {
    catalog: Option<Arc<dyn PromptCatalog>>,
    registry: Option<ProviderRegistry>,
    ledger: Option<Arc<dyn ExecutionLedger>>,
    metrics: Option<Arc<ExecutionMetrics>>,
    config: EngineConfig,
}

impl ExecutionEngineBuilder {
    pub fn new() -> Self {
        Self {
            catalog: None,
            registry: None,
            ledger: None,
            metrics: None,
            config: EngineConfig::default(),
        }
    }

    pub fn catalog(mut self, catalog: Arc<dyn PromptCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn ExecutionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Share a metrics instance with other components of the host.
    pub fn metrics(mut self, metrics: Arc<ExecutionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Engine config and provider catalog from a settings document.
    pub fn settings(mut self, settings: &Settings) -> Result<Self> {
        self.registry = Some(settings.provider_registry()?);
        self.config = settings.engine.clone();
        Ok(self)
    }

    pub fn build(self) -> Result<ExecutionEngine> {
        self.config.validate()?;
        let registry = self.registry.unwrap_or_else(ProviderRegistry::with_defaults);
        if !registry.contains(&self.config.default_provider) {
            return Err(Error::configuration_with_context(
                format!(
                    "default provider '{}' is not an active configured provider (available: {})",
                    self.config.default_provider,
                    registry.names().join(", ")
                ),
                ErrorContext::new()
                    .with_field_path("engine.default_provider")
                    .with_source("engine_builder"),
            ));
        }

        Ok(ExecutionEngine {
            inner: Arc::new(EngineInner {
                catalog: self
                    .catalog
                    .unwrap_or_else(|| Arc::new(InMemoryPromptCatalog::new())),
                registry,
                ledger: self.ledger.unwrap_or_else(|| Arc::new(InMemoryLedger::new())),
                metrics: self
                    .metrics
                    .unwrap_or_else(|| Arc::new(ExecutionMetrics::new())),
                config: self.config,
            }),
        })
    }
}

impl Default for ExecutionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderDescriptor;
    use crate::template::PromptTemplate;
    use serde_json::json;

    fn engine_with(catalog: InMemoryPromptCatalog) -> ExecutionEngine {
        ExecutionEngine::builder()
            .catalog(Arc::new(catalog))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_unknown_default_provider() {
        let err = ExecutionEngine::builder()
            .registry(ProviderRegistry::from_descriptors(vec![ProviderDescriptor::claude()]).unwrap())
            .build()
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("engine.default_provider")
        );
    }

    #[tokio::test]
    async fn test_unknown_prompt_is_not_found() {
        let engine = engine_with(InMemoryPromptCatalog::new());
        let err = engine.execute(ExecutionRequest::new(99, 1)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(err.code().http_status(), 404);
        assert_eq!(engine.metrics().active_executions(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_parameters_are_validation_errors() {
        let catalog = InMemoryPromptCatalog::new();
        catalog.insert(PromptTemplate::new(1, "t", "hi")).unwrap();
        let engine = engine_with(catalog);

        let err = engine
            .execute(ExecutionRequest::new(1, 1).temperature(1.5))
            .await
            .unwrap_err();
        assert_eq!(err.violations()[0].path, "temperature");

        let err = engine
            .execute(ExecutionRequest::new(1, 1).max_tokens(0))
            .await
            .unwrap_err();
        assert_eq!(err.violations()[0].path, "max_tokens");

        let all = engine
            .list_executions(1, LedgerQuery::new(), Pagination::default())
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_provider_writes_nothing() {
        let catalog = InMemoryPromptCatalog::new();
        catalog
            .insert(
                PromptTemplate::new(1, "t", "Hello {name}")
                    .with_schema(json!({"properties": {"name": {"type": "string"}}})),
            )
            .unwrap();
        let engine = engine_with(catalog);
        let err = engine
            .execute(ExecutionRequest::new(1, 1).variable("name", "Ada").provider("foo"))
            .await
            .unwrap_err();
        match &err {
            Error::UnknownProvider { name, available } => {
                assert_eq!(name, "foo");
                assert_eq!(available, &vec!["claude", "gemini", "openai"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(engine.ledger().get(1).await.unwrap().is_none());
        assert_eq!(engine.metrics().active_executions(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let engine = engine_with(InMemoryPromptCatalog::new());
        assert!(engine.execute_batch(Vec::new()).await.is_empty());
    }
}
