//! Per-attempt execution steps: prepare, render, dispatch, record.

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use super::ExecutionEngine;
use crate::error::{Error, ExecutionFailure};
use crate::ledger::{ExecutionOutcome, ExecutionStatus, NewExecution};
use crate::orchestrator::request::{ExecutionRequest, ExecutionResponse};
use crate::provider::{CompletionRequest, Provider, ResolvedModel};
use crate::schema::{validate_and_enrich, Variables};
use crate::template::PromptTemplate;
use crate::{CallerId, ExecutionId, Result};

/// Everything resolved before any record is written.
pub(crate) struct Prepared {
    pub(crate) template: Arc<PromptTemplate>,
    pub(crate) caller_id: CallerId,
    pub(crate) variables: Variables,
    pub(crate) provider: Provider,
    pub(crate) model: ResolvedModel,
    pub(crate) temperature: f64,
}

impl Prepared {
    pub(crate) fn new_execution(&self, outcome: Option<ExecutionOutcome>) -> NewExecution {
        NewExecution {
            prompt_id: self.template.id,
            caller_id: self.caller_id,
            variables: self.variables.clone(),
            provider_name: self.provider.name().to_string(),
            model_name: self.model.identifier.clone(),
            outcome,
        }
    }
}

impl ExecutionEngine {
    /// Template lookup, parameter checks, variable validation, provider and
    /// model resolution. Failures here never write a record.
    pub(crate) async fn prepare(&self, request: &ExecutionRequest) -> Result<Prepared> {
        let inner = &self.inner;

        let template = inner
            .catalog
            .get(request.prompt_id)
            .await?
            .ok_or_else(|| Error::not_found("Prompt template", request.prompt_id))?;

        let temperature = request
            .temperature
            .unwrap_or(inner.config.default_temperature);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(Error::invalid(
                "temperature",
                format!("must be between 0 and 1, got {}", temperature),
            ));
        }
        if request.max_tokens == Some(0) {
            return Err(Error::invalid("max_tokens", "must be greater than 0"));
        }

        let variables = validate_and_enrich(&request.variables, &template.variables_schema)?;

        let provider_name = request
            .provider_name
            .as_deref()
            .unwrap_or(&inner.config.default_provider);
        let provider = inner
            .registry
            .resolve(provider_name, inner.config.request_timeout())?;
        let model = provider.resolve_model(
            request.model_name.as_deref(),
            request.max_tokens,
            inner.config.strict_models,
        )?;

        Ok(Prepared {
            template,
            caller_id: request.caller_id,
            variables,
            provider,
            model,
            temperature,
        })
    }

    /// Call the vendor, price the result, emit metrics and write the terminal
    /// record. `pending` is the record opened by the asynchronous variant.
    pub(crate) async fn dispatch(
        &self,
        prepared: &Prepared,
        prompt: String,
        pending: Option<ExecutionId>,
    ) -> Result<ExecutionResponse> {
        let inner = &self.inner;
        let provider = &prepared.provider;
        let prompt_id = prepared.template.id;
        let timeout = inner.config.request_timeout();

        info!(
            prompt_id = prompt_id,
            provider = %provider.name(),
            model = %prepared.model.identifier,
            "dispatching prompt execution"
        );

        let call = CompletionRequest {
            prompt,
            model: prepared.model.identifier.clone(),
            temperature: prepared.temperature,
            max_tokens: prepared.model.max_tokens,
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, provider.execute(&call)).await {
            Ok(result) => result,
            Err(_) => Err(Error::execution(
                provider.name(),
                ExecutionFailure::Timeout,
                format!("vendor call exceeded {}s timeout", timeout.as_secs_f64()),
            )),
        };
        let duration_seconds = started.elapsed().as_secs_f64();

        let completion = match result {
            Ok(completion) => completion,
            Err(err) => {
                self.record_failure(prepared, pending, &err, duration_seconds)
                    .await;
                return Err(err);
            }
        };

        let cost_usd = provider.calculate_cost(completion.tokens_used, &completion.model);
        let tokens_used = completion.tokens_used;
        let outcome = ExecutionOutcome::Success {
            output: completion.output,
            tokens_used,
            cost_usd,
            duration_seconds,
        };
        let stored = match pending {
            Some(id) => inner.ledger.update_terminal(id, outcome).await.map(|r| r.id),
            None => inner.ledger.create(prepared.new_execution(Some(outcome))).await,
        };
        let id = match stored {
            Ok(id) => id,
            Err(ledger_err) => {
                // the vendor answered but the success could not be kept
                let err = Error::from(ledger_err);
                self.record_failure(prepared, pending, &err, duration_seconds)
                    .await;
                return Err(err);
            }
        };

        inner
            .metrics
            .record_execution(prompt_id, provider.name(), ExecutionStatus::Success);
        inner
            .metrics
            .observe_duration(prompt_id, provider.name(), duration_seconds);
        inner
            .metrics
            .record_usage(provider.name(), &completion.model, tokens_used, cost_usd);

        let record = inner
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("Execution", id))?;

        info!(
            execution_id = record.id,
            tokens = record.tokens_used,
            cost_usd = record.cost_usd,
            duration_seconds = record.duration_seconds,
            "prompt execution succeeded"
        );
        Ok(ExecutionResponse::from_record(&record))
    }

    /// Error path after dispatch began: count it and persist it. The caller
    /// still receives `err`; a ledger failure here can only be logged.
    pub(crate) async fn record_failure(
        &self,
        prepared: &Prepared,
        pending: Option<ExecutionId>,
        err: &Error,
        duration_seconds: f64,
    ) {
        let inner = &self.inner;
        let prompt_id = prepared.template.id;
        let provider_name = prepared.provider.name();

        inner
            .metrics
            .record_execution(prompt_id, provider_name, ExecutionStatus::Error);
        inner
            .metrics
            .observe_duration(prompt_id, provider_name, duration_seconds);

        let outcome = ExecutionOutcome::Failure {
            error_message: err.to_string(),
            duration_seconds,
        };
        let written = match pending {
            Some(id) => inner.ledger.update_terminal(id, outcome).await.map(|r| r.id),
            None => inner.ledger.create(prepared.new_execution(Some(outcome))).await,
        };
        match written {
            Ok(id) => info!(
                execution_id = id,
                provider = %provider_name,
                code = %err.code(),
                error = %err,
                "prompt execution failed"
            ),
            Err(ledger_err) => error!(
                prompt_id = prompt_id,
                provider = %provider_name,
                error = %err,
                ledger_error = %ledger_err,
                "failed to record execution error in ledger"
            ),
        }
    }
}
