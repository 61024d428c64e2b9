//! Single code path for every model-backed pass.
//!
//! Order of operations: cache lookup, rate limiting, provider call with
//! bounded retry and a per-call timeout, ledger charge, typed validation,
//! cache store, and finally the durable pass row.

use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ExecutionParams, Pass, PassOutput, PassType, RateLimitConfig, RetryConfig,
};
use crate::domain::ports::{Completion, CompletionRequest, ModelProvider, PassRepository};
use crate::services::budget_ledger::{BudgetLedger, Usage};
use crate::services::errors::PassError;
use crate::services::pass_cache::{cache_key, CachedOutput, PassCache};

/// Everything needed to execute one pass.
#[derive(Debug, Clone)]
pub struct PassRequest {
    pub run_id: Uuid,
    pub pass_type: PassType,
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub params: ExecutionParams,
    pub candidate_index: u32,
    /// Recorded on the pass row.
    pub input_snapshot: serde_json::Value,
    /// Cache input; `None` disables caching for this pass.
    pub cache_input: Option<String>,
    /// Bound on the whole pass including retries.
    pub deadline: Option<Duration>,
}

impl PassRequest {
    pub fn new(
        run_id: Uuid,
        pass_type: PassType,
        model: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
        params: ExecutionParams,
    ) -> Self {
        Self {
            run_id,
            pass_type,
            model: model.into(),
            system: system.into(),
            prompt: prompt.into(),
            params,
            candidate_index: 0,
            input_snapshot: serde_json::Value::Null,
            cache_input: None,
            deadline: None,
        }
    }

    pub fn with_candidate_index(mut self, index: u32) -> Self {
        self.candidate_index = index;
        self
    }

    pub fn with_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.input_snapshot = snapshot;
        self
    }

    pub fn cached_by(mut self, input: impl Into<String>) -> Self {
        self.cache_input = Some(input.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Settled pass and its typed value.
#[derive(Debug)]
pub enum PassOutcome<T> {
    Succeeded { pass: Pass, value: T },
    Failed { pass: Pass, error: PassError },
}

impl<T> PassOutcome<T> {
    pub fn pass(&self) -> &Pass {
        match self {
            Self::Succeeded { pass, .. } | Self::Failed { pass, .. } => pass,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Build the process-wide provider rate limiter.
pub fn build_rate_limiter(config: &RateLimitConfig) -> DefaultDirectRateLimiter {
    let burst = NonZeroU32::new(config.burst_size.max(1)).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_secs_f64(1.0 / config.requests_per_second.max(0.001));
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);
    RateLimiter::direct(quota)
}

#[derive(Clone)]
pub struct PassRunner {
    provider: Arc<dyn ModelProvider>,
    passes: Arc<dyn PassRepository>,
    cache: PassCache,
    ledger: BudgetLedger,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryConfig,
}

impl PassRunner {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        passes: Arc<dyn PassRepository>,
        cache: PassCache,
        ledger: BudgetLedger,
        limiter: Arc<DefaultDirectRateLimiter>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            provider,
            passes,
            cache,
            ledger,
            limiter,
            retry,
        }
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// Execute one pass. `parse` validates raw model text into `T`; a parse
    /// failure is a schema violation recorded on the pass (usage is still
    /// charged). Only persistence failures are returned as `Err`.
    pub async fn run<T, F>(&self, request: PassRequest, parse: F) -> DomainResult<PassOutcome<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Into<PassOutput>,
        F: Fn(&str) -> Result<T, String>,
    {
        let started = Instant::now();
        let pass_id = Uuid::new_v4();
        let key = request
            .cache_input
            .as_deref()
            .filter(|_| self.cache.is_enabled())
            .map(|input| cache_key(request.pass_type, input));

        let base = Pass::new(pass_id, request.run_id, request.pass_type, request.model.clone())
            .with_candidate_index(request.candidate_index)
            .with_input(request.input_snapshot.clone())
            .with_params(request.params.clone());

        if let Some(key) = &key {
            if let Some(value) = self.cached_value::<T>(key).await {
                let pass = base
                    .from_cache()
                    .with_latency_ms(elapsed_ms(started))
                    .succeeded(value.clone().into());
                self.passes.insert(&pass).await?;
                tracing::info!(
                    run_id = %request.run_id,
                    pass_type = request.pass_type.as_str(),
                    candidate_index = request.candidate_index,
                    "pass served from cache"
                );
                return Ok(PassOutcome::Succeeded { pass, value });
            }
        }

        let completion_request = CompletionRequest {
            model: request.model.clone(),
            system: request.system.clone(),
            prompt: request.prompt.clone(),
            params: request.params.clone(),
        };

        let call = self.call_with_retry(&completion_request);
        let result = match request.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result,
                Err(_) => Err(PassError::Timeout(deadline)),
            },
            None => call.await,
        };
        let latency_ms = elapsed_ms(started);

        let completion = match result {
            Ok(completion) => completion,
            Err(error) => {
                let pass = base.with_latency_ms(latency_ms).failed(error.to_string());
                self.passes.insert(&pass).await?;
                tracing::warn!(
                    run_id = %request.run_id,
                    pass_type = request.pass_type.as_str(),
                    candidate_index = request.candidate_index,
                    error = %error,
                    "pass failed"
                );
                return Ok(PassOutcome::Failed { pass, error });
            }
        };

        self.ledger
            .charge(
                request.run_id,
                pass_id,
                self.provider.provider_id(),
                &request.model,
                Usage {
                    input_tokens: completion.input_tokens,
                    output_tokens: completion.output_tokens,
                    latency_ms,
                },
            )
            .await?;

        let base = base
            .with_usage(
                i64::from(completion.input_tokens),
                i64::from(completion.output_tokens),
            )
            .with_latency_ms(latency_ms);

        match parse(&completion.text) {
            Ok(value) => {
                if let Some(key) = &key {
                    self.store_cached(key, &request, &completion, &value).await;
                }
                let pass = base.succeeded(value.clone().into());
                self.passes.insert(&pass).await?;
                tracing::info!(
                    run_id = %request.run_id,
                    pass_type = request.pass_type.as_str(),
                    candidate_index = request.candidate_index,
                    latency_ms,
                    "pass succeeded"
                );
                Ok(PassOutcome::Succeeded { pass, value })
            }
            Err(reason) => {
                let error = PassError::Schema(reason);
                let pass = base.failed(error.to_string());
                self.passes.insert(&pass).await?;
                tracing::warn!(
                    run_id = %request.run_id,
                    pass_type = request.pass_type.as_str(),
                    error = %error,
                    "pass output rejected"
                );
                Ok(PassOutcome::Failed { pass, error })
            }
        }
    }

    /// Provider call with exponential backoff on transient errors. A per-call
    /// timeout ends the pass without another attempt.
    async fn call_with_retry(&self, request: &CompletionRequest) -> Result<Completion, PassError> {
        let attempts = AtomicU32::new(0);
        let max_retries = self.retry.max_retries;
        let call_timeout = Duration::from_secs(request.params.timeout_secs.max(1));
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_backoff_ms.max(1)))
            .with_max_interval(Duration::from_millis(self.retry.max_backoff_ms.max(1)))
            .with_max_elapsed_time(None)
            .build();

        let attempts = &attempts;
        let provider = &self.provider;
        let limiter = &self.limiter;

        backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            limiter.until_ready().await;

            match tokio::time::timeout(call_timeout, provider.complete(request)).await {
                Err(_) => Err(backoff::Error::permanent(PassError::Timeout(call_timeout))),
                Ok(Ok(completion)) => Ok(completion),
                Ok(Err(err)) if err.is_transient() && attempt < max_retries => {
                    tracing::warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        error = %err,
                        "transient provider error, retrying"
                    );
                    Err(backoff::Error::transient(PassError::Provider(err)))
                }
                Ok(Err(err)) => Err(backoff::Error::permanent(PassError::Provider(err))),
            }
        })
        .await
    }

    async fn cached_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.lookup(key).await {
            Ok(Some(entry)) => match serde_json::from_value(entry.payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(cache_key = %key, error = %e, "discarding unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "cache lookup failed");
                None
            }
        }
    }

    async fn store_cached<T: Serialize>(
        &self,
        key: &str,
        request: &PassRequest,
        completion: &Completion,
        value: &T,
    ) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "pass output not cacheable");
                return;
            }
        };
        let output = CachedOutput {
            payload,
            model: request.model.clone(),
            input_tokens: i64::from(completion.input_tokens),
            output_tokens: i64::from(completion.output_tokens),
        };
        if let Err(e) = self.cache.store(key, request.pass_type, output).await {
            tracing::warn!(cache_key = %key, error = %e, "cache store failed");
        }
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
