//! The single public sandbox operation: `execute(script, context)`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use super::errors::SandboxError;
use super::lang::{CompiledScript, Helpers};
use super::pool::SandboxPool;
use crate::config::AppConfig;

/// Outcome of one sandbox execution: the script's return value (on success),
/// structured diagnostics (on failure), and the wall-clock duration actually
/// spent.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub result: Option<serde_json::Value>,
    pub diagnostic: Option<SandboxError>,
    pub duration: Duration,
}

impl ExecutionReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_some()
    }
}

/// Runs a compiled script against `context` under the pool's concurrency
/// bound and the configured wall-clock timeout. Every invocation sets
/// `context` fresh and the instance is released (or disposed, if it was a
/// burst instance) on return — there is no cross-execution state sharing.
#[instrument(skip(script, context, pool, helpers, config))]
pub async fn execute(
    script: &CompiledScript,
    context: serde_json::Value,
    pool: &SandboxPool,
    helpers: Arc<dyn Helpers>,
    config: &AppConfig,
) -> ExecutionReport {
    let handle = match pool.acquire().await {
        Ok(handle) => handle,
        Err(err) => {
            return ExecutionReport {
                result: None,
                diagnostic: Some(err),
                duration: Duration::ZERO,
            };
        }
    };

    let started = Instant::now();
    let script = script.clone();
    let timeout = config.script_timeout;

    let eval_result = tokio::time::timeout(
        timeout,
        tokio::task::spawn_blocking(move || script.evaluate(&context, helpers.as_ref())),
    )
    .await;

    handle.release();
    let duration = started.elapsed();

    match eval_result {
        Ok(Ok(Ok(value))) => ExecutionReport {
            result: Some(value),
            diagnostic: None,
            duration,
        },
        Ok(Ok(Err(script_err))) => ExecutionReport {
            result: None,
            diagnostic: Some(SandboxError::from(script_err)),
            duration,
        },
        Ok(Err(join_err)) => ExecutionReport {
            result: None,
            diagnostic: Some(SandboxError::RuntimeError {
                message: join_err.to_string(),
            }),
            duration,
        },
        Err(_elapsed) => ExecutionReport {
            result: None,
            diagnostic: Some(SandboxError::ExecutionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            duration,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::lang::{DefaultHelpers, compile};
    use crate::sandbox::pool::PoolConfig;
    use serde_json::json;

    #[tokio::test]
    async fn successful_execution_returns_result_and_no_diagnostic() {
        let pool = SandboxPool::new(PoolConfig::default());
        let config = AppConfig::default();
        let script = compile("return context.resource.amount < 1000", config.max_script_size_bytes)
            .unwrap();

        let report = execute(
            &script,
            json!({"resource": {"amount": 500}}),
            &pool,
            Arc::new(DefaultHelpers),
            &config,
        )
        .await;

        assert!(report.is_ok());
        assert_eq!(report.result.unwrap(), json!(true));
        assert!(report.diagnostic.is_none());
    }

    #[tokio::test]
    async fn timeout_yields_execution_timeout_diagnostic() {
        let pool = SandboxPool::new(PoolConfig::default());
        let mut config = AppConfig::default();
        config.script_timeout = Duration::from_millis(1);

        struct SlowHelpers;
        impl Helpers for SlowHelpers {
            fn matches(&self, _value: &str, _pattern: &str) -> bool {
                std::thread::sleep(Duration::from_millis(50));
                true
            }
            fn hash(&self, value: &str) -> String {
                value.to_string()
            }
        }

        let script = compile(
            "return helpers.matches(context.path, \"/admin\")",
            config.max_script_size_bytes,
        )
        .unwrap();

        let report = execute(
            &script,
            json!({"path": "/admin"}),
            &pool,
            Arc::new(SlowHelpers),
            &config,
        )
        .await;

        assert!(matches!(
            report.diagnostic,
            Some(SandboxError::ExecutionTimeout { .. })
        ));
    }
}
