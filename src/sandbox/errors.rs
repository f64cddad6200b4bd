use miette::Diagnostic;
use thiserror::Error;

use super::lang::ScriptError;

/// Errors surfaced by a single sandbox execution. These never propagate past
/// the pipeline/authz engines; callers translate them into verdicts.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum SandboxError {
    #[error("script exceeds max size: {size} > {max}")]
    #[diagnostic(
        code(authgraph::sandbox::script_too_large),
        help("scripts are capped at MAX_SCRIPT_SIZE bytes and refused before execution")
    )]
    ScriptTooLarge { size: usize, max: usize },

    #[error("script execution timed out after {timeout_ms}ms")]
    #[diagnostic(code(authgraph::sandbox::execution_timeout))]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("script runtime error: {message}")]
    #[diagnostic(code(authgraph::sandbox::runtime_error))]
    RuntimeError { message: String },

    #[error("sandbox pool exhausted")]
    #[diagnostic(
        code(authgraph::sandbox::pool_exhausted),
        help("increase maxConcurrent or retry after an in-flight execution releases")
    )]
    PoolExhausted,
}

impl From<ScriptError> for SandboxError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::ScriptTooLarge { size, max } => SandboxError::ScriptTooLarge { size, max },
            other => SandboxError::RuntimeError {
                message: other.to_string(),
            },
        }
    }
}
