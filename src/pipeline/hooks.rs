//! The Hook Registry: the static table of hook names to execution modes
//! (§3, §4.2).

use rustc_hash::FxHashMap;

/// How a hook's layer outputs are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Output gates the action: a `{allowed = false, ...}` return short-circuits
    /// the hook with a denial verdict.
    Blocking,
    /// Fire-and-forget: the hook returns immediately after scheduling the layer.
    Async,
    /// Successful returns are shallow-merged into the context for later layers.
    Enrichment,
}

/// Maps hook names to their fixed execution mode. Construction is total: a
/// name with no registered mode is simply absent, and callers treat an
/// unregistered hook as "nothing to dispatch" rather than an error.
#[derive(Debug, Clone)]
pub struct HookRegistry {
    modes: FxHashMap<String, ExecutionMode>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        let mut modes = FxHashMap::default();
        modes.insert("before_signin".to_string(), ExecutionMode::Blocking);
        modes.insert("before_signup".to_string(), ExecutionMode::Blocking);
        modes.insert("before_password_reset".to_string(), ExecutionMode::Blocking);
        modes.insert("post_signin".to_string(), ExecutionMode::Async);
        modes.insert("post_signup".to_string(), ExecutionMode::Async);
        modes.insert("post_password_reset".to_string(), ExecutionMode::Async);
        modes.insert("before_token_exchange".to_string(), ExecutionMode::Enrichment);
        modes.insert("before_session_creation".to_string(), ExecutionMode::Enrichment);
        Self { modes }
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_hook(mut self, name: impl Into<String>, mode: ExecutionMode) -> Self {
        self.modes.insert(name.into(), mode);
        self
    }

    pub fn mode_of(&self, hook: &str) -> Option<ExecutionMode> {
        self.modes.get(hook).copied()
    }

    pub fn hooks(&self) -> impl Iterator<Item = (&str, ExecutionMode)> {
        self.modes.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_signin_is_blocking_by_default() {
        let registry = HookRegistry::new();
        assert_eq!(registry.mode_of("before_signin"), Some(ExecutionMode::Blocking));
    }

    #[test]
    fn unregistered_hook_has_no_mode() {
        let registry = HookRegistry::new();
        assert_eq!(registry.mode_of("no_such_hook"), None);
    }

    #[test]
    fn custom_hooks_can_be_registered() {
        let registry = HookRegistry::new().with_hook("custom_hook", ExecutionMode::Async);
        assert_eq!(registry.mode_of("custom_hook"), Some(ExecutionMode::Async));
    }
}
