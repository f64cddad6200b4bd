//! Identifier generation for sessions, traces, spans and deliveries.
//!
//! Every id in the system is a UUIDv4 rendered as a prefixed string so that
//! log lines and trace exports are self-describing about what kind of
//! identifier they carry (`trace_...`, `span_...`, `evt_...`, ...).

use uuid::Uuid;

/// Generates prefixed identifiers for the record kinds used throughout the core.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    fn generate(&self, prefix: &str) -> String {
        format!("{prefix}_{}", Uuid::new_v4().simple())
    }

    pub fn generate_trace_id(&self) -> String {
        self.generate("trace")
    }

    pub fn generate_span_id(&self) -> String {
        self.generate("span")
    }

    pub fn generate_event_id(&self) -> String {
        self.generate("evt")
    }

    pub fn generate_delivery_id(&self) -> String {
        self.generate("del")
    }

    pub fn generate_jwks_id(&self) -> String {
        self.generate("jwk")
    }

    pub fn generate_secret_id(&self) -> String {
        self.generate("sec")
    }

    pub fn generate_session_id(&self) -> String {
        self.generate("sess")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_their_kind_prefix() {
        let gen = IdGenerator::new();
        assert!(gen.generate_trace_id().starts_with("trace_"));
        assert!(gen.generate_span_id().starts_with("span_"));
        assert!(gen.generate_event_id().starts_with("evt_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let gen = IdGenerator::new();
        let a = gen.generate_delivery_id();
        let b = gen.generate_delivery_id();
        assert_ne!(a, b);
    }
}
