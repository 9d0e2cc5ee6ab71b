//! Task URNs: `background-task:entity-storage:<id>`.
//!
//! The namespace segment is stable. Calls addressed to another namespace
//! are rejected rather than silently misrouted.

use gantry_core::ServiceError;

/// Namespace prefix of every task URN issued by this connector.
pub const NAMESPACE: &str = "background-task:entity-storage";

/// Build the external URN for a task id.
pub fn to_urn(id: &str) -> String {
    format!("{NAMESPACE}:{id}")
}

/// Extract the task id from a URN, enforcing the namespace.
pub fn parse(urn: &str) -> Result<&str, ServiceError> {
    match urn.strip_prefix(NAMESPACE).and_then(|rest| rest.strip_prefix(':')) {
        Some(id) if !id.is_empty() && !id.contains(':') => Ok(id),
        _ => Err(ServiceError::NamespaceMismatch(format!(
            "'{urn}' does not belong to the '{NAMESPACE}' namespace"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let urn = to_urn("0123456789abcdef0123456789abcdef");
        assert_eq!(urn, "background-task:entity-storage:0123456789abcdef0123456789abcdef");
        assert_eq!(parse(&urn).unwrap(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn rejects_foreign_namespace() {
        for bad in [
            "file:entity-storage:abc",
            "background-task:other:abc",
            "background-task:entity-storage",
            "background-task:entity-storage:",
            "background-task:entity-storage:a:b",
            "abc",
        ] {
            assert!(
                matches!(parse(bad), Err(ServiceError::NamespaceMismatch(_))),
                "expected mismatch for {bad:?}"
            );
        }
    }
}
