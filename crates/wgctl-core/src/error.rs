// ── Core error types ──
//
// Domain errors for wgctl-core. Backend failures keep their low-level
// cause as the error source so callers can walk the whole chain; the
// `From<wgctl_api::Error>` impl covers call sites without extra context.
// Nothing in this crate retries; that is the caller's decision.

use thiserror::Error;

use crate::store::StoreError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lookup errors ────────────────────────────────────────────────
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    #[error("{entity_type} already exists: {identifier}")]
    AlreadyExists {
        entity_type: &'static str,
        identifier: String,
    },

    // ── Validation errors ────────────────────────────────────────────
    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    // ── Backend errors ───────────────────────────────────────────────
    #[error("Remote API error on backend '{backend}' while trying to {operation}")]
    RemoteApi {
        backend: String,
        operation: String,
        #[source]
        source: wgctl_api::Error,
    },

    #[error("Low-level device error while trying to {operation}")]
    LowLevel {
        operation: String,
        #[source]
        source: wgctl_api::Error,
    },

    #[error("Backend '{backend}' does not implement {operation}")]
    Unimplemented {
        backend: String,
        operation: &'static str,
    },

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Persistence failed while trying to {operation}")]
    Persistence {
        operation: String,
        #[source]
        source: StoreError,
    },

    // ── Allocation errors ────────────────────────────────────────────
    #[error("No free address left in {subnet}")]
    AddressSpaceExhausted { subnet: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity_type: &'static str, identifier: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            identifier: identifier.to_string(),
        }
    }

    /// Error mapper for a REST call made on behalf of `backend`.
    pub fn remote(
        backend: impl ToString,
        operation: impl Into<String>,
    ) -> impl FnOnce(wgctl_api::Error) -> Self {
        let backend = backend.to_string();
        let operation = operation.into();
        move |source| Self::RemoteApi {
            backend,
            operation,
            source,
        }
    }

    /// Error mapper for a netlink / device / shell call.
    pub fn low_level(operation: impl Into<String>) -> impl FnOnce(wgctl_api::Error) -> Self {
        let operation = operation.into();
        move |source| Self::LowLevel { operation, source }
    }

    /// Error mapper for a Store write.
    pub fn persistence(operation: impl Into<String>) -> impl FnOnce(StoreError) -> Self {
        let operation = operation.into();
        move |source| Self::Persistence { operation, source }
    }

    /// `true` for a missing entity, including low-level "not found" causes.
    /// Get-or-create flows branch on this.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::RemoteApi { source, .. } | Self::LowLevel { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }
}

// ── Conversion from low-level errors ─────────────────────────────────

impl From<wgctl_api::Error> for CoreError {
    fn from(err: wgctl_api::Error) -> Self {
        match err {
            wgctl_api::Error::DeviceNotFound { name } => CoreError::NotFound {
                entity_type: "wireguard device",
                identifier: name,
            },
            wgctl_api::Error::LinkNotFound { name } => CoreError::NotFound {
                entity_type: "link",
                identifier: name,
            },
            wgctl_api::Error::RuleNotFound { priority, table } => CoreError::NotFound {
                entity_type: "routing rule",
                identifier: format!("priority {priority} table {table}"),
            },
            wgctl_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            err @ (wgctl_api::Error::Command { .. }
            | wgctl_api::Error::Netlink(_)
            | wgctl_api::Error::Io(_)
            | wgctl_api::Error::Parse { .. }) => CoreError::LowLevel {
                operation: "run device command".into(),
                source: err,
            },
            err => {
                let backend = match &err {
                    wgctl_api::Error::Api { backend, .. } => (*backend).to_owned(),
                    _ => "unknown".to_owned(),
                };
                CoreError::RemoteApi {
                    backend,
                    operation: "call the backend API".into(),
                    source: err,
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn low_level_not_found_is_not_found() {
        let err = CoreError::low_level("read device wg0")(wgctl_api::Error::DeviceNotFound {
            name: "wg0".into(),
        });
        assert!(err.is_not_found());
        assert!(err.source().is_some());
    }

    #[test]
    fn api_errors_keep_backend_name() {
        let err: CoreError = wgctl_api::Error::Api {
            backend: "pfsense",
            status: 500,
            code: 500,
            message: "boom".into(),
            detail: String::new(),
        }
        .into();
        assert!(matches!(err, CoreError::RemoteApi { ref backend, .. } if backend == "pfsense"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn missing_link_maps_to_not_found() {
        let err: CoreError = wgctl_api::Error::LinkNotFound { name: "wg3".into() }.into();
        assert!(matches!(err, CoreError::NotFound { entity_type: "link", .. }));
    }
}
