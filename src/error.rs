//! Error types for the clustering engine and its collaborators.

use crate::types::LayerId;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors surfaced by the clustering engine, the scheduler and the transport seam.
///
/// None of these are user-facing: the scheduler logs transport failures and keeps the
/// last good cluster state on screen.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClusterError {
    /// A feature query (object ids or features by id) was rejected for one layer.
    #[error("transport failure for layer '{layer_id}': {message}")]
    Transport { layer_id: LayerId, message: String },

    /// Caller passed a value that cannot be used (non-finite coordinates, empty ids, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A layer id that was never registered with `init_layers`.
    #[error("unknown layer: {0}")]
    UnknownLayer(LayerId),

    /// JSON / GeoJSON / TOML (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClusterError {
    /// Build a transport error for `layer_id`.
    pub fn transport(layer_id: impl Into<LayerId>, message: impl Into<String>) -> Self {
        Self::Transport {
            layer_id: layer_id.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from the remote feature service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = ClusterError::transport("parcels", "HTTP 503");
        assert!(err.is_transport());
        assert_eq!(
            err.to_string(),
            "transport failure for layer 'parcels': HTTP 503"
        );
    }

    #[test]
    fn test_from_serde_json() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: ClusterError = parse.unwrap_err().into();
        assert!(matches!(err, ClusterError::Serialization(_)));
        assert!(!err.is_transport());
    }
}
