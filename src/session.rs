//! Boundary to the native inference runtime
//!
//! The runtime either builds a session for a model under a given
//! configuration or returns an error. Sessions release their native
//! resources when dropped.

use crate::hardware::ExecutionProvider;
use crate::provider::SessionConfig;
use std::path::Path;

/// Tiny single-node Identity graph used to probe provider support
pub const PROBE_MODEL: &[u8] = include_bytes!("../assets/probe_model.onnx");

/// Where a session loads its graph from
#[derive(Debug, Clone, Copy)]
pub enum ModelSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("execution provider {provider} is not available on device {device_id}")]
    ProviderUnavailable {
        provider: ExecutionProvider,
        device_id: u32,
    },

    #[error("no native inference runtime is linked into this build")]
    RuntimeUnavailable,

    #[error("session creation failed: {0}")]
    Native(String),
}

/// A constructed inference session
pub trait InferenceSession: Send + Sync {
    fn provider(&self) -> ExecutionProvider;
}

/// Builds native inference sessions
pub trait SessionFactory: Send + Sync {
    fn create_session(
        &self,
        model: ModelSource<'_>,
        config: &SessionConfig,
    ) -> Result<Box<dyn InferenceSession>, SessionError>;
}

/// Factory used when no native runtime is linked; every request fails
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRuntime;

impl SessionFactory for UnavailableRuntime {
    fn create_session(
        &self,
        _model: ModelSource<'_>,
        _config: &SessionConfig,
    ) -> Result<Box<dyn InferenceSession>, SessionError> {
        Err(SessionError::RuntimeUnavailable)
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_model_is_embedded() {
        assert!(!PROBE_MODEL.is_empty());
        // ModelProto always opens with the ir_version field
        assert_eq!(PROBE_MODEL[0], 0x08);
    }

    #[test]
    fn test_unavailable_runtime_fails() {
        let config = SessionConfig::new(ExecutionProvider::Cpu, 0);
        let result = UnavailableRuntime.create_session(ModelSource::Bytes(PROBE_MODEL), &config);
        assert!(matches!(result, Err(SessionError::RuntimeUnavailable)));
    }
}
