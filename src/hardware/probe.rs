//! Execution provider probing
//!
//! A provider is recorded for a device only after a session built against
//! the embedded probe model succeeds. Probing fails routinely on hardware a
//! provider does not support, so failures are logged and swallowed, and a
//! panicking native binding is contained here.

use super::ExecutionProvider;
use crate::provider::SessionConfig;
use crate::session::{ModelSource, PROBE_MODEL, SessionFactory};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Probes (provider, device) pairs through the native session boundary
#[derive(Clone)]
pub struct ProviderProbe {
    sessions: Arc<dyn SessionFactory>,
}

impl ProviderProbe {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self { sessions }
    }

    /// Build and immediately drop a probe session
    pub fn probe(&self, provider: ExecutionProvider, device_id: u32) -> bool {
        let config = SessionConfig::new(provider, device_id);

        // The session, if any, is dropped inside the closure
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.sessions
                .create_session(ModelSource::Bytes(PROBE_MODEL), &config)
                .map(drop)
        }));

        let supported = match outcome {
            Ok(Ok(())) => {
                tracing::debug!(provider = %provider, device_id, "Provider probe succeeded");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(provider = %provider, device_id, error = %e, "Provider probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(provider = %provider, device_id, "Provider probe panicked");
                false
            }
        };

        crate::metrics::record_probe_result(provider, supported);
        supported
    }

    /// Providers from `candidates` that pass the probe on `device_id`, in
    /// candidate order
    pub fn supported_providers(
        &self,
        device_id: u32,
        candidates: &[ExecutionProvider],
    ) -> Vec<ExecutionProvider> {
        let mut supported = Vec::new();
        for &provider in candidates {
            if !supported.contains(&provider) && self.probe(provider, device_id) {
                supported.push(provider);
            }
        }
        supported
    }
}
