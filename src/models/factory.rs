//! Pipeline construction seam
//!
//! Pipelines are built by factories registered per [`PipelineKind`]. Hosts
//! register the implementations they link; a kind without a factory is a
//! wiring fault reported as [`OrchestratorError::UnregisteredPipeline`].
//!
//! [`OrchestratorError::UnregisteredPipeline`]: crate::OrchestratorError::UnregisteredPipeline

use super::{ComponentKind, ModelKey, PipelineKind};
use crate::provider::SessionConfig;
use crate::session::{InferenceSession, ModelSource, SessionFactory};
use anyhow::Context;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A component with its final path and session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedComponent {
    pub component: ComponentKind,
    pub path: PathBuf,
    pub session: SessionConfig,
}

/// Everything a factory needs to build one pipeline
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub key: ModelKey,
    pub kind: PipelineKind,
    pub name: String,
    pub components: Vec<ResolvedComponent>,
}

/// A loaded pipeline
pub trait Pipeline: Send + Sync {
    fn kind(&self) -> PipelineKind;

    /// Release native resources ahead of the final drop
    fn release(&self) {}
}

/// Shared handle to a loaded pipeline
pub type PipelineHandle = Arc<dyn Pipeline>;

/// Builds pipelines of one or more kinds
pub trait PipelineFactory: Send + Sync {
    fn create(&self, request: &PipelineRequest) -> anyhow::Result<PipelineHandle>;
}

/// Factories keyed by pipeline kind
#[derive(Default)]
pub struct FactoryRegistry {
    factories: DashMap<PipelineKind, Arc<dyn PipelineFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for `kind`
    pub fn register(&self, kind: PipelineKind, factory: Arc<dyn PipelineFactory>) {
        tracing::debug!(kind = %kind, "Registered pipeline factory");
        self.factories.insert(kind, factory);
    }

    pub fn get(&self, kind: PipelineKind) -> Option<Arc<dyn PipelineFactory>> {
        self.factories.get(&kind).map(|f| f.value().clone())
    }

    pub fn contains(&self, kind: PipelineKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

/// Pipeline holding one native session per component
pub struct SessionPipeline {
    kind: PipelineKind,
    sessions: std::sync::Mutex<Vec<(ComponentKind, Box<dyn InferenceSession>)>>,
}

impl SessionPipeline {
    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Pipeline for SessionPipeline {
    fn kind(&self) -> PipelineKind {
        self.kind
    }

    fn release(&self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.clear();
        }
    }
}

/// Factory opening every component through the native session boundary
pub struct SessionPipelineFactory {
    sessions: Arc<dyn SessionFactory>,
}

impl SessionPipelineFactory {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self { sessions }
    }
}

impl PipelineFactory for SessionPipelineFactory {
    fn create(&self, request: &PipelineRequest) -> anyhow::Result<PipelineHandle> {
        let mut sessions = Vec::with_capacity(request.components.len());

        // Sessions opened before a failure drop with `sessions`
        for component in &request.components {
            let session = self
                .sessions
                .create_session(ModelSource::Path(&component.path), &component.session)
                .with_context(|| {
                    format!(
                        "Failed to open {} from {:?} with {}",
                        component.component, component.path, component.session.provider
                    )
                })?;
            sessions.push((component.component, session));
        }

        Ok(Arc::new(SessionPipeline {
            kind: request.kind,
            sessions: std::sync::Mutex::new(sessions),
        }))
    }
}
