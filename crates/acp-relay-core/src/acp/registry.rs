//! Runtime backend registry
//!
//! Backends are looked up by id. Registering a backend with an id that is
//! already present replaces the previous one.

use super::traits::{AcpRuntime, RuntimeResult};
use crate::error::AcpRuntimeError;
use crate::types::DoctorReport;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of runtime backends keyed by id
#[derive(Clone, Default)]
pub struct RuntimeBackendRegistry {
    backends: Vec<Arc<dyn AcpRuntime>>,
}

impl RuntimeBackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any existing one with the same id
    pub fn register(&mut self, backend: Arc<dyn AcpRuntime>) {
        let id = backend.id().to_string();
        if let Some(pos) = self.backends.iter().position(|b| b.id() == id) {
            debug!("Replacing ACP backend: {}", id);
            self.backends[pos] = backend;
        } else {
            info!("Registered ACP backend: {}", id);
            self.backends.push(backend);
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn AcpRuntime>) -> Self {
        self.register(backend);
        self
    }

    /// Get backend by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn AcpRuntime>> {
        let id = id.trim();
        self.backends.iter().find(|b| b.id() == id).cloned()
    }

    /// Get backend by id or fail with `ACP_BACKEND_MISSING`
    pub fn require(&self, id: &str) -> RuntimeResult<Arc<dyn AcpRuntime>> {
        self.get(id)
            .ok_or_else(|| AcpRuntimeError::backend_missing(id.trim()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Run `doctor` on every backend that implements it
    pub async fn doctor_all(&self) -> Vec<(String, DoctorReport)> {
        let mut reports = Vec::new();
        for backend in &self.backends {
            if let Some(report) = backend.doctor().await {
                reports.push((backend.id().to_string(), report));
            }
        }
        reports
    }
}

impl std::fmt::Debug for RuntimeBackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBackendRegistry")
            .field("backends", &self.ids())
            .finish()
    }
}
