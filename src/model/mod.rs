//! Model artifacts and their invocation contract.
//!
//! Artifact storage and weight formats live outside this crate. A
//! [`ModelStore`] resolves a logical artifact name to an [`InferenceModel`];
//! each inference module then checks the model's output length against its
//! own contract before using it.

pub mod tensor;

pub use tensor::{Tensor, TensorPool};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A loaded model that maps an input tensor to a flat output vector.
pub trait InferenceModel: Send + Sync {
    /// Number of values `run` returns.
    fn output_len(&self) -> usize;

    fn run(&self, input: &Tensor) -> Result<Vec<f32>, String>;
}

/// Why a model artifact could not be resolved.
#[derive(Debug, Clone, Error)]
pub enum ModelLoadError {
    #[error("artifact `{0}` not found")]
    NotFound(String),
    #[error("artifact `{name}` failed to load: {reason}")]
    Corrupt { name: String, reason: String },
}

/// Resolves logical artifact names to loaded models.
pub trait ModelStore: Send + Sync {
    fn load(&self, artifact: &str) -> Result<Arc<dyn InferenceModel>, ModelLoadError>;
}

/// A store with no artifacts. Every module runs its built-in estimator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoModelStore;

impl ModelStore for NoModelStore {
    fn load(&self, artifact: &str) -> Result<Arc<dyn InferenceModel>, ModelLoadError> {
        Err(ModelLoadError::NotFound(artifact.to_string()))
    }
}

/// In-memory registry of models keyed by artifact name.
#[derive(Default)]
pub struct StaticModelStore {
    models: RwLock<HashMap<String, Arc<dyn InferenceModel>>>,
}

impl StaticModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, artifact: impl Into<String>, model: Arc<dyn InferenceModel>) {
        self.models.write().insert(artifact.into(), model);
    }

    pub fn with_model(self, artifact: impl Into<String>, model: Arc<dyn InferenceModel>) -> Self {
        self.register(artifact, model);
        self
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

impl ModelStore for StaticModelStore {
    fn load(&self, artifact: &str) -> Result<Arc<dyn InferenceModel>, ModelLoadError> {
        self.models
            .read()
            .get(artifact)
            .cloned()
            .ok_or_else(|| ModelLoadError::NotFound(artifact.to_string()))
    }
}

/// A model that returns the same output for every input. Useful for wiring
/// tests and for pinning a module to a known reading.
#[derive(Debug, Clone)]
pub struct ConstantModel {
    output: Vec<f32>,
}

impl ConstantModel {
    pub fn new(output: Vec<f32>) -> Self {
        Self { output }
    }
}

impl InferenceModel for ConstantModel {
    fn output_len(&self) -> usize {
        self.output.len()
    }

    fn run(&self, _input: &Tensor) -> Result<Vec<f32>, String> {
        Ok(self.output.clone())
    }
}

/// How modules choose between a model artifact and the built-in estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPolicy {
    /// Use the artifact when it loads, otherwise fall back.
    #[default]
    PreferPrimary,
    /// A missing artifact fails session start.
    RequirePrimary,
    /// Never consult the store.
    FallbackOnly,
}

/// Which implementation is serving a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Model,
    Fallback,
}
