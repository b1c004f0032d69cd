//! Per-modality inference.
//!
//! Each module is described by a [`Modality`]: its artifact name, the length
//! of the history window it consumes, the output contract of its model and a
//! built-in fallback estimator. At session start [`select_estimator`] picks
//! either a [`ModelEstimator`] wrapping a loaded artifact or a
//! [`FallbackEstimator`], according to the [`ModelPolicy`].
//!
//! Estimators are stateless. Everything temporal comes in through the
//! [`HistoryWindow`] carried by the input, so the same input always yields
//! the same reading.

pub mod cognitive;
pub mod emotion;
pub mod face;
pub mod fusion;
pub mod gaze;
pub mod micro;
pub mod posture;

pub use cognitive::{Cognitive, CognitiveReading};
pub use emotion::Emotion;
pub use face::{describe_face, Face};
pub use fusion::{Fusion, FusionInput, FusionOutput};
pub use gaze::{Gaze, GazeReading};
pub use micro::{Micro, MicroReading};
pub use posture::Posture;

use crate::core::history::{HistoryWindow, FEATURE_LEN};
use crate::core::sample::{FaceRegion, FacialActivity};
use crate::error::{InferenceError, InitializationError};
use crate::model::{Backend, InferenceModel, ModelPolicy, ModelStore, Tensor, TensorPool};
use crate::source::{Frame, FrameCrop};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

/// Longest history window any module consumes.
pub const MAX_HISTORY_LEN: usize = 30;

/// Side of the square luma patch handed to image models.
pub const PATCH_SIDE: usize = 32;

/// One inference module.
pub trait Modality: Send + Sync + 'static {
    const NAME: &'static str;
    /// Logical model name resolved by the [`ModelStore`]
    const ARTIFACT: &'static str;
    /// Trailing feature vectors in the model input
    const HISTORY_LEN: usize;
    /// Values the model must produce
    const OUTPUT_LEN: usize;

    type Input<'a>;
    type Output: Send;

    /// Build the model input tensor.
    fn encode(input: &Self::Input<'_>, pool: &TensorPool) -> Tensor;

    /// Interpret a model output of exactly `OUTPUT_LEN` values.
    fn decode(input: &Self::Input<'_>, raw: &[f32]) -> Self::Output;

    /// Built-in estimator used when no artifact is available.
    fn fallback(input: &Self::Input<'_>) -> Self::Output;

    /// Reading substituted when estimation fails on a tick.
    fn neutral() -> Self::Output;
}

/// Inputs shared by the modules that run after face detection.
pub struct FrameInput<'a> {
    pub frame: &'a Frame,
    pub face: &'a FaceRegion,
    /// Face crop; `None` when no face was detected
    pub crop: Option<&'a FrameCrop>,
    pub activity: &'a FacialActivity,
    pub window: &'a HistoryWindow,
    pub timestamp: DateTime<Utc>,
}

/// A way of producing a module's reading.
pub trait Estimator<M: Modality>: Send + Sync {
    fn backend(&self) -> Backend;

    fn estimate(&self, input: &M::Input<'_>, pool: &TensorPool) -> Result<M::Output, InferenceError>;
}

/// Runs a loaded artifact.
pub struct ModelEstimator<M> {
    model: Arc<dyn InferenceModel>,
    _modality: PhantomData<fn() -> M>,
}

impl<M: Modality> ModelEstimator<M> {
    pub fn new(model: Arc<dyn InferenceModel>) -> Self {
        Self {
            model,
            _modality: PhantomData,
        }
    }
}

impl<M: Modality> Estimator<M> for ModelEstimator<M> {
    fn backend(&self) -> Backend {
        Backend::Model
    }

    fn estimate(&self, input: &M::Input<'_>, pool: &TensorPool) -> Result<M::Output, InferenceError> {
        let raw = {
            let tensor = M::encode(input, pool);
            self.model
                .run(&tensor)
                .map_err(|reason| InferenceError::Model {
                    module: M::NAME,
                    reason,
                })?
        };
        if raw.len() != M::OUTPUT_LEN {
            return Err(InferenceError::Shape {
                module: M::NAME,
                expected: M::OUTPUT_LEN,
                actual: raw.len(),
            });
        }
        Ok(M::decode(input, &raw))
    }
}

/// Runs the module's built-in estimator.
pub struct FallbackEstimator<M>(PhantomData<fn() -> M>);

impl<M: Modality> FallbackEstimator<M> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<M: Modality> Default for FallbackEstimator<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Modality> Estimator<M> for FallbackEstimator<M> {
    fn backend(&self) -> Backend {
        Backend::Fallback
    }

    fn estimate(&self, input: &M::Input<'_>, _pool: &TensorPool) -> Result<M::Output, InferenceError> {
        Ok(M::fallback(input))
    }
}

/// Pick the estimator for `M` according to `policy`.
///
/// A model whose declared output length differs from the module contract is
/// treated as unavailable.
pub fn select_estimator<M: Modality>(
    store: &dyn ModelStore,
    policy: ModelPolicy,
) -> Result<Box<dyn Estimator<M>>, InitializationError> {
    if policy == ModelPolicy::FallbackOnly {
        return Ok(Box::new(FallbackEstimator::<M>::new()));
    }

    let loaded = store
        .load(M::ARTIFACT)
        .map_err(|e| e.to_string())
        .and_then(|model| {
            if model.output_len() == M::OUTPUT_LEN {
                Ok(model)
            } else {
                Err(format!(
                    "declares {} outputs, module expects {}",
                    model.output_len(),
                    M::OUTPUT_LEN
                ))
            }
        });

    match (loaded, policy) {
        (Ok(model), _) => {
            debug!(module = M::NAME, artifact = M::ARTIFACT, "Model loaded");
            Ok(Box::new(ModelEstimator::<M>::new(model)))
        }
        (Err(reason), ModelPolicy::RequirePrimary) => Err(InitializationError::ModelUnavailable {
            module: M::NAME,
            artifact: M::ARTIFACT,
            reason,
        }),
        (Err(reason), _) => {
            info!(
                module = M::NAME,
                artifact = M::ARTIFACT,
                %reason,
                "Model unavailable, using built-in estimator"
            );
            Ok(Box::new(FallbackEstimator::<M>::new()))
        }
    }
}

/// Run an estimator, turning a panic into [`InferenceError::Panicked`].
pub fn run_guarded<M: Modality>(
    estimator: &dyn Estimator<M>,
    input: &M::Input<'_>,
    pool: &TensorPool,
) -> Result<M::Output, InferenceError> {
    match catch_unwind(AssertUnwindSafe(|| estimator.estimate(input, pool))) {
        Ok(result) => result,
        Err(_) => Err(InferenceError::Panicked { module: M::NAME }),
    }
}

/// Which backend serves each module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub module: &'static str,
    pub artifact: &'static str,
    pub backend: Backend,
}

/// The seven estimators of a session.
pub struct InferenceStack {
    pub face: Box<dyn Estimator<Face>>,
    pub emotion: Box<dyn Estimator<Emotion>>,
    pub gaze: Box<dyn Estimator<Gaze>>,
    pub posture: Box<dyn Estimator<Posture>>,
    pub micro: Box<dyn Estimator<Micro>>,
    pub cognitive: Box<dyn Estimator<Cognitive>>,
    pub fusion: Box<dyn Estimator<Fusion>>,
}

impl InferenceStack {
    /// Resolve every module against the store.
    pub fn load(store: &dyn ModelStore, policy: ModelPolicy) -> Result<Self, InitializationError> {
        Ok(Self {
            face: select_estimator::<Face>(store, policy)?,
            emotion: select_estimator::<Emotion>(store, policy)?,
            gaze: select_estimator::<Gaze>(store, policy)?,
            posture: select_estimator::<Posture>(store, policy)?,
            micro: select_estimator::<Micro>(store, policy)?,
            cognitive: select_estimator::<Cognitive>(store, policy)?,
            fusion: select_estimator::<Fusion>(store, policy)?,
        })
    }

    /// Built-in estimators only.
    pub fn fallback_only() -> Self {
        Self {
            face: Box::new(FallbackEstimator::<Face>::new()),
            emotion: Box::new(FallbackEstimator::<Emotion>::new()),
            gaze: Box::new(FallbackEstimator::<Gaze>::new()),
            posture: Box::new(FallbackEstimator::<Posture>::new()),
            micro: Box::new(FallbackEstimator::<Micro>::new()),
            cognitive: Box::new(FallbackEstimator::<Cognitive>::new()),
            fusion: Box::new(FallbackEstimator::<Fusion>::new()),
        }
    }

    pub fn modules(&self) -> Vec<ModuleStatus> {
        fn status<M: Modality>(e: &dyn Estimator<M>) -> ModuleStatus {
            ModuleStatus {
                module: M::NAME,
                artifact: M::ARTIFACT,
                backend: e.backend(),
            }
        }
        vec![
            status(self.face.as_ref()),
            status(self.emotion.as_ref()),
            status(self.gaze.as_ref()),
            status(self.posture.as_ref()),
            status(self.micro.as_ref()),
            status(self.cognitive.as_ref()),
            status(self.fusion.as_ref()),
        ]
    }

    /// Number of modules served by a model artifact.
    pub fn models_loaded(&self) -> usize {
        self.modules()
            .iter()
            .filter(|m| m.backend == Backend::Model)
            .count()
    }
}

/// Current-tick vector followed by the zero-padded history window,
/// flattened into a `[head + history_len * FEATURE_LEN]` tensor.
pub(crate) fn encode_with_history(
    pool: &TensorPool,
    mut head: Vec<f32>,
    window: &HistoryWindow,
    history_len: usize,
) -> Tensor {
    head.reserve(history_len * FEATURE_LEN);
    for entry in window.tail(history_len) {
        head.extend_from_slice(&entry.to_array());
    }
    let len = head.len();
    pool.from_vec(&[len], head)
}

/// Downsample a luma image to a `PATCH_SIDE`² patch scaled to `[0,1]`.
pub(crate) fn luma_patch(width: u32, height: u32, pixel: impl Fn(u32, u32) -> u8) -> Vec<f32> {
    let mut patch = Vec::with_capacity(PATCH_SIDE * PATCH_SIDE);
    if width == 0 || height == 0 {
        patch.resize(PATCH_SIDE * PATCH_SIDE, 0.0);
        return patch;
    }
    for py in 0..PATCH_SIDE {
        let y = ((py as u64 * height as u64) / PATCH_SIDE as u64) as u32;
        for px in 0..PATCH_SIDE {
            let x = ((px as u64 * width as u64) / PATCH_SIDE as u64) as u32;
            patch.push(pixel(x.min(width - 1), y.min(height - 1)) as f32 / 255.0);
        }
    }
    patch
}

/// Face region and descriptor as a flat vector.
pub(crate) fn face_vector(face: &FaceRegion, activity: &FacialActivity) -> Vec<f32> {
    vec![
        face.x as f32,
        face.y as f32,
        face.width as f32,
        face.height as f32,
        face.confidence as f32,
        activity.brightness as f32,
        activity.contrast as f32,
        activity.brow_energy as f32,
        activity.mouth_energy as f32,
        activity.eye_openness as f32,
        activity.pupil_dx as f32,
        activity.pupil_dy as f32,
        activity.symmetry as f32,
    ]
}

/// Standard encoding for modules that read the face crop.
pub(crate) fn encode_frame_input(input: &FrameInput<'_>, pool: &TensorPool, history_len: usize) -> Tensor {
    let mut head = match input.crop {
        Some(crop) => luma_patch(crop.width, crop.height, |x, y| crop.pixel(x, y)),
        None => vec![0.0; PATCH_SIDE * PATCH_SIDE],
    };
    head.extend(face_vector(input.face, input.activity));
    encode_with_history(pool, head, input.window, history_len)
}

/// Numerically stable softmax.
pub(crate) fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![1.0 / logits.len().max(1) as f64; logits.len()];
    }
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstantModel, NoModelStore, StaticModelStore};

    struct FailingModel;

    impl InferenceModel for FailingModel {
        fn output_len(&self) -> usize {
            4
        }

        fn run(&self, _input: &Tensor) -> Result<Vec<f32>, String> {
            Err("device lost".into())
        }
    }

    struct PanickingEstimator;

    impl Estimator<Gaze> for PanickingEstimator {
        fn backend(&self) -> Backend {
            Backend::Fallback
        }

        fn estimate(&self, _input: &GazeInput<'_>, pool: &TensorPool) -> Result<GazeReading, InferenceError> {
            let _held = pool.zeros(&[64]);
            panic!("estimator bug");
        }
    }

    type GazeInput<'a> = FrameInput<'a>;

    #[test]
    fn test_prefer_primary_falls_back_when_missing() {
        let est = select_estimator::<Gaze>(&NoModelStore, ModelPolicy::PreferPrimary).unwrap();
        assert_eq!(est.backend(), Backend::Fallback);
    }

    #[test]
    fn test_require_primary_surfaces_initialization_error() {
        let result = select_estimator::<Gaze>(&NoModelStore, ModelPolicy::RequirePrimary);
        assert!(matches!(
            result,
            Err(InitializationError::ModelUnavailable { module: "gaze", .. })
        ));
    }

    #[test]
    fn test_output_contract_mismatch_counts_as_unavailable() {
        let store = StaticModelStore::new()
            .with_model(Gaze::ARTIFACT, Arc::new(ConstantModel::new(vec![0.5, 0.5])));
        let est = select_estimator::<Gaze>(&store, ModelPolicy::PreferPrimary).unwrap();
        assert_eq!(est.backend(), Backend::Fallback);
        assert!(select_estimator::<Gaze>(&store, ModelPolicy::RequirePrimary).is_err());
    }

    #[test]
    fn test_fallback_only_ignores_store() {
        let store = StaticModelStore::new().with_model(
            Gaze::ARTIFACT,
            Arc::new(ConstantModel::new(vec![0.2, 0.3, 0.9, 0.8])),
        );
        let est = select_estimator::<Gaze>(&store, ModelPolicy::FallbackOnly).unwrap();
        assert_eq!(est.backend(), Backend::Fallback);
    }

    #[test]
    fn test_model_estimator_decodes_and_releases_tensors() {
        let store = StaticModelStore::new().with_model(
            Gaze::ARTIFACT,
            Arc::new(ConstantModel::new(vec![0.2, 0.3, 0.9, 0.8])),
        );
        let est = select_estimator::<Gaze>(&store, ModelPolicy::RequirePrimary).unwrap();
        assert_eq!(est.backend(), Backend::Model);

        let frame = test_support::face_frame();
        let window = test_support::steady_window(4);
        let (face, activity) = (test_support::face(), test_support::activity());
        let input = FrameInput {
            frame: &frame,
            face: &face,
            crop: None,
            activity: &activity,
            window: &window,
            timestamp: test_support::at(0),
        };
        let pool = TensorPool::new();
        let reading = est.estimate(&input, &pool).unwrap();
        let point = reading.point.unwrap();
        assert!((point.x - 0.2).abs() < 1e-6);
        assert!((reading.eye_openness - 0.8).abs() < 1e-6);
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.total_leased(), 1);
    }

    #[test]
    fn test_model_errors_are_typed() {
        let est: Box<dyn Estimator<Gaze>> = Box::new(ModelEstimator::<Gaze>::new(Arc::new(FailingModel)));
        let frame = test_support::face_frame();
        let window = HistoryWindow::default();
        let (face, activity) = (test_support::face(), test_support::activity());
        let input = FrameInput {
            frame: &frame,
            face: &face,
            crop: None,
            activity: &activity,
            window: &window,
            timestamp: test_support::at(0),
        };
        let pool = TensorPool::new();
        assert!(matches!(
            est.estimate(&input, &pool),
            Err(InferenceError::Model { module: "gaze", .. })
        ));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_guarded_run_catches_panics_and_releases() {
        let frame = test_support::face_frame();
        let window = HistoryWindow::default();
        let (face, activity) = (test_support::face(), test_support::activity());
        let input = FrameInput {
            frame: &frame,
            face: &face,
            crop: None,
            activity: &activity,
            window: &window,
            timestamp: test_support::at(0),
        };
        let pool = TensorPool::new();
        let result = run_guarded::<Gaze>(&PanickingEstimator, &input, &pool);
        assert!(matches!(result, Err(InferenceError::Panicked { module: "gaze" })));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_stack_reports_backends() {
        let store = StaticModelStore::new().with_model(
            Emotion::ARTIFACT,
            Arc::new(ConstantModel::new(vec![0.0; Emotion::OUTPUT_LEN])),
        );
        let stack = InferenceStack::load(&store, ModelPolicy::PreferPrimary).unwrap();
        assert_eq!(stack.models_loaded(), 1);
        let modules = stack.modules();
        assert_eq!(modules.len(), 7);
        assert!(modules
            .iter()
            .any(|m| m.module == "emotion" && m.backend == Backend::Model));
        assert_eq!(InferenceStack::fallback_only().models_loaded(), 0);
    }

    #[test]
    fn test_encode_with_history_pads() {
        let pool = TensorPool::new();
        let tensor = encode_with_history(&pool, vec![1.0, 2.0], &test_support::steady_window(3), 5);
        assert_eq!(tensor.len(), 2 + 5 * FEATURE_LEN);
        // First two history rows are padding.
        assert!(tensor.as_slice()[2..2 + 2 * FEATURE_LEN].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }
}
