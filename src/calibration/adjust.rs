//! Cultural and personal adjustment of fused samples.

use super::baseline::PersonalBaseline;
use super::profiles::CulturalCalibrationProfile;
use crate::core::history::HeadlineMetrics;
use crate::core::sample::EngagementSample;
use serde::{Deserialize, Serialize};

/// Coefficients of the adjustment. Every field is a tunable heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentCoefficients {
    /// Eye-contact norm at which attention is left unscaled
    pub eye_contact_pivot: f64,
    /// Expressiveness baseline at which engagement is left unscaled
    pub expressiveness_pivot: f64,
    /// How far suppression tendency amplifies observed emotion intensity
    pub suppression_gain: f64,
    /// How far distraction tolerance discounts distraction probability
    pub tolerance_gain: f64,
    /// How far posture formality tempers the ergonomic score
    pub formality_gain: f64,
    /// Fraction of the gap between reference and personal baseline applied
    pub personal_weight: f64,
    /// Population reference levels the personal baseline is measured against
    pub reference: HeadlineMetrics,
}

impl Default for AdjustmentCoefficients {
    fn default() -> Self {
        Self {
            eye_contact_pivot: 0.6,
            expressiveness_pivot: 0.7,
            suppression_gain: 0.5,
            tolerance_gain: 0.5,
            formality_gain: 0.3,
            personal_weight: 0.5,
            reference: HeadlineMetrics {
                overall_engagement: 0.6,
                attention_level: 0.7,
                cognitive_load: 0.5,
                fatigue_level: 0.2,
                distraction_probability: 0.3,
            },
        }
    }
}

/// Apply cultural norms and, when present, the personal baseline to a fused
/// sample. Every bounded field of the result is clamped.
pub fn adjust(
    sample: &EngagementSample,
    profile: &CulturalCalibrationProfile,
    baseline: Option<&PersonalBaseline>,
    k: &AdjustmentCoefficients,
) -> EngagementSample {
    let mut out = sample.clone();

    out.attention_level *= 1.0 + profile.eye_contact_norm - k.eye_contact_pivot;
    out.overall_engagement *= 1.0 + profile.expressiveness_baseline - k.expressiveness_pivot;

    let emotion = &mut out.emotional_state;
    emotion.intensity *= 1.0 + profile.emotional_suppression_tendency * k.suppression_gain;
    emotion.culturally_adjusted = true;

    out.distraction_probability *= 1.0 - k.tolerance_gain * (profile.distraction_tolerance - 0.5);
    out.posture.ergonomic_score *= 1.0 + k.formality_gain * (0.5 - profile.posture_formality);

    if let Some(base) = baseline {
        let r = &k.reference;
        let w = k.personal_weight;
        out.overall_engagement += (r.overall_engagement - base.overall_engagement) * w;
        out.attention_level += (r.attention_level - base.attention_level) * w;
        out.cognitive_load += (r.cognitive_load - base.cognitive_load) * w;
        out.fatigue_level += (r.fatigue_level - base.fatigue_level) * w;
        out.distraction_probability += (r.distraction_probability - base.distraction_probability) * w;
    }

    out.cultural_context.profile = profile.tag.clone();
    out.cultural_context.personal_baseline = baseline.is_some();
    out.clamp_bounded();
    out
}
