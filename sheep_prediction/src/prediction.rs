use crate::error::{InferenceError, ModelLoadError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_TARGET_NAMES: [&str; 4] = ["weight_kg", "lean_pct", "fat_pct", "bone_pct"];

/// Inverse of the standard scaler fitted on the training targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl TargetScaler {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn inverse_transform(&self, outputs: &[f32]) -> Vec<f32> {
        outputs
            .iter()
            .zip(self.scale.iter().zip(&self.mean))
            .map(|(value, (scale, mean))| value * scale + mean)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    WeightKg,
    LeanPct,
    FatPct,
    BonePct,
    LeanKg,
    FatKg,
    CarcassKg,
    Confidence,
}

impl TryFrom<&str> for TargetKind {
    type Error = String;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        let name = name.to_lowercase();
        let is_pct = name.contains("pct") || name.contains("percent");
        let kind = if name.contains("carcass") {
            Self::CarcassKg
        } else if name.contains("confidence") {
            Self::Confidence
        } else if name.contains("lean") {
            if is_pct {
                Self::LeanPct
            } else {
                Self::LeanKg
            }
        } else if name.contains("fat") {
            if is_pct {
                Self::FatPct
            } else {
                Self::FatKg
            }
        } else if name.contains("bone") {
            Self::BonePct
        } else if name.contains("weight") {
            Self::WeightKg
        } else {
            return Err(format!("`{}` is not a known prediction target", name));
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Composition {
    /// Model predicts the percentages directly.
    Percentages { lean: usize, fat: usize, bone: usize },
    /// Model predicts masses; percentages are derived from the carcass total.
    CarcassMass {
        lean: usize,
        fat: usize,
        carcass: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WeightStatus {
    Underweight,
    Low,
    Healthy,
    Good,
    Excellent,
}

impl WeightStatus {
    pub fn from_weight(weight_kg: f32) -> Self {
        if weight_kg < 40. {
            Self::Underweight
        } else if weight_kg < 45. {
            Self::Low
        } else if weight_kg < 55. {
            Self::Healthy
        } else if weight_kg < 65. {
            Self::Good
        } else {
            Self::Excellent
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub weight_kg: f32,
    pub lean_pct: f32,
    pub fat_pct: f32,
    pub bone_pct: f32,
    pub confidence: Option<f32>,
    pub status: WeightStatus,
    /// Model outputs after the inverse scaler and clamping, keyed by target name.
    pub raw_outputs: BTreeMap<String, f32>,
}

/// Turns a raw model output vector into a [`PredictionResult`].
///
/// Built once at startup from the model's target names so that an unusable
/// layout is a load error rather than a per-request one.
#[derive(Debug, Clone)]
pub struct OutputShaper {
    target_names: Vec<String>,
    weight: usize,
    composition: Composition,
    confidence: Option<usize>,
    scaler: Option<TargetScaler>,
    confidence_placeholder: Option<f32>,
}

impl OutputShaper {
    pub fn new(
        target_names: &[String],
        scaler: Option<TargetScaler>,
        confidence_placeholder: Option<f32>,
    ) -> Result<Self, ModelLoadError> {
        let mut positions: BTreeMap<&'static str, usize> = BTreeMap::new();
        for (index, name) in target_names.iter().enumerate() {
            let kind = TargetKind::try_from(name.as_str()).map_err(ModelLoadError::TargetLayout)?;
            let key = match kind {
                TargetKind::WeightKg => "weight",
                TargetKind::LeanPct => "lean_pct",
                TargetKind::FatPct => "fat_pct",
                TargetKind::BonePct => "bone_pct",
                TargetKind::LeanKg => "lean_kg",
                TargetKind::FatKg => "fat_kg",
                TargetKind::CarcassKg => "carcass_kg",
                TargetKind::Confidence => "confidence",
            };
            if positions.insert(key, index).is_some() {
                return Err(ModelLoadError::TargetLayout(format!(
                    "target `{}` is declared more than once",
                    name
                )));
            }
        }

        let weight = *positions.get("weight").ok_or_else(|| {
            ModelLoadError::TargetLayout("no live weight target declared".to_string())
        })?;

        let get = |key: &str| positions.get(key).copied();
        let composition = match (
            (get("lean_pct"), get("fat_pct"), get("bone_pct")),
            (get("lean_kg"), get("fat_kg"), get("carcass_kg")),
        ) {
            ((Some(lean), Some(fat), Some(bone)), (None, None, None)) => {
                Composition::Percentages { lean, fat, bone }
            }
            ((None, None, None), (Some(lean), Some(fat), Some(carcass))) => {
                Composition::CarcassMass { lean, fat, carcass }
            }
            _ => {
                return Err(ModelLoadError::TargetLayout(format!(
                    "targets {:?} are neither lean/fat/bone percentages nor lean/fat/carcass masses",
                    target_names
                )))
            }
        };

        if let Some(scaler) = &scaler {
            if scaler.mean.len() != target_names.len() || scaler.scale.len() != target_names.len()
            {
                return Err(ModelLoadError::TargetLayout(format!(
                    "target scaler has {} means and {} scales for {} targets",
                    scaler.mean.len(),
                    scaler.scale.len(),
                    target_names.len()
                )));
            }
        }

        Ok(Self {
            target_names: target_names.to_vec(),
            weight,
            composition,
            confidence: get("confidence"),
            scaler,
            confidence_placeholder,
        })
    }

    pub fn num_targets(&self) -> usize {
        self.target_names.len()
    }

    pub fn shape(&self, outputs: &[f32]) -> Result<PredictionResult, InferenceError> {
        if outputs.len() != self.num_targets() {
            return Err(InferenceError::OutputShape {
                expected: self.num_targets(),
                got: outputs.len(),
            });
        }

        let unscaled = match &self.scaler {
            Some(scaler) => scaler.inverse_transform(outputs),
            None => outputs.to_vec(),
        };
        // NaN and infinities would otherwise survive the clamp below
        if let Some((name, _)) = self
            .target_names
            .iter()
            .zip(outputs.iter().zip(&unscaled))
            .find(|(_, (raw, value))| !raw.is_finite() || !value.is_finite())
        {
            return Err(InferenceError::NonFinite {
                target: name.clone(),
            });
        }
        let values: Vec<f32> = unscaled.into_iter().map(|v| v.max(0.)).collect();

        let weight_kg = values[self.weight];
        let (lean_pct, fat_pct, bone_pct) = match self.composition {
            Composition::Percentages { lean, fat, bone } => {
                (values[lean], values[fat], values[bone])
            }
            Composition::CarcassMass { lean, fat, carcass } => {
                carcass_percentages(values[lean], values[fat], values[carcass])
            }
        };
        if let Composition::CarcassMass { carcass, .. } = self.composition {
            if ![lean_pct, fat_pct, bone_pct].iter().all(|v| v.is_finite()) {
                return Err(InferenceError::NonFinite {
                    target: self.target_names[carcass].clone(),
                });
            }
        }

        let raw_outputs = self
            .target_names
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect();

        Ok(PredictionResult {
            weight_kg,
            lean_pct,
            fat_pct,
            bone_pct,
            confidence: self
                .confidence
                .map(|index| values[index])
                .or(self.confidence_placeholder),
            status: WeightStatus::from_weight(weight_kg),
            raw_outputs,
        })
    }
}

/// Lean and fat as a share of the carcass, bone being the remainder.
fn carcass_percentages(lean_kg: f32, fat_kg: f32, carcass_kg: f32) -> (f32, f32, f32) {
    if carcass_kg <= 0. {
        return (0., 0., 0.);
    }
    let lean_pct = lean_kg / carcass_kg * 100.;
    let fat_pct = fat_kg / carcass_kg * 100.;
    let bone_pct = if lean_kg + fat_kg > carcass_kg {
        0.
    } else {
        100. - (lean_pct + fat_pct)
    };
    (lean_pct, fat_pct, bone_pct)
}

pub fn default_target_names() -> Vec<String> {
    DEFAULT_TARGET_NAMES.iter().map(|s| s.to_string()).collect()
}
