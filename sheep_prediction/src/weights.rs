//! Checkpoint loading for the safetensors backend.
//!
//! Fine-tuned checkpoints store the backbone under a different structural
//! prefix than the runtime ResNet (`cnn.layer1.0.conv1.weight` instead of
//! `layer1.0.conv1.weight`) and carry extra heads the service never uses.
//! [`remap_key`] is the single place where stored names are translated.

use crate::{config::KeyRemapConfig, error::ModelLoadError, prediction::TargetScaler};
use candle_core::{Device, Tensor};
use safetensors::SafeTensors;
use std::{
    collections::{hash_map::Entry, HashMap},
    path::Path,
};

pub const TARGET_NAMES_KEY: &str = "target_names";
pub const TARGET_SCALER_KEY: &str = "target_scaler";

/// Maps a stored parameter name to the runtime name, or `None` to drop it.
pub fn remap_key(stored: &str, rules: &KeyRemapConfig) -> Option<String> {
    let is_dropped = |name: &str| {
        rules
            .drop_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
            || rules
                .drop_suffixes
                .iter()
                .any(|suffix| name.ends_with(suffix.as_str()))
    };

    let mut name = stored;
    loop {
        if is_dropped(name) {
            return None;
        }
        match rules
            .strip_prefixes
            .iter()
            .find(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
        {
            Some(prefix) => name = &name[prefix.len()..],
            None => break,
        }
    }

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[derive(Debug)]
pub struct RemappedKeys<T> {
    pub entries: HashMap<String, T>,
    pub dropped: Vec<String>,
}

/// Applies [`remap_key`] to every stored entry, refusing ambiguous results.
pub fn remap_keys<T>(
    stored: impl IntoIterator<Item = (String, T)>,
    rules: &KeyRemapConfig,
) -> Result<RemappedKeys<T>, ModelLoadError> {
    let mut entries = HashMap::new();
    let mut origins: HashMap<String, String> = HashMap::new();
    let mut dropped = Vec::new();

    for (stored_name, value) in stored {
        let Some(runtime_name) = remap_key(&stored_name, rules) else {
            dropped.push(stored_name);
            continue;
        };
        match origins.entry(runtime_name.clone()) {
            Entry::Occupied(existing) => {
                return Err(ModelLoadError::KeyCollision {
                    first: existing.get().clone(),
                    second: stored_name,
                    target: runtime_name,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(stored_name);
            }
        }
        entries.insert(runtime_name, value);
    }

    dropped.sort();
    Ok(RemappedKeys { entries, dropped })
}

#[derive(Debug)]
pub struct Checkpoint {
    pub tensors: HashMap<String, Tensor>,
    pub target_names: Option<Vec<String>>,
    pub target_scaler: Option<TargetScaler>,
}

pub fn load_checkpoint(
    path: &Path,
    rules: &KeyRemapConfig,
    device: &Device,
) -> Result<Checkpoint, ModelLoadError> {
    if !path.exists() {
        return Err(ModelLoadError::WeightsNotFound(path.to_path_buf()));
    }
    let buffer = std::fs::read(path).map_err(|source| ModelLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (_, header) = SafeTensors::read_metadata(&buffer)
        .map_err(|e| ModelLoadError::InvalidWeights(e.to_string()))?;
    let metadata = header.metadata().clone().unwrap_or_default();
    let target_names = parse_target_names(&metadata)?;
    let target_scaler = parse_target_scaler(&metadata)?;

    let stored = candle_core::safetensors::load_buffer(&buffer, device)
        .map_err(|e| ModelLoadError::InvalidWeights(e.to_string()))?;
    let stored_count = stored.len();
    let remapped = remap_keys(stored, rules)?;

    tracing::info!(
        "Loaded {} stored parameters, kept {}, dropped {}",
        stored_count,
        remapped.entries.len(),
        remapped.dropped.len()
    );
    if !remapped.dropped.is_empty() {
        tracing::debug!("Dropped parameters: {:?}", remapped.dropped);
    }

    Ok(Checkpoint {
        tensors: remapped.entries,
        target_names,
        target_scaler,
    })
}

fn parse_target_names(
    metadata: &HashMap<String, String>,
) -> Result<Option<Vec<String>>, ModelLoadError> {
    metadata
        .get(TARGET_NAMES_KEY)
        .map(|raw| {
            serde_json::from_str::<Vec<String>>(raw).map_err(|e| ModelLoadError::Metadata {
                key: TARGET_NAMES_KEY.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_target_scaler(
    metadata: &HashMap<String, String>,
) -> Result<Option<TargetScaler>, ModelLoadError> {
    let Some(raw) = metadata.get(TARGET_SCALER_KEY) else {
        return Ok(None);
    };
    let scaler: TargetScaler =
        serde_json::from_str(raw).map_err(|e| ModelLoadError::Metadata {
            key: TARGET_SCALER_KEY.to_string(),
            reason: e.to_string(),
        })?;
    if scaler.mean.len() != scaler.scale.len() || scaler.is_empty() {
        return Err(ModelLoadError::Metadata {
            key: TARGET_SCALER_KEY.to_string(),
            reason: format!(
                "expected matching non-empty mean and scale, got {} and {}",
                scaler.mean.len(),
                scaler.scale.len()
            ),
        });
    }
    Ok(Some(scaler))
}
