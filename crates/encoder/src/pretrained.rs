//! Published-checkpoint registry and weight loading.

use std::fs;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use thiserror::Error;

use crate::backbone::Encoder;
use crate::config::EncoderConfig;

const CONFIG_FILENAME: &str = "config.json";
const WEIGHTS_FILENAME: &str = "model.safetensors";

/// Checkpoint tensors for this family are published under this prefix.
const WEIGHT_NAMESPACE: &str = "bert";

#[derive(Error, Debug)]
pub enum PretrainedError {
    #[error("hub fetch failed: {0}")]
    Fetch(#[from] hf_hub::api::sync::ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid checkpoint config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),
}

/// Ordered table of published model names and the hub repositories that
/// host their weights.
///
/// The registry is plain read-only data meant to be passed to whatever
/// component needs it instead of being consulted through a global
/// lookup, so callers can substitute a smaller or fake table in tests.
#[derive(Debug, Clone, Copy)]
pub struct PretrainedRegistry {
    entries: &'static [(&'static str, &'static str)],
}

/// Checkpoints published for this model family.
pub const PRETRAINED_MODELS: PretrainedRegistry = PretrainedRegistry::new(&[
    ("bert-base-uncased", "google-bert/bert-base-uncased"),
    ("bert-large-uncased", "google-bert/bert-large-uncased"),
    ("bert-base-cased", "google-bert/bert-base-cased"),
    ("bert-large-cased", "google-bert/bert-large-cased"),
    (
        "bert-base-multilingual-uncased",
        "google-bert/bert-base-multilingual-uncased",
    ),
    (
        "bert-base-multilingual-cased",
        "google-bert/bert-base-multilingual-cased",
    ),
    ("bert-base-chinese", "google-bert/bert-base-chinese"),
]);

impl PretrainedRegistry {
    pub const fn new(entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { entries }
    }

    /// Registered names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    /// Maps a registered name to its hub repository id.
    pub fn resolve(&self, name: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, repo)| *repo)
    }

    /// Downloads a checkpoint into `cache_dir` and builds the backbone
    /// from it.
    ///
    /// Names outside the registry are treated as raw hub repository ids
    /// so private or newer checkpoints remain loadable. Fetch, parse, and
    /// construction failures all propagate; nothing is retried.
    pub fn load(
        &self,
        name: &str,
        cache_dir: &Path,
        device: &Device,
    ) -> Result<Encoder, PretrainedError> {
        let repo_id = self.resolve(name).unwrap_or(name);
        log::info!("fetching {repo_id} into {}", cache_dir.display());

        let api = hf_hub::api::sync::ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .build()?;
        let repo = api.model(repo_id.to_string());

        let config_path = repo.get(CONFIG_FILENAME)?;
        let weights_path = repo.get(WEIGHTS_FILENAME)?;

        let config: EncoderConfig = serde_json::from_str(&fs::read_to_string(config_path)?)?;
        let tensors = candle_core::safetensors::load(&weights_path, device)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);

        let model = Encoder::new(&config, vb.pp(WEIGHT_NAMESPACE))?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_preserves_declaration_order() {
        let names: Vec<_> = PRETRAINED_MODELS.names().collect();
        assert_eq!(names.first(), Some(&"bert-base-uncased"));
        assert_eq!(names.len(), 7);
    }

    #[test]
    fn resolve_maps_known_names() {
        assert_eq!(
            PRETRAINED_MODELS.resolve("bert-base-chinese"),
            Some("google-bert/bert-base-chinese")
        );
        assert_eq!(PRETRAINED_MODELS.resolve("not-registered"), None);
    }
}
