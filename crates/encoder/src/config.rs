use candle_core::{Error, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Non-linearity applied inside the feed-forward stack and the
/// masked-token transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Gelu,
    Relu,
}

impl Activation {
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        match self {
            Activation::Gelu => input.gelu_erf(),
            Activation::Relu => input.relu(),
        }
    }
}

/// High-level configuration shared by the backbone and every task head.
///
/// Field names follow the `config.json` layout shipped with published
/// checkpoints, so a checkpoint config deserializes directly into this
/// struct. `num_labels` and `num_choices` are head-only knobs absent from
/// checkpoint configs; callers override them on a local copy before
/// constructing a classification or multiple-choice head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: Activation,
    pub hidden_dropout_prob: f32,
    pub attention_probs_dropout_prob: f32,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub initializer_range: f64,
    #[serde(default = "default_label_count")]
    pub num_labels: usize,
    #[serde(default = "default_label_count")]
    pub num_choices: usize,
}

fn default_label_count() -> usize {
    2
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_act: Activation::Gelu,
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            initializer_range: 0.02,
            num_labels: 2,
            num_choices: 2,
        }
    }
}

impl EncoderConfig {
    /// Width of a single attention head.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Validate structural invariants before any parameters are allocated.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(Error::Msg("vocab_size must be greater than zero".into()));
        }
        if self.hidden_size == 0 {
            return Err(Error::Msg("hidden_size must be greater than zero".into()));
        }
        if self.num_hidden_layers == 0 {
            return Err(Error::Msg(
                "num_hidden_layers must be greater than zero".into(),
            ));
        }
        if self.num_attention_heads == 0 {
            return Err(Error::Msg(
                "num_attention_heads must be greater than zero".into(),
            ));
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Msg(format!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.intermediate_size == 0 {
            return Err(Error::Msg(
                "intermediate_size must be greater than zero".into(),
            ));
        }
        if self.max_position_embeddings == 0 {
            return Err(Error::Msg(
                "max_position_embeddings must be greater than zero".into(),
            ));
        }
        if self.type_vocab_size == 0 {
            return Err(Error::Msg(
                "type_vocab_size must be greater than zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.hidden_dropout_prob) {
            return Err(Error::Msg("hidden_dropout_prob must be in [0, 1)".into()));
        }
        if !(0.0..1.0).contains(&self.attention_probs_dropout_prob) {
            return Err(Error::Msg(
                "attention_probs_dropout_prob must be in [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EncoderConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_dividing_heads() {
        let config = EncoderConfig {
            hidden_size: 30,
            num_attention_heads: 4,
            ..EncoderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_vocab() {
        let config = EncoderConfig {
            vocab_size: 0,
            ..EncoderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_dropout() {
        let config = EncoderConfig {
            hidden_dropout_prob: 1.0,
            ..EncoderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_round_trip() {
        let config = EncoderConfig {
            num_labels: 7,
            ..EncoderConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: EncoderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.vocab_size, config.vocab_size);
        assert_eq!(back.num_labels, 7);
        assert_eq!(back.hidden_act, Activation::Gelu);
    }

    #[test]
    fn checkpoint_config_without_head_fields_parses() {
        let json = r#"{
            "vocab_size": 99,
            "hidden_size": 32,
            "num_hidden_layers": 5,
            "num_attention_heads": 4,
            "intermediate_size": 37,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.1,
            "attention_probs_dropout_prob": 0.1,
            "max_position_embeddings": 512,
            "type_vocab_size": 16,
            "initializer_range": 0.02
        }"#;
        let config: EncoderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.num_labels, 2);
        assert_eq!(config.num_choices, 2);
        config.validate().unwrap();
    }
}
