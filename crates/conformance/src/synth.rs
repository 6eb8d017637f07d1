//! Randomized input synthesis for conformance checks.

use candle_core::{Device, Result, Tensor};
use encoder::EncoderConfig;

/// Index tensor of `shape` with every element drawn independently and
/// uniformly from `[0, bound)`.
///
/// Stateless: two calls with identical arguments are independent draws.
/// `bound` must be positive; passing zero is a caller error.
pub fn ids_tensor(shape: &[usize], bound: u32, device: &Device) -> Result<Tensor> {
    let count: usize = shape.iter().product();
    let data: Vec<u32> = (0..count).map(|_| fastrand::u32(0..bound)).collect();
    Tensor::from_vec(data, shape, device)
}

/// One synthesized batch: the core input roles plus whichever label
/// roles the configuration enables. Absent roles are `None`, never a
/// zero tensor; a batch lives for exactly one conformance check.
#[derive(Debug)]
pub struct InputBatch {
    pub input_ids: Tensor,
    pub attention_mask: Option<Tensor>,
    pub token_type_ids: Option<Tensor>,
    pub sequence_labels: Option<Tensor>,
    pub token_labels: Option<Tensor>,
    pub choice_labels: Option<Tensor>,
}

/// Architecture and test knobs driving both input synthesis and variant
/// construction. Kept deliberately small so a full family sweep runs in
/// well under a second.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub batch_size: usize,
    pub seq_length: usize,
    pub use_attention_mask: bool,
    pub use_token_type_ids: bool,
    pub use_labels: bool,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_dropout_prob: f32,
    pub attention_probs_dropout_prob: f32,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub type_sequence_label_size: usize,
    pub initializer_range: f64,
    pub num_labels: usize,
    pub num_choices: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            batch_size: 13,
            seq_length: 7,
            use_attention_mask: true,
            use_token_type_ids: true,
            use_labels: true,
            vocab_size: 99,
            hidden_size: 32,
            num_hidden_layers: 5,
            num_attention_heads: 4,
            intermediate_size: 37,
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            max_position_embeddings: 512,
            type_vocab_size: 16,
            type_sequence_label_size: 2,
            initializer_range: 0.02,
            num_labels: 3,
            num_choices: 4,
        }
    }
}

impl HarnessConfig {
    /// The shared model configuration every variant is constructed from.
    ///
    /// `num_labels`/`num_choices` keep their construction defaults here;
    /// the runner overrides them on a local copy for the variants that
    /// consume them.
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            vocab_size: self.vocab_size,
            hidden_size: self.hidden_size,
            num_hidden_layers: self.num_hidden_layers,
            num_attention_heads: self.num_attention_heads,
            intermediate_size: self.intermediate_size,
            hidden_dropout_prob: self.hidden_dropout_prob,
            attention_probs_dropout_prob: self.attention_probs_dropout_prob,
            max_position_embeddings: self.max_position_embeddings,
            type_vocab_size: self.type_vocab_size,
            initializer_range: self.initializer_range,
            ..EncoderConfig::default()
        }
    }

    /// Draws one fresh batch. Each call is an independent draw; nothing
    /// is shared or persisted between calls.
    pub fn draw(&self, device: &Device) -> Result<InputBatch> {
        let batch_seq = [self.batch_size, self.seq_length];

        let input_ids = ids_tensor(&batch_seq, self.vocab_size as u32, device)?;

        let attention_mask = if self.use_attention_mask {
            Some(ids_tensor(&batch_seq, 2, device)?)
        } else {
            None
        };
        let token_type_ids = if self.use_token_type_ids {
            Some(ids_tensor(&batch_seq, self.type_vocab_size as u32, device)?)
        } else {
            None
        };

        let (sequence_labels, token_labels, choice_labels) = if self.use_labels {
            (
                Some(ids_tensor(
                    &[self.batch_size],
                    self.type_sequence_label_size as u32,
                    device,
                )?),
                Some(ids_tensor(&batch_seq, self.num_labels as u32, device)?),
                Some(ids_tensor(
                    &[self.batch_size],
                    self.num_choices as u32,
                    device,
                )?),
            )
        } else {
            (None, None, None)
        };

        Ok(InputBatch {
            input_ids,
            attention_mask,
            token_type_ids,
            sequence_labels,
            token_labels,
            choice_labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn ids_tensor_respects_shape_and_bound() {
        let device = Device::Cpu;
        let tensor = ids_tensor(&[4, 9], 5, &device).unwrap();

        assert_eq!(tensor.dims(), &[4, 9]);
        assert_eq!(tensor.dtype(), DType::U32);
        let values = tensor.flatten_all().unwrap().to_vec1::<u32>().unwrap();
        assert!(values.iter().all(|&v| v < 5));
    }

    #[test]
    fn draw_synthesizes_every_enabled_role() {
        let device = Device::Cpu;
        let harness = HarnessConfig::default();
        let batch = harness.draw(&device).unwrap();

        assert_eq!(batch.input_ids.dims(), &[13, 7]);
        assert_eq!(batch.attention_mask.unwrap().dims(), &[13, 7]);
        assert_eq!(batch.token_type_ids.unwrap().dims(), &[13, 7]);
        assert_eq!(batch.sequence_labels.unwrap().dims(), &[13]);
        assert_eq!(batch.token_labels.unwrap().dims(), &[13, 7]);
        assert_eq!(batch.choice_labels.unwrap().dims(), &[13]);
    }

    #[test]
    fn disabled_roles_are_absent_not_zeroed() {
        let device = Device::Cpu;
        let harness = HarnessConfig {
            use_attention_mask: false,
            use_token_type_ids: false,
            use_labels: false,
            ..HarnessConfig::default()
        };
        let batch = harness.draw(&device).unwrap();

        assert!(batch.attention_mask.is_none());
        assert!(batch.token_type_ids.is_none());
        assert!(batch.sequence_labels.is_none());
        assert!(batch.token_labels.is_none());
        assert!(batch.choice_labels.is_none());
    }
}
