//! Task heads layered on the shared [`Encoder`] backbone.
//!
//! Every head accepts the same core inputs (token ids, optional segment
//! ids, optional attention mask) plus its task's label roles, and returns
//! its task scores together with an optional scalar loss. Labels are
//! optional everywhere: a head invoked without them still produces fully
//! shaped scores and simply returns `None` for the loss.

use candle_core::{Result, Tensor};
use candle_nn::{loss, Dropout, LayerNorm, Linear, Module, VarBuilder};

use crate::backbone::Encoder;
use crate::config::{Activation, EncoderConfig};

const LAYER_NORM_EPS: f64 = 1e-12;

/// Scope holding the backbone parameters inside every head, matching the
/// namespace used by published checkpoints.
const BACKBONE_SCOPE: &str = "bert";

/// Cross entropy over per-token scores: flattens `(batch, seq, classes)`
/// and `(batch, seq)` into one token axis before the reduction.
fn cross_entropy_per_token(scores: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (batch, seq, classes) = scores.dims3()?;
    let flat_scores = scores.reshape((batch * seq, classes))?;
    let flat_labels = labels.reshape((batch * seq,))?;
    loss::cross_entropy(&flat_scores, &flat_labels)
}

/// Transform applied to the sequence representation before scoring every
/// vocabulary entry: dense projection, activation, layer norm, then the
/// vocabulary decoder.
#[derive(Debug)]
struct MaskedTokenScorer {
    transform: Linear,
    transform_norm: LayerNorm,
    decoder: Linear,
    activation: Activation,
}

impl MaskedTokenScorer {
    fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let transform = candle_nn::linear(hidden, hidden, vb.pp("transform").pp("dense"))?;
        let transform_norm = candle_nn::layer_norm(
            hidden,
            LAYER_NORM_EPS,
            vb.pp("transform").pp("LayerNorm"),
        )?;
        let decoder = candle_nn::linear(hidden, config.vocab_size, vb.pp("decoder"))?;

        Ok(Self {
            transform,
            transform_norm,
            decoder,
            activation: config.hidden_act,
        })
    }

    fn forward(&self, sequence_output: &Tensor) -> Result<Tensor> {
        let hidden = self.transform.forward(sequence_output)?;
        let hidden = self.activation.forward(&hidden)?;
        let hidden = self.transform_norm.forward(&hidden)?;
        self.decoder.forward(&hidden)
    }
}

/// Masked-token prediction: one score per vocabulary entry per position.
#[derive(Debug)]
pub struct MaskedLanguageModel {
    backbone: Encoder,
    scorer: MaskedTokenScorer,
}

impl MaskedLanguageModel {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let backbone = Encoder::new(config, vb.pp(BACKBONE_SCOPE))?;
        let scorer = MaskedTokenScorer::new(config, vb.pp("cls").pp("predictions"))?;
        Ok(Self { backbone, scorer })
    }

    /// Returns `(prediction_scores, loss)` with scores shaped
    /// `(batch, seq, vocab)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        labels: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (sequence_output, _pooled) =
            self.backbone
                .forward(input_ids, token_type_ids, attention_mask, train)?;
        let prediction_scores = self.scorer.forward(&sequence_output)?;

        let loss = match labels {
            Some(labels) => Some(cross_entropy_per_token(&prediction_scores, labels)?),
            None => None,
        };
        Ok((prediction_scores, loss))
    }
}

/// Binary decision over the pooled representation: does the second
/// segment follow the first?
#[derive(Debug)]
pub struct NextSequencePrediction {
    backbone: Encoder,
    seq_relationship: Linear,
}

impl NextSequencePrediction {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let backbone = Encoder::new(config, vb.pp(BACKBONE_SCOPE))?;
        let seq_relationship =
            candle_nn::linear(config.hidden_size, 2, vb.pp("cls").pp("seq_relationship"))?;
        Ok(Self {
            backbone,
            seq_relationship,
        })
    }

    /// Returns `(seq_relationship_score, loss)` with scores shaped
    /// `(batch, 2)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        labels: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (_sequence_output, pooled) =
            self.backbone
                .forward(input_ids, token_type_ids, attention_mask, train)?;
        let score = self.seq_relationship.forward(&pooled)?;

        let loss = match labels {
            Some(labels) => Some(loss::cross_entropy(&score, labels)?),
            None => None,
        };
        Ok((score, loss))
    }
}

/// Joint pretraining objective: masked-token scores and the
/// next-sequence decision from one backbone pass. The loss is the sum of
/// the two terms and is only produced when both label roles are present.
#[derive(Debug)]
pub struct PretrainingModel {
    backbone: Encoder,
    scorer: MaskedTokenScorer,
    seq_relationship: Linear,
}

impl PretrainingModel {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let backbone = Encoder::new(config, vb.pp(BACKBONE_SCOPE))?;
        let scorer = MaskedTokenScorer::new(config, vb.pp("cls").pp("predictions"))?;
        let seq_relationship =
            candle_nn::linear(config.hidden_size, 2, vb.pp("cls").pp("seq_relationship"))?;
        Ok(Self {
            backbone,
            scorer,
            seq_relationship,
        })
    }

    /// Returns `(prediction_scores, seq_relationship_score, loss)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        token_labels: Option<&Tensor>,
        sequence_labels: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor, Option<Tensor>)> {
        let (sequence_output, pooled) =
            self.backbone
                .forward(input_ids, token_type_ids, attention_mask, train)?;
        let prediction_scores = self.scorer.forward(&sequence_output)?;
        let seq_relationship_score = self.seq_relationship.forward(&pooled)?;

        let loss = match (token_labels, sequence_labels) {
            (Some(token_labels), Some(sequence_labels)) => {
                let masked_loss = cross_entropy_per_token(&prediction_scores, token_labels)?;
                let relationship_loss =
                    loss::cross_entropy(&seq_relationship_score, sequence_labels)?;
                Some(masked_loss.add(&relationship_loss)?)
            }
            _ => None,
        };
        Ok((prediction_scores, seq_relationship_score, loss))
    }
}

/// Span extraction: one start score and one end score per position.
#[derive(Debug)]
pub struct QuestionAnswering {
    backbone: Encoder,
    qa_outputs: Linear,
}

impl QuestionAnswering {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let backbone = Encoder::new(config, vb.pp(BACKBONE_SCOPE))?;
        let qa_outputs = candle_nn::linear(config.hidden_size, 2, vb.pp("qa_outputs"))?;
        Ok(Self {
            backbone,
            qa_outputs,
        })
    }

    /// Returns `(start_logits, end_logits, loss)`, each logit tensor
    /// shaped `(batch, seq)`. Position labels landing outside the
    /// sequence are clamped to the last valid position before the loss.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        start_positions: Option<&Tensor>,
        end_positions: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor, Option<Tensor>)> {
        let (sequence_output, _pooled) =
            self.backbone
                .forward(input_ids, token_type_ids, attention_mask, train)?;
        let logits = self.qa_outputs.forward(&sequence_output)?;
        let start_logits = logits.narrow(2, 0, 1)?.squeeze(2)?;
        let end_logits = logits.narrow(2, 1, 1)?.squeeze(2)?;

        let loss = match (start_positions, end_positions) {
            (Some(start_positions), Some(end_positions)) => {
                let (_batch, seq) = start_logits.dims2()?;
                let last = (seq - 1) as u32;
                let start = start_positions.clamp(0u32, last)?;
                let end = end_positions.clamp(0u32, last)?;
                let start_loss = loss::cross_entropy(&start_logits, &start)?;
                let end_loss = loss::cross_entropy(&end_logits, &end)?;
                Some(start_loss.add(&end_loss)?.affine(0.5, 0.0)?)
            }
            _ => None,
        };
        Ok((start_logits, end_logits, loss))
    }
}

/// Whole-sequence classification over the pooled representation.
#[derive(Debug)]
pub struct SequenceClassification {
    backbone: Encoder,
    dropout: Dropout,
    classifier: Linear,
}

impl SequenceClassification {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let backbone = Encoder::new(config, vb.pp(BACKBONE_SCOPE))?;
        let dropout = Dropout::new(config.hidden_dropout_prob);
        let classifier =
            candle_nn::linear(config.hidden_size, config.num_labels, vb.pp("classifier"))?;
        Ok(Self {
            backbone,
            dropout,
            classifier,
        })
    }

    /// Returns `(logits, loss)` with logits shaped `(batch, num_labels)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        labels: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (_sequence_output, pooled) =
            self.backbone
                .forward(input_ids, token_type_ids, attention_mask, train)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        let logits = self.classifier.forward(&pooled)?;

        let loss = match labels {
            Some(labels) => Some(loss::cross_entropy(&logits, labels)?),
            None => None,
        };
        Ok((logits, loss))
    }
}

/// Per-token classification over the sequence representation.
#[derive(Debug)]
pub struct TokenClassification {
    backbone: Encoder,
    dropout: Dropout,
    classifier: Linear,
}

impl TokenClassification {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let backbone = Encoder::new(config, vb.pp(BACKBONE_SCOPE))?;
        let dropout = Dropout::new(config.hidden_dropout_prob);
        let classifier =
            candle_nn::linear(config.hidden_size, config.num_labels, vb.pp("classifier"))?;
        Ok(Self {
            backbone,
            dropout,
            classifier,
        })
    }

    /// Returns `(logits, loss)` with logits shaped
    /// `(batch, seq, num_labels)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        labels: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (sequence_output, _pooled) =
            self.backbone
                .forward(input_ids, token_type_ids, attention_mask, train)?;
        let sequence_output = self.dropout.forward(&sequence_output, train)?;
        let logits = self.classifier.forward(&sequence_output)?;

        let loss = match labels {
            Some(labels) => Some(cross_entropy_per_token(&logits, labels)?),
            None => None,
        };
        Ok((logits, loss))
    }
}

/// Multiple choice: inputs carry an extra choice axis, the backbone runs
/// once per `(example, choice)` pair, and one score per choice is read
/// off the pooled representation.
#[derive(Debug)]
pub struct MultipleChoice {
    backbone: Encoder,
    dropout: Dropout,
    classifier: Linear,
}

impl MultipleChoice {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let backbone = Encoder::new(config, vb.pp(BACKBONE_SCOPE))?;
        let dropout = Dropout::new(config.hidden_dropout_prob);
        let classifier = candle_nn::linear(config.hidden_size, 1, vb.pp("classifier"))?;
        Ok(Self {
            backbone,
            dropout,
            classifier,
        })
    }

    /// Core inputs are `(batch, choices, seq)`; the leading two axes are
    /// flattened for the backbone pass and restored on the logits.
    /// Returns `(logits, loss)` with logits shaped `(batch, choices)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        labels: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (batch, choices, seq) = input_ids.dims3()?;
        let flat_input_ids = input_ids.reshape((batch * choices, seq))?;
        let flat_token_type_ids = match token_type_ids {
            Some(ids) => Some(ids.reshape((batch * choices, seq))?),
            None => None,
        };
        let flat_attention_mask = match attention_mask {
            Some(mask) => Some(mask.reshape((batch * choices, seq))?),
            None => None,
        };

        let (_sequence_output, pooled) = self.backbone.forward(
            &flat_input_ids,
            flat_token_type_ids.as_ref(),
            flat_attention_mask.as_ref(),
            train,
        )?;
        let pooled = self.dropout.forward(&pooled, train)?;
        let scores = self.classifier.forward(&pooled)?;
        let logits = scores.reshape((batch, choices))?;

        let loss = match labels {
            Some(labels) => Some(loss::cross_entropy(&logits, labels)?),
            None => None,
        };
        Ok((logits, loss))
    }
}
