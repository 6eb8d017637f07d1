//! Drives every declared variant through one uniform invocation and
//! asserts the expected-shape contract on whatever comes back.

use std::path::Path;

use candle_core::{DType, Device, Result as TensorResult, Tensor};
use candle_nn::{VarBuilder, VarMap};
use thiserror::Error;

use encoder::{
    Encoder, EncoderConfig, MaskedLanguageModel, MultipleChoice, NextSequencePrediction,
    PretrainedError, PretrainedRegistry, PretrainingModel, QuestionAnswering,
    SequenceClassification, TokenClassification,
};

use crate::contract::{expected_shapes, label_roles, VariantKind};
use crate::synth::{HarnessConfig, InputBatch};

#[derive(Error, Debug)]
pub enum ConformanceError {
    #[error("{variant}: output `{output}` expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        variant: VariantKind,
        output: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{variant}: loss must be a scalar, got shape {shape:?}")]
    LossRank {
        variant: VariantKind,
        shape: Vec<usize>,
    },

    #[error("{variant}: declared output `{output}` missing from results")]
    MissingOutput {
        variant: VariantKind,
        output: &'static str,
    },

    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),

    #[error("pretrained load failed: {0}")]
    Pretrained(#[from] PretrainedError),
}

/// Named result mapping captured from one variant invocation. Entries
/// keep invocation order; `loss` is present only for labeled calls.
#[derive(Debug, Default)]
pub struct Outputs {
    entries: Vec<(&'static str, Tensor)>,
}

impl Outputs {
    fn push(&mut self, name: &'static str, tensor: Tensor) {
        self.entries.push((name, tensor));
    }

    fn push_loss(&mut self, loss: Option<Tensor>) {
        if let Some(loss) = loss {
            self.entries.push(("loss", loss));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, tensor)| tensor)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }
}

/// Replicates a `(batch, seq)` input across a new choice axis, yielding
/// `(batch, choices, seq)` with the sequence repeated per choice.
pub fn repeat_for_choices(tensor: &Tensor, choices: usize) -> TensorResult<Tensor> {
    let (batch, seq) = tensor.dims2()?;
    tensor
        .unsqueeze(1)?
        .broadcast_as((batch, choices, seq))?
        .contiguous()
}

fn repeat_optional(tensor: Option<&Tensor>, choices: usize) -> TensorResult<Option<Tensor>> {
    match tensor {
        Some(tensor) => Ok(Some(repeat_for_choices(tensor, choices)?)),
        None => Ok(None),
    }
}

/// Constructs one variant from `config` and invokes it with the batch's
/// core inputs plus the label roles its head consumes.
///
/// Output arity and naming per kind are fixed; the returned mapping uses
/// the same names as the expected-shape contract.
pub fn invoke_variant(
    kind: VariantKind,
    config: &EncoderConfig,
    vb: VarBuilder,
    batch: &InputBatch,
    train: bool,
) -> TensorResult<Outputs> {
    let input_ids = &batch.input_ids;
    let token_type_ids = batch.token_type_ids.as_ref();
    let attention_mask = batch.attention_mask.as_ref();

    let mut outputs = Outputs::default();
    match kind {
        VariantKind::Backbone => {
            let model = Encoder::new(config, vb)?;
            let (sequence_output, pooled_output) =
                model.forward(input_ids, token_type_ids, attention_mask, train)?;
            outputs.push("sequence_output", sequence_output);
            outputs.push("pooled_output", pooled_output);
        }
        VariantKind::MaskedLm => {
            let model = MaskedLanguageModel::new(config, vb)?;
            let (prediction_scores, loss) = model.forward(
                input_ids,
                token_type_ids,
                attention_mask,
                batch.token_labels.as_ref(),
                train,
            )?;
            outputs.push_loss(loss);
            outputs.push("prediction_scores", prediction_scores);
        }
        VariantKind::NextSequence => {
            let model = NextSequencePrediction::new(config, vb)?;
            let (score, loss) = model.forward(
                input_ids,
                token_type_ids,
                attention_mask,
                batch.sequence_labels.as_ref(),
                train,
            )?;
            outputs.push_loss(loss);
            outputs.push("seq_relationship_score", score);
        }
        VariantKind::Pretraining => {
            let model = PretrainingModel::new(config, vb)?;
            let (prediction_scores, seq_relationship_score, loss) = model.forward(
                input_ids,
                token_type_ids,
                attention_mask,
                batch.token_labels.as_ref(),
                batch.sequence_labels.as_ref(),
                train,
            )?;
            outputs.push_loss(loss);
            outputs.push("prediction_scores", prediction_scores);
            outputs.push("seq_relationship_score", seq_relationship_score);
        }
        VariantKind::QuestionAnswering => {
            let model = QuestionAnswering::new(config, vb)?;
            // both span ends come from the per-example label draw
            let positions = batch.sequence_labels.as_ref();
            let (start_logits, end_logits, loss) = model.forward(
                input_ids,
                token_type_ids,
                attention_mask,
                positions,
                positions,
                train,
            )?;
            outputs.push_loss(loss);
            outputs.push("start_logits", start_logits);
            outputs.push("end_logits", end_logits);
        }
        VariantKind::SequenceClassification => {
            let model = SequenceClassification::new(config, vb)?;
            let (logits, loss) = model.forward(
                input_ids,
                token_type_ids,
                attention_mask,
                batch.sequence_labels.as_ref(),
                train,
            )?;
            outputs.push_loss(loss);
            outputs.push("logits", logits);
        }
        VariantKind::TokenClassification => {
            let model = TokenClassification::new(config, vb)?;
            let (logits, loss) = model.forward(
                input_ids,
                token_type_ids,
                attention_mask,
                batch.token_labels.as_ref(),
                train,
            )?;
            outputs.push_loss(loss);
            outputs.push("logits", logits);
        }
        VariantKind::MultipleChoice => {
            let model = MultipleChoice::new(config, vb)?;
            let choices = config.num_choices;
            let choice_input_ids = repeat_for_choices(input_ids, choices)?;
            let choice_token_type_ids = repeat_optional(token_type_ids, choices)?;
            let choice_attention_mask = repeat_optional(attention_mask, choices)?;
            let (logits, loss) = model.forward(
                &choice_input_ids,
                choice_token_type_ids.as_ref(),
                choice_attention_mask.as_ref(),
                batch.choice_labels.as_ref(),
                train,
            )?;
            outputs.push_loss(loss);
            outputs.push("logits", logits);
        }
    }
    Ok(outputs)
}

/// Checks every declared variant against the expected-shape contract.
///
/// Each check is stateless start to finish: a fresh input draw, a fresh
/// configuration copy, freshly initialized parameters, one invocation in
/// evaluation mode, then the assertions. The first violation aborts the
/// sweep; nothing is aggregated or retried.
pub struct ConformanceRunner {
    harness: HarnessConfig,
    device: Device,
    registry: PretrainedRegistry,
}

impl ConformanceRunner {
    pub fn new(harness: HarnessConfig, device: Device, registry: PretrainedRegistry) -> Self {
        Self {
            harness,
            device,
            registry,
        }
    }

    pub fn harness(&self) -> &HarnessConfig {
        &self.harness
    }

    /// Configuration copy local to one check, with the label-space
    /// overrides the kind under test requires.
    fn config_for(&self, kind: VariantKind) -> EncoderConfig {
        let mut config = self.harness.encoder_config();
        match kind {
            VariantKind::SequenceClassification | VariantKind::TokenClassification => {
                config.num_labels = self.harness.num_labels;
            }
            VariantKind::MultipleChoice => {
                config.num_choices = self.harness.num_choices;
            }
            _ => {}
        }
        config
    }

    /// One independent conformance check for `kind`.
    pub fn check(&self, kind: VariantKind) -> Result<(), ConformanceError> {
        log::debug!("conformance check: {kind}");

        let batch = self.harness.draw(&self.device)?;
        let config = self.config_for(kind);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let outputs = invoke_variant(kind, &config, vb, &batch, false)?;

        for (output, expected) in expected_shapes(kind, &self.harness) {
            let tensor = outputs
                .get(output)
                .ok_or(ConformanceError::MissingOutput { variant: kind, output })?;
            let actual = tensor.dims().to_vec();
            if actual != expected {
                return Err(ConformanceError::ShapeMismatch {
                    variant: kind,
                    output,
                    expected,
                    actual,
                });
            }
        }

        let labeled = self.harness.use_labels && !label_roles(kind).is_empty();
        match outputs.get("loss") {
            Some(loss) => {
                if loss.rank() != 0 {
                    return Err(ConformanceError::LossRank {
                        variant: kind,
                        shape: loss.dims().to_vec(),
                    });
                }
            }
            None if labeled => {
                return Err(ConformanceError::MissingOutput {
                    variant: kind,
                    output: "loss",
                });
            }
            None => {}
        }

        Ok(())
    }

    /// Checks the whole family in declaration order, stopping at the
    /// first violation. Every variant sees its own independent input
    /// draw rather than a batch shared across the sweep.
    pub fn check_all(&self) -> Result<(), ConformanceError> {
        for kind in VariantKind::ALL {
            self.check(kind)?;
        }
        Ok(())
    }

    /// Loads the first registered checkpoint into `cache_dir` and
    /// verifies construction succeeds. Network-bound; callers gate this
    /// behind an opt-in marker and own the cache directory's lifetime.
    pub fn check_pretrained(&self, cache_dir: &Path) -> Result<(), ConformanceError> {
        for name in self.registry.names().take(1) {
            let model = self.registry.load(name, cache_dir, &self.device)?;
            model.config().validate()?;
        }
        Ok(())
    }
}
