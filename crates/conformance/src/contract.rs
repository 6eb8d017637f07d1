//! The expected-shape contract: for every variant kind, which named
//! outputs it must produce and how each output's shape derives from the
//! harness configuration. Pure data, no tensor math.

use std::fmt;

use crate::synth::HarnessConfig;

/// Every backbone+head combination the harness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Backbone,
    MaskedLm,
    NextSequence,
    Pretraining,
    QuestionAnswering,
    SequenceClassification,
    TokenClassification,
    MultipleChoice,
}

impl VariantKind {
    /// The declared family, in checking order.
    pub const ALL: [VariantKind; 8] = [
        VariantKind::Backbone,
        VariantKind::MaskedLm,
        VariantKind::NextSequence,
        VariantKind::Pretraining,
        VariantKind::QuestionAnswering,
        VariantKind::SequenceClassification,
        VariantKind::TokenClassification,
        VariantKind::MultipleChoice,
    ];
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariantKind::Backbone => "backbone",
            VariantKind::MaskedLm => "masked_lm",
            VariantKind::NextSequence => "next_sequence",
            VariantKind::Pretraining => "pretraining",
            VariantKind::QuestionAnswering => "question_answering",
            VariantKind::SequenceClassification => "sequence_classification",
            VariantKind::TokenClassification => "token_classification",
            VariantKind::MultipleChoice => "multiple_choice",
        };
        f.write_str(name)
    }
}

/// Label roles a variant's invocation consumes when labels are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelRole {
    /// One label per example, bounded by the sequence-label space.
    Sequence,
    /// One label per token, bounded by the classification label space.
    PerToken,
    /// Two per-example position labels (span start and end).
    SpanPositions,
    /// One label per example, bounded by the choice count.
    Choice,
}

/// Which label roles each variant kind consumes.
pub fn label_roles(kind: VariantKind) -> &'static [LabelRole] {
    match kind {
        VariantKind::Backbone => &[],
        VariantKind::MaskedLm => &[LabelRole::PerToken],
        VariantKind::NextSequence => &[LabelRole::Sequence],
        VariantKind::Pretraining => &[LabelRole::PerToken, LabelRole::Sequence],
        VariantKind::QuestionAnswering => &[LabelRole::SpanPositions],
        VariantKind::SequenceClassification => &[LabelRole::Sequence],
        VariantKind::TokenClassification => &[LabelRole::PerToken],
        VariantKind::MultipleChoice => &[LabelRole::Choice],
    }
}

/// Expected shape of every named, shape-bearing output of `kind`, as a
/// function of the harness configuration alone.
///
/// The `loss` output is deliberately absent from this table: its
/// contract is rank zero for every labeled invocation and is checked
/// separately by the runner.
pub fn expected_shapes(
    kind: VariantKind,
    harness: &HarnessConfig,
) -> Vec<(&'static str, Vec<usize>)> {
    let batch = harness.batch_size;
    let seq = harness.seq_length;
    match kind {
        VariantKind::Backbone => vec![
            ("sequence_output", vec![batch, seq, harness.hidden_size]),
            ("pooled_output", vec![batch, harness.hidden_size]),
        ],
        VariantKind::MaskedLm => vec![("prediction_scores", vec![batch, seq, harness.vocab_size])],
        VariantKind::NextSequence => vec![("seq_relationship_score", vec![batch, 2])],
        VariantKind::Pretraining => vec![
            ("prediction_scores", vec![batch, seq, harness.vocab_size]),
            ("seq_relationship_score", vec![batch, 2]),
        ],
        VariantKind::QuestionAnswering => vec![
            ("start_logits", vec![batch, seq]),
            ("end_logits", vec![batch, seq]),
        ],
        VariantKind::SequenceClassification => {
            vec![("logits", vec![batch, harness.num_labels])]
        }
        VariantKind::TokenClassification => {
            vec![("logits", vec![batch, seq, harness.num_labels])]
        }
        VariantKind::MultipleChoice => vec![("logits", vec![batch, harness.num_choices])],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_matches_reference_scenario() {
        // batch 13, seq 7, vocab 99, hidden 32, labels 3, choices 4
        let harness = HarnessConfig::default();

        assert_eq!(
            expected_shapes(VariantKind::Backbone, &harness),
            vec![
                ("sequence_output", vec![13, 7, 32]),
                ("pooled_output", vec![13, 32]),
            ]
        );
        assert_eq!(
            expected_shapes(VariantKind::MaskedLm, &harness),
            vec![("prediction_scores", vec![13, 7, 99])]
        );
        assert_eq!(
            expected_shapes(VariantKind::SequenceClassification, &harness),
            vec![("logits", vec![13, 3])]
        );
        assert_eq!(
            expected_shapes(VariantKind::MultipleChoice, &harness),
            vec![("logits", vec![13, 4])]
        );
    }

    #[test]
    fn every_kind_declares_at_least_one_output() {
        let harness = HarnessConfig::default();
        for kind in VariantKind::ALL {
            assert!(!expected_shapes(kind, &harness).is_empty(), "{kind}");
        }
    }

    #[test]
    fn only_the_backbone_is_unlabeled() {
        for kind in VariantKind::ALL {
            let labeled = !label_roles(kind).is_empty();
            assert_eq!(labeled, kind != VariantKind::Backbone, "{kind}");
        }
    }
}
