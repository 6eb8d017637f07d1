//! Bidirectional transformer encoder family: one shared backbone with
//! swappable task heads, built on Candle.

pub mod backbone;
pub mod config;
pub mod heads;
pub mod pretrained;

pub use backbone::Encoder;
pub use config::{Activation, EncoderConfig};
pub use heads::{
    MaskedLanguageModel, MultipleChoice, NextSequencePrediction, PretrainingModel,
    QuestionAnswering, SequenceClassification, TokenClassification,
};
pub use pretrained::{PretrainedError, PretrainedRegistry, PRETRAINED_MODELS};
