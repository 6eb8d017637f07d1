//! Configuration-driven conformance harness for the encoder model
//! family.
//!
//! The harness synthesizes randomized index inputs bounded by a shared
//! configuration, constructs each backbone+head variant from that
//! configuration, invokes it in evaluation mode, and asserts that every
//! declared output matches its expected shape and that any loss is a
//! scalar. Checks are stateless and fail-fast; see [`runner`] for the
//! protocol and [`contract`] for the shape tables.

pub mod contract;
pub mod runner;
pub mod synth;

pub use contract::{expected_shapes, label_roles, LabelRole, VariantKind};
pub use runner::{invoke_variant, repeat_for_choices, ConformanceError, ConformanceRunner, Outputs};
pub use synth::{ids_tensor, HarnessConfig, InputBatch};
