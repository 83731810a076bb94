// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f32 intentional in scoring
#![allow(clippy::cast_possible_truncation)] // usize→u32 in index tensors
#![allow(clippy::many_single_char_names)] // b, t, n, l standard in math
#![allow(clippy::similar_names)] // related variables like `score`/`scores`
#![allow(clippy::module_name_repetitions)] // PatternSpecs in model.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive

//! sopa-rs: soft-pattern classifier interpretation
//!
//! Loads a trained soft-pattern text classifier and reports, for each
//! validation document, which learned patterns contributed most to the
//! classification decision, measured by a leave-one-out scoring
//! ablation.
//!
//! ## Architecture
//!
//! - `semiring`: algebras for aggregating match scores (max-plus,
//!   probability-sum, log-space max-times)
//! - `vocab`: validation vocabulary and pretrained word-vector loading
//! - `corpus`: document/label reading and padded batching
//! - `model`: SoftPatternClassifier (pattern matcher + MLP head) with
//!   safetensors checkpoint loading
//! - `interpret`: per-batch leave-one-out ablation, pattern ranking and
//!   report emission

pub mod corpus;
pub mod interpret;
pub mod model;
pub mod semiring;
pub mod vocab;

pub use corpus::{read_docs, read_labels, Batch, Document};
pub use interpret::interpret_documents;
pub use model::{parse_pattern_specs, Hyperparams, Mlp, PatternSpecs, SoftPatternClassifier};
pub use semiring::Semiring;
pub use vocab::{read_embeddings, vocab_from_text, Vocab, PAD_IDX, UNK_IDX};
