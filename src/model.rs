//! Soft-pattern classifier: pattern matcher plus feed-forward head
//!
//! A pattern of span length L is a left-to-right weighted automaton over
//! states 0..=L. Consuming a token advances one state with a learned
//! transition score; intermediate states may self-loop. Scores are
//! combined by the configured semiring, a match may start at any
//! position, and the accept-state mass summed over positions is the
//! pattern's activation. Activations of all families, concatenated in
//! span-length order, feed a small MLP that produces the class logits.
//!
//! Parameters are read from a safetensors checkpoint through a
//! `VarBuilder`; a missing tensor or shape mismatch is fatal.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{linear, lstm, Embedding, LSTMConfig, Linear, VarBuilder, LSTM, RNN};
use tracing::info;

use crate::corpus::Batch;
use crate::semiring::Semiring;

/// Pattern bank: span length → number of patterns of that length,
/// ordered by span length.
pub type PatternSpecs = BTreeMap<usize, usize>;

/// Parse a pattern-bank specification string such as `"5-50_4-50_2-50"`.
///
/// Families are ordered by span length; a repeated span length keeps the
/// last count given.
pub fn parse_pattern_specs(s: &str) -> Result<PatternSpecs> {
    let mut specs = PatternSpecs::new();
    if s.trim().is_empty() {
        return Ok(specs);
    }
    for part in s.split('_') {
        let (len, count) = part
            .split_once('-')
            .with_context(|| format!("Bad pattern spec entry {part:?}, expected LEN-COUNT"))?;
        let len: usize = len
            .trim()
            .parse()
            .with_context(|| format!("Bad span length in pattern spec entry {part:?}"))?;
        let count: usize = count
            .trim()
            .parse()
            .with_context(|| format!("Bad pattern count in pattern spec entry {part:?}"))?;
        ensure!(len >= 1, "Pattern span length must be at least 1");
        specs.insert(len, count);
    }
    Ok(specs)
}

/// Model hyperparameters mirroring the ones used at training time.
///
/// The checkpoint is only loadable when these match the trained
/// architecture exactly.
#[derive(Debug, Clone)]
pub struct Hyperparams {
    pub mlp_hidden_dim: usize,
    pub num_mlp_layers: usize,
    pub num_classes: usize,
    pub semiring: Semiring,
    /// LSTM token encoder hidden dimension; `None` disables the encoder.
    pub rnn_hidden_dim: Option<usize>,
}

/// One family of patterns sharing a span length.
struct PatternFamily {
    span_len: usize,
    count: usize,
    /// Affine map token-vector → per-(pattern, state) advance score,
    /// pattern-major: row n·L+s.
    transition: Linear,
    /// Affine map for self-loops on intermediate states 1..L−1; absent
    /// for span length 1.
    self_loop: Option<Linear>,
}

impl PatternFamily {
    fn load(span_len: usize, count: usize, input_dim: usize, vb: VarBuilder) -> Result<Self> {
        let transition = linear(input_dim, count * span_len, vb.pp("transition"))?;
        let self_loop = if span_len > 1 {
            Some(linear(
                input_dim,
                count * (span_len - 1),
                vb.pp("self_loop"),
            )?)
        } else {
            None
        };
        Ok(Self {
            span_len,
            count,
            transition,
            self_loop,
        })
    }
}

/// Feed-forward classifier head: `num_layers` ReLU hidden layers followed
/// by a linear projection to the class logits.
pub struct Mlp {
    layers: Vec<Linear>,
    output: Linear,
}

impl Mlp {
    fn load(
        input_dim: usize,
        hidden_dim: usize,
        num_layers: usize,
        num_classes: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        let mut in_dim = input_dim;
        for i in 0..num_layers {
            layers.push(linear(in_dim, hidden_dim, vb.pp(format!("layers.{i}")))?);
            in_dim = hidden_dim;
        }
        let output = linear(in_dim, num_classes, vb.pp("output"))?;
        Ok(Self { layers, output })
    }

    /// Map a (batch × input_dim) score matrix to (batch × num_classes)
    /// logits.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.layers {
            xs = layer.forward(&xs)?.relu()?;
        }
        Ok(self.output.forward(&xs)?)
    }
}

/// Trained soft-pattern text classifier, inference only.
pub struct SoftPatternClassifier {
    specs: PatternSpecs,
    families: Vec<PatternFamily>,
    embeddings: Embedding,
    rnn: Option<LSTM>,
    mlp: Mlp,
    semiring: Semiring,
    total_patterns: usize,
    device: Device,
}

impl SoftPatternClassifier {
    /// Reconstruct the architecture and read its parameters from a
    /// safetensors checkpoint at `checkpoint`.
    pub fn load(
        specs: PatternSpecs,
        embeddings: Tensor,
        hparams: &Hyperparams,
        checkpoint: impl AsRef<Path>,
        device: &Device,
    ) -> Result<Self> {
        let checkpoint = checkpoint.as_ref();
        info!("Loading checkpoint from {}", checkpoint.display());
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[checkpoint], DType::F32, device)
                .with_context(|| format!("Failed to load checkpoint {}", checkpoint.display()))?
        };
        Self::from_varbuilder(specs, embeddings, hparams, vb, device)
    }

    /// Build the classifier with parameters drawn from `vb`.
    pub fn from_varbuilder(
        specs: PatternSpecs,
        embeddings: Tensor,
        hparams: &Hyperparams,
        vb: VarBuilder,
        device: &Device,
    ) -> Result<Self> {
        let (_vocab_len, word_dim) = embeddings.dims2()?;
        let embeddings = Embedding::new(embeddings, word_dim);

        let rnn = match hparams.rnn_hidden_dim {
            Some(hidden) => Some(
                lstm(word_dim, hidden, LSTMConfig::default(), vb.pp("rnn"))
                    .context("Failed to load LSTM encoder parameters")?,
            ),
            None => None,
        };
        let input_dim = hparams.rnn_hidden_dim.unwrap_or(word_dim);

        let mut families = Vec::with_capacity(specs.len());
        for (&span_len, &count) in &specs {
            let family = PatternFamily::load(
                span_len,
                count,
                input_dim,
                vb.pp(format!("patterns.len{span_len}")),
            )
            .with_context(|| format!("Failed to load pattern family of span length {span_len}"))?;
            families.push(family);
        }
        let total_patterns: usize = specs.values().sum();

        let mlp = Mlp::load(
            total_patterns,
            hparams.mlp_hidden_dim,
            hparams.num_mlp_layers,
            hparams.num_classes,
            vb.pp("mlp"),
        )
        .context("Failed to load MLP head parameters")?;

        info!(
            "Model: {} patterns in {} families, {} classes, {:?} semiring",
            total_patterns,
            families.len(),
            hparams.num_classes,
            hparams.semiring
        );

        Ok(Self {
            specs,
            families,
            embeddings,
            rnn,
            mlp,
            semiring: hparams.semiring,
            total_patterns,
            device: device.clone(),
        })
    }

    /// Full forward pass: class logits (B×C) and per-pattern activations
    /// (B×P).
    pub fn forward(&self, batch: &Batch) -> Result<(Tensor, Tensor)> {
        let scores = self.pattern_scores(batch)?;
        let logits = self.mlp.forward(&scores)?;
        Ok((logits, scores))
    }

    /// Head-only pass over an externally supplied (possibly ablated)
    /// score matrix, bypassing the pattern matcher.
    pub fn mlp_forward(&self, scores: &Tensor) -> Result<Tensor> {
        self.mlp.forward(scores)
    }

    /// Per-pattern activations for a batch, (B×P) in span-length order.
    pub fn pattern_scores(&self, batch: &Batch) -> Result<Tensor> {
        let batch_size = batch.size();
        let mut x = self.embeddings.forward(&batch.indices)?;
        if let Some(rnn) = &self.rnn {
            let states = rnn.seq(&x)?;
            x = rnn.states_to_tensor(&states)?;
        }

        if self.families.is_empty() {
            return Ok(Tensor::zeros((batch_size, 0), DType::F32, &self.device)?);
        }

        let mut family_scores = Vec::with_capacity(self.families.len());
        for family in &self.families {
            family_scores.push(self.family_scores(family, &x, batch)?);
        }
        Ok(Tensor::cat(&family_scores, 1)?)
    }

    /// Activations of one span-length family, (B × count).
    fn family_scores(&self, family: &PatternFamily, x: &Tensor, batch: &Batch) -> Result<Tensor> {
        let (b, t, _dim) = x.dims3()?;
        let (n, l) = (family.count, family.span_len);

        // per-token scores for every (pattern, state) pair, mapped into
        // the semiring domain up front
        let advance = self.semiring.encode(&family.transition.forward(x)?)?;
        let stay = match &family.self_loop {
            Some(self_loop) => Some(self.semiring.encode(&self_loop.forward(x)?)?),
            None => None,
        };

        // states[s] holds the (B × N) path mass currently in state s;
        // state 0 is permanently the semiring one so a match may start
        // at any position
        let mut states = Vec::with_capacity(l + 1);
        states.push(self.semiring.one((b, n), &self.device)?);
        for _ in 1..=l {
            states.push(self.semiring.zero((b, n), &self.device)?);
        }
        let mut acc = self.semiring.zero((b, n), &self.device)?;

        for pos in 0..t {
            let adv = advance.i((.., pos, ..))?.reshape((b, n, l))?;
            let sty = match &stay {
                Some(stay) => Some(stay.i((.., pos, ..))?.reshape((b, n, l - 1))?),
                None => None,
            };

            let mut new_states = Vec::with_capacity(l);
            for s in 1..=l {
                let advanced = self
                    .semiring
                    .times(&states[s - 1], &adv.i((.., .., s - 1))?)?;
                let value = match &sty {
                    Some(sty) if s < l => {
                        let stayed = self.semiring.times(&states[s], &sty.i((.., .., s - 1))?)?;
                        self.semiring.plus(&advanced, &stayed)?
                    }
                    _ => advanced,
                };
                new_states.push(value);
            }

            // padded positions neither advance states nor emit accepts
            let live = batch.mask.i((.., pos))?.reshape((b, 1))?.broadcast_as((b, n))?;
            for (s, value) in new_states.into_iter().enumerate() {
                states[s + 1] = live.where_cond(&value, &states[s + 1])?;
            }
            let accepted = self.semiring.plus(&acc, &states[l])?;
            acc = live.where_cond(&accepted, &acc)?;
        }

        Ok(acc)
    }

    /// Pattern bank specification this model was built from.
    pub fn pattern_specs(&self) -> &PatternSpecs {
        &self.specs
    }

    /// Total pattern count P across all families.
    pub fn total_patterns(&self) -> usize {
        self.total_patterns
    }

    /// Device the parameters live on; batches must be built on it too.
    pub fn device(&self) -> &Device {
        &self.device
    }
}
