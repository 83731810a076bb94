//! Vocabulary construction and pretrained word-vector loading
//!
//! The vocabulary is built from the validation corpus, then the embedding
//! table is read from a GloVe/word2vec-style text file, keeping only the
//! words the corpus actually uses. Index 0 is padding and index 1 is the
//! unknown token; both map to zero vectors.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use tracing::{debug, info};

/// Padding token index.
pub const PAD_IDX: u32 = 0;
/// Unknown-word token index.
pub const UNK_IDX: u32 = 1;

/// Word-to-index table over the retained embedding rows.
#[derive(Debug, Clone)]
pub struct Vocab {
    index: HashMap<String, u32>,
}

impl Vocab {
    /// Look up a word, falling back to the unknown index.
    pub fn get(&self, word: &str) -> u32 {
        self.index.get(word).copied().unwrap_or(UNK_IDX)
    }

    /// Number of entries, including the padding and unknown slots.
    pub fn len(&self) -> usize {
        self.index.len() + 2
    }

    /// True when no corpus word matched the embedding file.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Collect the set of distinct tokens appearing in a validation file.
pub fn vocab_from_text(path: impl AsRef<Path>) -> Result<HashSet<String>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open validation data {}", path.display()))?;

    let mut words = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        for token in line.split_whitespace() {
            if !words.contains(token) {
                words.insert(token.to_string());
            }
        }
    }
    Ok(words)
}

/// Read word vectors from a text embedding file, retaining only words in
/// `keep`.
///
/// Each line is `word v1 v2 ... vD`; the dimension is inferred from the
/// first line. Returns the vocabulary, the (vocab_len × dim) embedding
/// table on `device`, and the dimension.
pub fn read_embeddings(
    path: impl AsRef<Path>,
    keep: &HashSet<String>,
    device: &Device,
) -> Result<(Vocab, Tensor, usize)> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open embedding file {}", path.display()))?;

    let mut dim: Option<usize> = None;
    let mut index = HashMap::new();
    let mut data: Vec<f32> = Vec::new();
    let mut next_idx = UNK_IDX + 1;

    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(word) = fields.next() else {
            continue;
        };

        let vector: Vec<f32> = fields
            .map(str::parse)
            .collect::<Result<_, _>>()
            .with_context(|| format!("Bad embedding vector at line {}", lineno + 1))?;

        match dim {
            None => {
                if vector.is_empty() {
                    bail!("Embedding file {} has no vector values", path.display());
                }
                dim = Some(vector.len());
                // reserve the padding and unknown rows now that the width is known
                data.extend(std::iter::repeat(0.0).take(2 * vector.len()));
            }
            Some(d) if d != vector.len() => {
                bail!(
                    "Inconsistent embedding dimension at line {}: expected {}, got {}",
                    lineno + 1,
                    d,
                    vector.len()
                );
            }
            Some(_) => {}
        }

        if !keep.contains(word) {
            continue;
        }
        index.insert(word.to_string(), next_idx);
        next_idx += 1;
        data.extend(vector);
    }

    let Some(dim) = dim else {
        bail!("Embedding file {} is empty", path.display());
    };

    let rows = index.len() + 2;
    let embeddings = Tensor::from_vec(data, (rows, dim), device)?;
    info!("Embeddings: {} words kept, dim {}", index.len(), dim);
    debug!("Embedding table shape: {:?}", embeddings.dims());

    Ok((Vocab { index }, embeddings, dim))
}
