//! Validation corpus loading and batching
//!
//! Documents are whitespace-tokenized lines mapped to embedding indices;
//! labels are one integer per line. Batches pad documents to a common
//! length and carry a mask so padded positions never advance a pattern.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};

use crate::vocab::{Vocab, PAD_IDX};

/// A validation document: embedding indices plus the raw tokens kept for
/// report display.
#[derive(Debug, Clone)]
pub struct Document {
    pub indices: Vec<u32>,
    pub tokens: Vec<String>,
}

impl Document {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Read one document per line, mapping tokens through the vocabulary.
pub fn read_docs(path: impl AsRef<Path>, vocab: &Vocab) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open validation data {}", path.display()))?;

    let mut docs = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let indices = tokens.iter().map(|t| vocab.get(t)).collect();
        docs.push(Document { indices, tokens });
    }
    Ok(docs)
}

/// Read one integer gold label per line.
pub fn read_labels(path: impl AsRef<Path>) -> Result<Vec<usize>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open validation labels {}", path.display()))?;

    let mut labels = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let label = line
            .trim()
            .parse::<usize>()
            .with_context(|| format!("Bad label at line {}", lineno + 1))?;
        labels.push(label);
    }
    Ok(labels)
}

/// A fixed-size group of documents padded to a common length.
///
/// `indices` is (batch × max_len) u32, `mask` is (batch × max_len) u8 with
/// 1 at real token positions. Owned transiently per iteration.
#[derive(Debug)]
pub struct Batch {
    pub indices: Tensor,
    pub mask: Tensor,
    size: usize,
    max_len: usize,
}

impl Batch {
    /// Pad `docs` to the longest document and build the index/mask tensors
    /// on `device`.
    pub fn new(docs: &[&Document], device: &Device) -> Result<Self> {
        let size = docs.len();
        let max_len = docs.iter().map(|d| d.len()).max().unwrap_or(0).max(1);

        let mut indices = Vec::with_capacity(size * max_len);
        let mut mask = Vec::with_capacity(size * max_len);
        for doc in docs {
            indices.extend_from_slice(&doc.indices);
            indices.extend(std::iter::repeat(PAD_IDX).take(max_len - doc.len()));
            mask.extend(std::iter::repeat(1u8).take(doc.len()));
            mask.extend(std::iter::repeat(0u8).take(max_len - doc.len()));
        }

        Ok(Self {
            indices: Tensor::from_vec(indices, (size, max_len), device)?,
            mask: Tensor::from_vec(mask, (size, max_len), device)?,
            size,
            max_len,
        })
    }

    /// Number of documents in the batch.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Common padded length.
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
