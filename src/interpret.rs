//! Interpretation driver: leave-one-out pattern ablation reports
//!
//! For every validation document, reports the patterns whose removal
//! would shrink the log-probability margin of the predicted class the
//! most, alongside the highest-activation patterns, one formatted line
//! per document.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use candle_core::{Tensor, D};
use candle_nn::ops::log_softmax;
use ndarray::Array2;
use tracing::{debug, info};

use crate::corpus::{Batch, Document};
use crate::model::SoftPatternClassifier;

/// Ranked-list length per report line.
const TOP_K: usize = 10;

/// Run the per-batch ablation analysis over the whole validation set and
/// write one report line per document, in input order, to `ofile`.
///
/// Any I/O or model failure aborts the run; there is no partial-batch
/// recovery.
pub fn interpret_documents(
    model: &SoftPatternClassifier,
    batch_size: usize,
    data: &[(Document, usize)],
    ofile: impl AsRef<Path>,
) -> Result<()> {
    ensure!(batch_size >= 1, "Batch size must be at least 1");
    let ofile = ofile.as_ref();
    let file = File::create(ofile)
        .with_context(|| format!("Failed to create report file {}", ofile.display()))?;
    let mut out = BufWriter::new(file);

    let mut written = 0usize;
    for (batch_idx, chunk) in data.chunks(batch_size).enumerate() {
        let docs: Vec<&Document> = chunk.iter().map(|(doc, _)| doc).collect();
        let batch = Batch::new(&docs, model.device())?;

        let (logits, scores) = model.forward(&batch)?;
        debug!("batch {}: pattern score matrix {:?}", batch_idx, scores.dims());

        let output = log_softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;
        let predictions: Vec<usize> = output.iter().map(|row| argmax(row)).collect();
        let scores_data = scores.to_vec2::<f32>()?;

        let diffs = margin_drops(model, &scores_data, &output, &predictions)?;

        for (k, (doc, gold)) in chunk.iter().enumerate() {
            let pred = predictions[k];
            let other = usize::from(pred == 0);
            let deltas: Vec<f32> = diffs.column(k).iter().copied().collect();
            let line = render_line(
                *gold,
                pred,
                &doc.tokens,
                output[k][pred],
                output[k][other],
                &top_k(&deltas, TOP_K),
                &top_k(&scores_data[k], TOP_K),
            );
            writeln!(out, "{line}")?;
            written += 1;
        }
    }

    out.flush()?;
    info!("Wrote {} report lines to {}", written, ofile.display());
    Ok(())
}

/// Leave-one-out margin drops, (P × B): zero pattern p's score for every
/// document, re-run the MLP head, and measure how much the margin between
/// the predicted class and the binary alternative shrank.
fn margin_drops(
    model: &SoftPatternClassifier,
    scores_data: &[Vec<f32>],
    output: &[Vec<f32>],
    predictions: &[usize],
) -> Result<Array2<f32>> {
    let batch_size = scores_data.len();
    let num_patts = scores_data.first().map_or(0, Vec::len);
    let mut diffs = Array2::<f32>::zeros((num_patts, batch_size));

    for p in 0..num_patts {
        let mut ablated: Vec<f32> = Vec::with_capacity(batch_size * num_patts);
        for row in scores_data {
            ablated.extend_from_slice(row);
            let last = ablated.len() - num_patts;
            ablated[last + p] = 0.0;
        }
        let ablated = Tensor::from_vec(ablated, (batch_size, num_patts), model.device())?;
        let forwarded = log_softmax(&model.mlp_forward(&ablated)?, D::Minus1)?.to_vec2::<f32>()?;

        for k in 0..batch_size {
            let pred = predictions[k];
            // binary margin: the alternative is hard-coded as 1 - predicted
            let other = usize::from(pred == 0);
            diffs[[p, k]] =
                output[k][pred] - output[k][other] - forwarded[k][pred] + forwarded[k][other];
        }
    }

    Ok(diffs)
}

/// Index of the first maximal element.
fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// The `k` largest values with their original indices, descending, ties
/// kept in enumeration order.
fn top_k(values: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);
    ranked
}

/// One full report line for a document.
#[allow(clippy::too_many_arguments)]
fn render_line(
    gold: usize,
    pred: usize,
    tokens: &[String],
    logprob_pred: f32,
    logprob_other: f32,
    top_deltas: &[(usize, f32)],
    top_scores: &[(usize, f32)],
) -> String {
    format!(
        "{}   {}   {} All in, predicted: {}   All in, other: {}    Leave one out: {}  Patt scores: {}",
        gold,
        pred,
        escape_bytes(&tokens.join(" ")),
        format_score(logprob_pred),
        format_score(logprob_other),
        join_ranked(top_deltas),
        join_ranked(top_scores),
    )
}

fn join_ranked(ranked: &[(usize, f32)]) -> String {
    ranked
        .iter()
        .map(|(idx, value)| format!("{}:{}", idx, format_score(*value)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a score to 3 decimal places with comma thousands separators.
fn format_score(value: f32) -> String {
    if !value.is_finite() {
        return format!("{value}");
    }
    let fixed = format!("{value:.3}");
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (int_part, frac_part) = digits
        .split_once('.')
        .unwrap_or((digits, ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{sign}{grouped}.{frac_part}")
}

/// Render text as its escaped UTF-8 byte sequence: printable ASCII
/// verbatim, short escapes for backslash, quote, tab, newline and
/// carriage return, `\xHH` for everything else.
fn escape_bytes(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'\\' => escaped.push_str("\\\\"),
            b'\'' => escaped.push_str("\\'"),
            b'\t' => escaped.push_str("\\t"),
            b'\n' => escaped.push_str("\\n"),
            b'\r' => escaped.push_str("\\r"),
            0x20..=0x7e => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\x{byte:02x}")),
        }
    }
    escaped
}
