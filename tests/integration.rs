//! Integration tests for sopa-rs
//!
//! Exercise the full pipeline against synthetic checkpoints: vocabulary
//! and embedding loading, document reading, model reconstruction and the
//! leave-one-out report itself.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use candle_core::{safetensors, DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sopa_rs::{
    interpret_documents, parse_pattern_specs, read_docs, read_embeddings, read_labels,
    vocab_from_text, Hyperparams, Semiring, SoftPatternClassifier,
};
use tempfile::TempDir;

const WORD_DIM: usize = 4;

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, "{content}").unwrap();
    path
}

fn write_embedding_file(dir: &TempDir) -> PathBuf {
    write_file(
        dir,
        "vectors.txt",
        "cat 0.1 -0.2 0.3 0.4\n\
         dog -0.4 0.3 0.2 -0.1\n\
         bird 0.2 0.2 -0.3 0.1\n\
         fish -0.1 0.4 0.1 -0.3\n",
    )
}

fn rand_vec(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen::<f32>() - 0.5).collect()
}

/// Checkpoint for a "2-3" pattern bank, one hidden MLP layer of 5 units
/// and two classes. Zero weights when `seed` is None, seeded uniform
/// otherwise.
fn write_checkpoint(dir: &TempDir, seed: Option<u64>) -> PathBuf {
    let device = Device::Cpu;
    let shapes: Vec<(&str, Vec<usize>)> = vec![
        ("patterns.len2.transition.weight", vec![6, WORD_DIM]),
        ("patterns.len2.transition.bias", vec![6]),
        ("patterns.len2.self_loop.weight", vec![3, WORD_DIM]),
        ("patterns.len2.self_loop.bias", vec![3]),
        ("mlp.layers.0.weight", vec![5, 3]),
        ("mlp.layers.0.bias", vec![5]),
        ("mlp.output.weight", vec![2, 5]),
        ("mlp.output.bias", vec![2]),
    ];

    let mut rng = seed.map(StdRng::seed_from_u64);
    let mut tensors = HashMap::new();
    for (name, shape) in shapes {
        let n: usize = shape.iter().product();
        let data = match rng.as_mut() {
            Some(rng) => rand_vec(rng, n),
            None => vec![0.0; n],
        };
        tensors.insert(
            name.to_string(),
            Tensor::from_vec(data, shape, &device).unwrap(),
        );
    }

    let path = dir.path().join("model.safetensors");
    safetensors::save(&tensors, &path).unwrap();
    path
}

fn hparams(semiring: Semiring) -> Hyperparams {
    Hyperparams {
        mlp_hidden_dim: 5,
        num_mlp_layers: 1,
        num_classes: 2,
        semiring,
        rnn_hidden_dim: None,
    }
}

/// Mirror the CLI wiring: read everything from files, load the model and
/// write the report.
fn run_report(
    dir: &TempDir,
    vd: &Path,
    vl: &Path,
    checkpoint: &Path,
    batch_size: usize,
    semiring: Semiring,
    report_name: &str,
) -> String {
    let device = Device::Cpu;
    let dev_vocab = vocab_from_text(vd).unwrap();
    let embedding_file = write_embedding_file(dir);
    let (vocab, embeddings, _) = read_embeddings(&embedding_file, &dev_vocab, &device).unwrap();

    let docs = read_docs(vd, &vocab).unwrap();
    let labels = read_labels(vl).unwrap();
    let num_classes = labels.iter().collect::<BTreeSet<_>>().len();
    assert_eq!(num_classes, 2);
    let data: Vec<_> = docs.into_iter().zip(labels).collect();

    let specs = parse_pattern_specs("2-3").unwrap();
    let model =
        SoftPatternClassifier::load(specs, embeddings, &hparams(semiring), checkpoint, &device)
            .unwrap();

    let report = dir.path().join(report_name);
    interpret_documents(&model, batch_size, &data, &report).unwrap();
    std::fs::read_to_string(&report).unwrap()
}

/// Parse an `idx:value idx:value ...` ranked list out of a report line.
fn ranked_entries(line: &str, field: &str) -> Vec<(usize, f32)> {
    let start = line.find(field).unwrap() + field.len();
    let rest = &line[start..];
    let section = match rest.find("  Patt scores:") {
        Some(end) => &rest[..end],
        None => rest,
    };
    section
        .split_whitespace()
        .map(|entry| {
            let (idx, value) = entry.split_once(':').unwrap();
            (
                idx.parse().unwrap(),
                value.replace(',', "").parse().unwrap(),
            )
        })
        .collect()
}

fn assert_descending(entries: &[(usize, f32)]) {
    for pair in entries.windows(2) {
        assert!(pair[0].1 >= pair[1].1, "not descending: {pair:?}");
    }
}

#[test]
fn test_end_to_end_report_structure() {
    let dir = TempDir::new().unwrap();
    let vd = write_file(&dir, "dev.txt", "cat dog bird\ndog fish\n");
    let vl = write_file(&dir, "dev.labels", "1\n0\n");
    let checkpoint = write_checkpoint(&dir, Some(7));

    // 2 documents, P=3, batch_size=2: one combined batch, two lines
    let report = run_report(
        &dir,
        &vd,
        &vl,
        &checkpoint,
        2,
        Semiring::MaxPlus,
        "report.txt",
    );
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 2);

    for (line, gold) in lines.iter().zip(["1", "0"]) {
        let mut fields = line.split_whitespace();
        assert_eq!(fields.next().unwrap(), gold);
        let pred: usize = fields.next().unwrap().parse().unwrap();
        assert!(pred < 2);

        assert!(line.contains("All in, predicted: "));
        assert!(line.contains("All in, other: "));

        let deltas = ranked_entries(line, "Leave one out:");
        let scores = ranked_entries(line, "Patt scores:");
        assert_eq!(deltas.len(), 3);
        assert_eq!(scores.len(), 3);
        assert_descending(&deltas);
        assert_descending(&scores);

        // indices are zero-based positions into the pattern bank
        let idxs: BTreeSet<usize> = deltas.iter().map(|(i, _)| *i).collect();
        assert_eq!(idxs, BTreeSet::from([0, 1, 2]));
    }

    assert!(report.lines().next().unwrap().contains("cat dog bird"));
}

#[test]
fn test_zero_scores_give_zero_deltas() {
    // all-zero weights make every pattern score 0 under max-plus, and
    // ablating an already-zero score must not move the margin at all
    let dir = TempDir::new().unwrap();
    let vd = write_file(&dir, "dev.txt", "cat dog\nbird fish cat\n");
    let vl = write_file(&dir, "dev.labels", "0\n1\n");
    let checkpoint = write_checkpoint(&dir, None);

    let report = run_report(
        &dir,
        &vd,
        &vl,
        &checkpoint,
        2,
        Semiring::MaxPlus,
        "report.txt",
    );
    for line in report.lines() {
        assert!(line.contains("Leave one out: 0:0.000 1:0.000 2:0.000"));
        assert!(line.contains("Patt scores: 0:0.000 1:0.000 2:0.000"));
    }
}

#[test]
fn test_line_count_matches_documents_in_order() {
    let dir = TempDir::new().unwrap();
    let vd = write_file(
        &dir,
        "dev.txt",
        "cat dog\ndog bird\nbird cat fish\nfish dog\ncat cat\n",
    );
    let vl = write_file(&dir, "dev.labels", "0\n1\n1\n0\n1\n");
    let checkpoint = write_checkpoint(&dir, Some(11));

    // batch size does not divide the corpus evenly; the tail batch is
    // smaller but still reported
    let report = run_report(&dir, &vd, &vl, &checkpoint, 2, Semiring::Prob, "report.txt");
    let golds: Vec<&str> = report
        .lines()
        .map(|l| l.split_whitespace().next().unwrap())
        .collect();
    assert_eq!(golds, vec!["0", "1", "1", "0", "1"]);
}

#[test]
fn test_report_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let vd = write_file(&dir, "dev.txt", "cat dog bird\ndog fish\n");
    let vl = write_file(&dir, "dev.labels", "1\n0\n");
    let checkpoint = write_checkpoint(&dir, Some(3));

    let first = run_report(&dir, &vd, &vl, &checkpoint, 1, Semiring::Prob, "a.txt");
    let second = run_report(&dir, &vd, &vl, &checkpoint, 1, Semiring::Prob, "b.txt");
    assert_eq!(first, second);
}

#[test]
fn test_batching_does_not_change_line_count() {
    let dir = TempDir::new().unwrap();
    let vd = write_file(&dir, "dev.txt", "cat dog\ndog bird\nbird cat\n");
    let vl = write_file(&dir, "dev.labels", "0\n1\n0\n");
    let checkpoint = write_checkpoint(&dir, Some(5));

    for (batch_size, name) in [(1, "b1.txt"), (3, "b3.txt")] {
        let report = run_report(
            &dir,
            &vd,
            &vl,
            &checkpoint,
            batch_size,
            Semiring::MaxPlus,
            name,
        );
        assert_eq!(report.lines().count(), 3);
    }
}

#[test]
fn test_unmatchable_span_formats_thousands() {
    // a one-token document can never complete a span-2 pattern, so its
    // activation stays at the finite floor and the report carries
    // comma-grouped magnitudes
    let dir = TempDir::new().unwrap();
    let vd = write_file(&dir, "dev.txt", "cat\ncat dog\n");
    let vl = write_file(&dir, "dev.labels", "0\n1\n");
    let checkpoint = write_checkpoint(&dir, Some(9));

    let report = run_report(
        &dir,
        &vd,
        &vl,
        &checkpoint,
        2,
        Semiring::MaxPlus,
        "report.txt",
    );
    let first = report.lines().next().unwrap();
    let scores = ranked_entries(first, "Patt scores:");
    assert!(scores.iter().all(|(_, v)| *v <= -999_000_000.0));
    assert!(first.contains("-1,000,000,000.000"));
}

#[test]
fn test_checkpoint_shape_mismatch_is_fatal() {
    let dir = TempDir::new().unwrap();
    let device = Device::Cpu;
    let checkpoint = write_checkpoint(&dir, Some(1));

    // architecture asks for 4 patterns per family, checkpoint has 3
    let specs = parse_pattern_specs("2-4").unwrap();
    let embeddings = Tensor::zeros((4, WORD_DIM), DType::F32, &device).unwrap();
    let result = SoftPatternClassifier::load(
        specs,
        embeddings,
        &hparams(Semiring::MaxPlus),
        &checkpoint,
        &device,
    );
    assert!(result.is_err());
}

#[test]
fn test_missing_checkpoint_is_fatal() {
    let dir = TempDir::new().unwrap();
    let device = Device::Cpu;
    let specs = parse_pattern_specs("2-3").unwrap();
    let embeddings = Tensor::zeros((4, WORD_DIM), DType::F32, &device).unwrap();
    let result = SoftPatternClassifier::load(
        specs,
        embeddings,
        &hparams(Semiring::MaxPlus),
        dir.path().join("missing.safetensors"),
        &device,
    );
    assert!(result.is_err());
}
