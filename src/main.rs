//! sopa-rs CLI: interpret a trained soft-pattern classifier
//!
//! Reconstructs the trained model from its checkpoint, runs the
//! validation set through it batch by batch and writes one
//! leave-one-out ablation report line per document.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use candle_core::Device;
use clap::Parser;
use sopa_rs::{
    interpret_documents, parse_pattern_specs, read_docs, read_embeddings, read_labels,
    vocab_from_text, Hyperparams, Semiring, SoftPatternClassifier,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sopa-rs")]
#[command(about = "Soft-pattern classifier interpretation via leave-one-out ablation")]
#[command(version)]
struct Cli {
    /// Pattern bank specification: LEN-COUNT pairs joined by '_'
    #[arg(short, long, default_value = "5-50_4-50_3-50_2-50")]
    patterns: String,

    /// Validation data file (one whitespace-tokenized document per line)
    #[arg(long)]
    vd: PathBuf,

    /// Validation labels file (one integer label per line)
    #[arg(long)]
    vl: PathBuf,

    /// Pretrained embedding file (text format: word v1 v2 ...)
    #[arg(short, long)]
    embedding_file: PathBuf,

    /// Trained model checkpoint (safetensors)
    #[arg(long)]
    input_model: PathBuf,

    /// Output report file
    #[arg(short, long)]
    ofile: PathBuf,

    /// Batch size
    #[arg(short, long, default_value_t = 1)]
    batch_size: usize,

    /// Random seed, recorded for provenance (inference is deterministic)
    #[arg(short, long, default_value_t = 100)]
    seed: u64,

    /// Cap the number of validation instances
    #[arg(short, long)]
    num_instances: Option<usize>,

    /// MLP hidden dimension
    #[arg(short = 'd', long, default_value_t = 25)]
    mlp_hidden_dim: usize,

    /// Number of MLP hidden layers
    #[arg(short = 'y', long, default_value_t = 2)]
    num_mlp_layers: usize,

    /// Use the max-plus semiring
    #[arg(long)]
    maxplus: bool,

    /// Use the log-space max-times semiring
    #[arg(long)]
    maxtimes: bool,

    /// Run on CUDA if available
    #[arg(long)]
    gpu: bool,

    /// Encode tokens with an LSTM before pattern matching
    #[arg(long)]
    use_rnn: bool,

    /// LSTM hidden dimension
    #[arg(long, default_value_t = 100)]
    hidden_dim: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    println!("=== sopa-rs: soft-pattern interpretation ===");
    println!("Model:  {}", cli.input_model.display());
    println!("Data:   {}", cli.vd.display());
    println!("Output: {}", cli.ofile.display());

    info!("Random seed: {} (no component consumes randomness at inference)", cli.seed);

    let device = if cli.gpu {
        let device = Device::cuda_if_available(0)?;
        if device.is_cuda() {
            info!("Using CUDA device");
        } else {
            info!("CUDA not available, using CPU");
        }
        device
    } else {
        Device::Cpu
    };

    let specs = parse_pattern_specs(&cli.patterns)?;
    info!(
        "Pattern bank: {} families, {} patterns",
        specs.len(),
        specs.values().sum::<usize>()
    );

    let dev_vocab = vocab_from_text(&cli.vd)?;
    info!("Dev vocab size: {}", dev_vocab.len());

    let (vocab, embeddings, word_dim) = read_embeddings(&cli.embedding_file, &dev_vocab, &device)?;
    info!("Word dim: {}", word_dim);

    let docs = read_docs(&cli.vd, &vocab)?;
    let labels = read_labels(&cli.vl)?;
    let num_classes = labels.iter().collect::<BTreeSet<_>>().len();
    info!("num_classes: {}", num_classes);

    let mut data: Vec<_> = docs.into_iter().zip(labels).collect();
    if let Some(n) = cli.num_instances {
        data.truncate(n);
    }
    info!("Interpreting {} documents", data.len());

    let semiring = if cli.maxplus {
        Semiring::MaxPlus
    } else if cli.maxtimes {
        Semiring::LogSpaceMaxTimes
    } else {
        Semiring::Prob
    };

    let hparams = Hyperparams {
        mlp_hidden_dim: cli.mlp_hidden_dim,
        num_mlp_layers: cli.num_mlp_layers,
        num_classes,
        semiring,
        rnn_hidden_dim: cli.use_rnn.then_some(cli.hidden_dim),
    };

    let model =
        SoftPatternClassifier::load(specs, embeddings, &hparams, &cli.input_model, &device)?;

    interpret_documents(&model, cli.batch_size, &data, &cli.ofile)?;

    Ok(())
}
