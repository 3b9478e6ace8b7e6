use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use visionwav_core::{
    signal, AnalysisConfig, AnalysisKind, CancellationToken, FilterbankCache, Pipeline,
    VisionWavError, Waveform,
};

fn main() -> visionwav_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze(args) => run_analyze(args),
        Commands::Tone {
            frequency,
            duration,
            sample_rate,
            output,
        } => run_tone(frequency, duration, sample_rate, &output),
    }
}

fn run_analyze(args: AnalyzeArgs) -> visionwav_core::Result<()> {
    let config = match &args.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };

    let samples = match (&args.input, args.tone) {
        (Some(path), None) => signal::downmix(&read_raw_f32(path)?, args.channels)?,
        (None, Some(frequency)) => signal::tone(frequency, args.sample_rate, args.duration),
        _ => {
            return Err(VisionWavError::invalid(
                "pass exactly one of --input or --tone",
            ))
        }
    };
    let waveform = Waveform::new(&samples, args.sample_rate)?;
    tracing::info!(
        samples = waveform.len(),
        sample_rate = waveform.sample_rate(),
        seconds = waveform.duration_seconds(),
        "loaded waveform"
    );

    let kinds = if args.kinds.is_empty() {
        AnalysisKind::ALL.to_vec()
    } else {
        args.kinds
    };
    let cancel = match args.timeout_ms {
        Some(ms) => CancellationToken::with_timeout(Duration::from_millis(ms)),
        None => CancellationToken::new(),
    };

    let cache = FilterbankCache::new();
    let pipeline = Pipeline::new(config, &cache)?;
    let analyses = pipeline.run_many(&kinds, waveform, &cancel)?;

    match &args.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer(&mut writer, &analyses)?;
            writer.flush()?;
            tracing::info!(?path, analyses = analyses.len(), "wrote analysis");
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            serde_json::to_writer_pretty(&mut writer, &analyses)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

fn run_tone(
    frequency: f32,
    duration: f32,
    sample_rate: u32,
    output: &Path,
) -> visionwav_core::Result<()> {
    if sample_rate == 0 {
        return Err(VisionWavError::invalid("sample rate must be positive"));
    }
    let samples = signal::tone(frequency, sample_rate, duration);
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    std::fs::write(output, bytes)?;
    tracing::info!(?output, frequency, samples = samples.len(), "wrote tone");
    Ok(())
}

/// Headerless little-endian `f32` PCM.
fn read_raw_f32(path: &Path) -> visionwav_core::Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    let chunks = bytes.chunks_exact(4);
    if !chunks.remainder().is_empty() {
        tracing::warn!(?path, trailing = chunks.remainder().len(), "ignoring partial sample");
    }
    Ok(chunks
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio feature extraction for visualisers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one or more analyses and emit them as JSON.
    Analyze(AnalyzeArgs),
    /// Write a raw f32 sine tone, handy as `analyze --input`.
    Tone {
        /// Frequency in Hz.
        frequency: f32,
        #[arg(short, long, default_value_t = 1.0)]
        duration: f32,
        #[arg(short, long, default_value_t = 22_050)]
        sample_rate: u32,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Analysis to run; repeat for several. Defaults to all of them.
    #[arg(short, long = "kind")]
    kinds: Vec<AnalysisKind>,
    /// Raw little-endian f32 PCM file.
    #[arg(short, long, conflicts_with = "tone")]
    input: Option<PathBuf>,
    /// Analyse a synthetic sine of this frequency instead of a file.
    #[arg(long)]
    tone: Option<f32>,
    /// Length of the synthetic tone in seconds.
    #[arg(long, default_value_t = 1.0)]
    duration: f32,
    #[arg(short, long, default_value_t = 22_050)]
    sample_rate: u32,
    /// Interleaved channels in the input file.
    #[arg(long, default_value_t = 1)]
    channels: usize,
    /// JSON analysis configuration; omitted fields keep their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Output file; JSON goes to stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}
