//! Command line front end: English text to 40 kHz speech through an NSF vocoder.

mod phonemizer;
mod presets;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use tts_audio::{load_wav_at, load_wav_mono, save_to_folder, utterance_base_name, write_wav_24bit};
use tts_core::{
    AcousticModel, AcousticOutput, AcousticRequest, FeatureEngine, PipelineConfig, PitchEngine,
    TtsError, EXTRACTOR_SAMPLE_RATE,
};
use tts_inference::{
    FeatureExtractor, NsfVocoderAdapter, OrtAcousticModel, OrtFeatureEngine, OrtPitchEngine,
    OrtVocoderEngine, PitchExtractor, SymbolEncoder, SynthesisOrchestrator, SynthesisRequest,
};

use crate::{
    phonemizer::{detect_phonemizer, Phonemizer, PhonemizerMode},
    presets::{resolve, ModelKind},
};

#[derive(Parser, Debug)]
#[command(name = "nsf-tts")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize speech from text
    Synth(SynthArgs),
    /// Resynthesize a recording through hidden-unit features and its own pitch
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct SharedArgs {
    /// NSF vocoder ONNX model
    #[arg(long)]
    vocoder: Option<PathBuf>,

    /// RMVPE pitch extractor ONNX model
    #[arg(long)]
    rmvpe: Option<PathBuf>,

    /// Pitch shift in semitones
    #[arg(long)]
    semitones: Option<f32>,

    /// Execution device (only cpu is available)
    #[arg(long)]
    device: Option<String>,

    /// Seed for the vocoder noise
    #[arg(long)]
    seed: Option<u64>,

    /// JSON pipeline config; command line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SynthArgs {
    /// Pretrained model family, selects speaking rate and speaker defaults
    #[arg(long, value_enum, default_value = "custom")]
    model: ModelKind,

    /// Acoustic model ONNX export
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,

    /// Text to synthesize
    #[arg(long)]
    text: Option<String>,

    /// File with one utterance per line
    #[arg(long)]
    file: Option<PathBuf>,

    /// Input text is already IPA; skip the phonemizer
    #[arg(long)]
    phonemes: bool,

    /// Phonemizer program for plain text
    #[arg(long, value_enum, default_value_t = PhonemizerMode::Auto)]
    phonemizer: PhonemizerMode,

    /// Speaker id
    #[arg(long)]
    spk: Option<i64>,

    /// Variance of the x0 noise
    #[arg(long)]
    temperature: Option<f32>,

    /// Higher is slower
    #[arg(long)]
    speaking_rate: Option<f32>,

    /// Number of ODE steps
    #[arg(long)]
    steps: Option<usize>,

    /// ODE steps the acoustic model was exported with
    #[arg(long)]
    export_steps: Option<usize>,

    /// Recording whose pitch replaces the flat default
    #[arg(long)]
    pitch_reference: Option<PathBuf>,

    /// Output folder
    #[arg(long, default_value = ".")]
    output_folder: PathBuf,

    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Input recording
    #[arg(long)]
    input: PathBuf,

    /// HuBERT feature extractor ONNX model
    #[arg(long)]
    hubert: Option<PathBuf>,

    /// Vocoder speaker slot
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    spk: i64,

    /// Output wav file
    #[arg(short, long, default_value = "converted.wav")]
    output: PathBuf,

    #[command(flatten)]
    shared: SharedArgs,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Synth(args) => synth(args),
        Commands::Convert(args) => convert(args),
    }
}

fn load_config(shared: &SharedArgs) -> Result<PipelineConfig> {
    let mut config = match &shared.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(path) = &shared.vocoder {
        config.model.vocoder_model_path = path.display().to_string();
    }
    if let Some(path) = &shared.rmvpe {
        config.model.pitch_extractor_path = Some(path.display().to_string());
    }
    if let Some(semitones) = shared.semitones {
        config.synthesis.semitone_shift = semitones;
    }
    if let Some(device) = &shared.device {
        config.vocoder.device = device.clone();
    }
    if shared.seed.is_some() {
        config.vocoder.noise_seed = shared.seed;
    }
    if config.model.vocoder_model_path.is_empty() {
        bail!("no vocoder model given; pass --vocoder or set model.vocoder_model_path");
    }
    Ok(config)
}

fn pitch_extractor(path: &str, config: &PipelineConfig) -> Result<PitchExtractor<Box<dyn PitchEngine>>> {
    let engine = OrtPitchEngine::load(Path::new(path), &config.vocoder.device)
        .with_context(|| format!("failed to load pitch extractor {path}"))?;
    Ok(PitchExtractor::new(Box::new(engine) as Box<dyn PitchEngine>)
        .with_threshold(config.synthesis.pitch_threshold))
}

fn read_texts(args: &SynthArgs) -> Result<Vec<String>> {
    if let Some(text) = &args.text {
        return Ok(vec![text.clone()]);
    }
    let Some(path) = &args.file else {
        bail!("either --text or --file must be provided");
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read text file {}", path.display()))?;
    let texts: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if texts.is_empty() {
        bail!("text file {} has no utterances", path.display());
    }
    Ok(texts)
}

/// IPA for one utterance; text passes through untouched without a phonemizer.
fn phonemes_for(text: &str, phonemizer: Option<&dyn Phonemizer>) -> Result<String> {
    match phonemizer {
        Some(phonemizer) => phonemizer
            .phonemize(text)
            .with_context(|| format!("{} could not phonemize {text:?}", phonemizer.name())),
        None => Ok(text.to_string()),
    }
}

/// Matches the speaker id to what the acoustic graph accepts.
fn speaker_for_model(multi_speaker: bool, speaker: Option<i64>) -> Option<i64> {
    match (multi_speaker, speaker) {
        (true, None) => {
            warn!("acoustic model is multi-speaker but no speaker id was given, using 0");
            Some(0)
        }
        (false, Some(spk)) => {
            warn!(spk, "acoustic model has a single speaker; ignoring speaker id");
            None
        }
        (_, speaker) => speaker,
    }
}

fn synth(args: SynthArgs) -> Result<()> {
    let texts = read_texts(&args)?;
    let mut config = load_config(&args.shared)?;
    let phonemizer = if args.phonemes {
        None
    } else {
        Some(detect_phonemizer(args.phonemizer)?)
    };

    if let Some(path) = &args.checkpoint_path {
        config.model.acoustic_model_path = path.display().to_string();
    }
    if config.model.acoustic_model_path.is_empty() {
        bail!("no acoustic model given; pass --checkpoint-path or set model.acoustic_model_path");
    }
    if let Some(temperature) = args.temperature {
        config.synthesis.temperature = temperature;
    }
    if let Some(steps) = args.steps {
        config.synthesis.steps = steps;
    }
    if args.export_steps.is_some() {
        config.model.export_steps = args.export_steps;
    }
    let speaker = args.spk.or(config.synthesis.speaker_id);
    let resolved = resolve(args.model, speaker, args.speaking_rate)?;
    config.synthesis.speaker_id = resolved.speaker;
    config.synthesis.length_scale = resolved.speaking_rate;
    config.synthesis.validate()?;
    info!(?config, "configuration");

    let mut acoustic = OrtAcousticModel::load(
        Path::new(&config.model.acoustic_model_path),
        &config.vocoder.device,
    )
    .context("failed to load acoustic model")?;
    if let Some(steps) = config.model.export_steps {
        acoustic = acoustic.with_export_steps(steps);
    }
    config.synthesis.speaker_id =
        speaker_for_model(acoustic.is_multi_speaker(), config.synthesis.speaker_id);
    let vocoder_engine = OrtVocoderEngine::load(
        Path::new(&config.model.vocoder_model_path),
        &config.vocoder.device,
    )
    .context("failed to load vocoder")?;
    let vocoder = NsfVocoderAdapter::new(vocoder_engine, &config.vocoder)?;
    let mut orchestrator = SynthesisOrchestrator::new(acoustic, vocoder, config.synthesis.clone())?;
    if let Some(path) = &config.model.pitch_extractor_path {
        orchestrator = orchestrator.with_pitch_extractor(pitch_extractor(path, &config)?);
    }

    let pitch_reference = match &args.pitch_reference {
        Some(path) => Some(load_wav_mono(path)?),
        None => None,
    };

    let encoder = SymbolEncoder::new();
    let mut acoustic_rtfs = Vec::with_capacity(texts.len());
    let mut total_rtfs = Vec::with_capacity(texts.len());
    for (i, text) in texts.iter().enumerate() {
        let index = i + 1;
        info!(index, %text, "input text");
        let phonemes = phonemes_for(text, phonemizer.as_deref())?;
        let token_ids = encoder
            .encode(&phonemes)
            .with_context(|| format!("utterance {index} has nothing to synthesize"))?;
        let phones: String = encoder.decode(&token_ids).chars().skip(1).step_by(2).collect();
        info!(index, %phones, "phonetised text");

        let mut request = SynthesisRequest::new(token_ids);
        if let Some(audio) = &pitch_reference {
            request = request.with_pitch_reference(audio.clone());
        }
        let output = orchestrator
            .synthesize(&request)
            .with_context(|| format!("failed to synthesize utterance {index}"))?;
        info!(index, "acoustic model RTF: {:.4}", output.acoustic_rtf);
        info!(index, "acoustic model + vocoder RTF: {:.4}", output.vocoder_rtf);
        acoustic_rtfs.push(output.acoustic_rtf);
        total_rtfs.push(output.vocoder_rtf);

        let base_name = utterance_base_name(index, config.synthesis.speaker_id);
        let location = save_to_folder(&base_name, &output, &args.output_folder)?;
        info!(index, path = %location.display(), "waveform saved");
    }

    let (mean, std) = mean_std(&acoustic_rtfs);
    info!("average acoustic model RTF: {mean:.4} ± {std:.4}");
    let (mean, std) = mean_std(&total_rtfs);
    info!("average acoustic model + vocoder RTF: {mean:.4} ± {std:.4}");
    Ok(())
}

/// Stands in for the acoustic stage when only resynthesizing recordings.
struct NoAcousticModel;

impl AcousticModel for NoAcousticModel {
    fn synthesise(&mut self, _request: &AcousticRequest) -> tts_core::Result<AcousticOutput> {
        Err(TtsError::Config(
            "no acoustic model is loaded for conversion".to_string(),
        ))
    }
}

fn convert(args: ConvertArgs) -> Result<()> {
    if args.spk < 0 {
        bail!("vocoder speaker id must be non-negative, got {}", args.spk);
    }
    let mut config = load_config(&args.shared)?;
    if let Some(path) = &args.hubert {
        config.model.hubert_path = Some(path.display().to_string());
    }
    let (Some(hubert), Some(rmvpe)) = (
        config.model.hubert_path.clone(),
        config.model.pitch_extractor_path.clone(),
    ) else {
        bail!("conversion needs both --hubert and --rmvpe");
    };
    let features = OrtFeatureEngine::load(Path::new(&hubert), &config.vocoder.device)
        .with_context(|| format!("failed to load feature extractor {hubert}"))?;
    let vocoder_engine = OrtVocoderEngine::load(
        Path::new(&config.model.vocoder_model_path),
        &config.vocoder.device,
    )
    .context("failed to load vocoder")?;
    let vocoder = NsfVocoderAdapter::new(vocoder_engine, &config.vocoder)?;
    let mut orchestrator =
        SynthesisOrchestrator::new(NoAcousticModel, vocoder, config.synthesis.clone())?
            .with_pitch_extractor(pitch_extractor(&rmvpe, &config)?)
            .with_feature_extractor(FeatureExtractor::new(Box::new(features) as Box<dyn FeatureEngine>));

    let audio = load_wav_at(&args.input, EXTRACTOR_SAMPLE_RATE)?;
    let output = orchestrator
        .convert(&audio, args.spk)
        .with_context(|| format!("failed to convert {}", args.input.display()))?;
    info!(frames = output.contour.frames(), "converted, RTF: {:.4}", output.rtf);

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    write_wav_24bit(&args.output, &output.pcm.to_vec(), output.sample_rate)?;
    info!(path = %args.output.display(), "waveform saved");
    Ok(())
}

/// Population mean and standard deviation.
fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var.sqrt())
}
