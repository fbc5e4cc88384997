use serde::{Deserialize, Serialize};

use crate::{Result, TtsError};

/// Sample rate of the NSF vocoder output.
pub const VOCODER_SAMPLE_RATE: u32 = 40_000;
/// Sample rate expected by the pitch and feature extractors.
pub const EXTRACTOR_SAMPLE_RATE: u32 = 16_000;
/// Analysis hop of the pitch tracker at `EXTRACTOR_SAMPLE_RATE` (10 ms).
pub const PITCH_HOP_LENGTH: usize = 160;
/// Waveform samples per mel frame of the acoustic model.
pub const ACOUSTIC_HOP_LENGTH: usize = 256;
/// Rate assumed by the real-time-factor metric. Cosmetic only.
pub const RTF_REFERENCE_RATE: f32 = 22_050.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub acoustic_model_path: String,
    pub vocoder_model_path: String,
    pub pitch_extractor_path: Option<String>,
    pub hubert_path: Option<String>,
    /// ODE steps baked into the acoustic export, when known.
    pub export_steps: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub steps: usize,
    pub temperature: f32,
    pub length_scale: f32,
    pub speaker_id: Option<i64>,
    /// Speaker slot of the NSF vocoder, independent of the acoustic speaker.
    pub vocoder_speaker_id: i64,
    pub semitone_shift: f32,
    pub default_f0_hz: f32,
    pub pitch_threshold: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            steps: 10,
            temperature: 0.667,
            length_scale: 1.0,
            speaker_id: None,
            vocoder_speaker_id: 0,
            semitone_shift: 0.0,
            default_f0_hz: 220.0,
            pitch_threshold: 0.03,
        }
    }
}

impl SynthesisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(TtsError::Config(
                "number of ODE steps must be greater than 0".to_string(),
            ));
        }
        if !(self.temperature >= 0.0) {
            return Err(TtsError::Config(
                "sampling temperature cannot be negative".to_string(),
            ));
        }
        if !(self.length_scale > 0.0) {
            return Err(TtsError::Config(
                "speaking rate must be greater than 0".to_string(),
            ));
        }
        if self.vocoder_speaker_id < 0 {
            return Err(TtsError::Config(format!(
                "vocoder speaker id must be non-negative, got {}",
                self.vocoder_speaker_id
            )));
        }
        if !(self.default_f0_hz >= 0.0) {
            return Err(TtsError::Config(format!(
                "default f0 must be non-negative, got {}",
                self.default_f0_hz
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VocoderConfig {
    pub device: String,
    pub sample_rate: u32,
    pub noise_seed: Option<u64>,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            sample_rate: VOCODER_SAMPLE_RATE,
            noise_seed: None,
        }
    }
}

/// Everything a run needs, as loaded from a JSON config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub synthesis: SynthesisConfig,
    pub vocoder: VocoderConfig,
}

/// Execution target for the inference sessions. Only the CPU is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionDevice {
    Cpu,
}

impl ExecutionDevice {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "cpu" => Ok(Self::Cpu),
            _ => Err(TtsError::UnsupportedDevice(name.to_string())),
        }
    }
}
