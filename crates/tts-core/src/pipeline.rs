use ndarray::{Array1, Array2, Array3};

use crate::{Result, SynthesisConfig, TtsError};

/// Mono floating-point audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// One utterance worth of acoustic model input (batch of one).
#[derive(Debug, Clone)]
pub struct AcousticRequest {
    /// `[1, N]` symbol ids.
    pub token_ids: Array2<i64>,
    /// `[1]`, equal to `N`.
    pub token_lengths: Array1<i64>,
    pub steps: usize,
    pub temperature: f32,
    pub speaker_id: Option<i64>,
    pub length_scale: f32,
}

impl AcousticRequest {
    pub fn new(tokens: &[i64], config: &SynthesisConfig) -> Result<Self> {
        if tokens.is_empty() {
            return Err(TtsError::EmptyInput(
                "token sequence has no symbols".to_string(),
            ));
        }
        let token_ids = Array2::from_shape_vec((1, tokens.len()), tokens.to_vec())
            .map_err(|e| TtsError::Shape(format!("failed to shape tokens as [1, N]: {e}")))?;
        Ok(Self {
            token_ids,
            token_lengths: Array1::from_vec(vec![tokens.len() as i64]),
            steps: config.steps,
            temperature: config.temperature,
            speaker_id: config.speaker_id,
            length_scale: config.length_scale,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AcousticOutput {
    /// `[1, channels, frames]`.
    pub mel: Array3<f32>,
    pub mel_lengths: Array1<i64>,
    pub rtf: f32,
}

/// Raw pitch engine output. `voiced` is reported but not consumed downstream.
#[derive(Debug, Clone, Default)]
pub struct PitchEstimate {
    pub f0: Vec<f32>,
    pub voiced: Vec<bool>,
}

/// Quantized pitch code and the F0 track it was derived from, frame aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchContour {
    pub coarse: Array1<i64>,
    pub pitchf: Array1<f32>,
}

impl PitchContour {
    pub fn frames(&self) -> usize {
        self.pitchf.len()
    }
}

/// The six NSF vocoder inputs, in the order the model declares them.
#[derive(Debug, Clone)]
pub struct NsfInputs {
    /// f32 `[1, T, D]`.
    pub hidden: Array3<f32>,
    /// i64 `[1]`.
    pub hidden_length: Array1<i64>,
    /// i64 `[1, T]`.
    pub pitch: Array2<i64>,
    /// f32 `[1, T]`.
    pub pitchf: Array2<f32>,
    /// i64 `[1]`.
    pub speaker: Array1<i64>,
    /// f32 `[1, 192, T]`.
    pub noise: Array3<f32>,
}

#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// `[1, channels, frames]`, cropped to the reported mel length.
    pub mel: Array3<f32>,
    pub pcm: Array1<i16>,
    pub sample_rate: u32,
    /// As reported by the acoustic model.
    pub acoustic_rtf: f32,
    /// Acoustic model plus vocoder, wall clock over the produced samples.
    pub vocoder_rtf: f32,
}

impl SynthesisOutput {
    pub fn duration_secs(&self) -> f32 {
        self.pcm.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Text (symbol ids) to mel-spectrogram.
pub trait AcousticModel {
    fn synthesise(&mut self, request: &AcousticRequest) -> Result<AcousticOutput>;
}

/// Raw audio to per-frame F0.
pub trait PitchEngine {
    fn name(&self) -> &str;

    fn estimate(&mut self, audio: &[f32], threshold: f32) -> Result<PitchEstimate>;
}

/// `[1, 1, N]` audio to `[1, depth, frames]` hidden units.
pub trait FeatureEngine {
    fn encode(&mut self, audio: Array3<f32>) -> Result<Array3<f32>>;
}

/// NSF inputs to a floating waveform in roughly `[-1, 1]`.
pub trait VocoderEngine {
    fn decode(&mut self, inputs: &NsfInputs) -> Result<Vec<f32>>;
}

impl<T: AcousticModel + ?Sized> AcousticModel for Box<T> {
    fn synthesise(&mut self, request: &AcousticRequest) -> Result<AcousticOutput> {
        (**self).synthesise(request)
    }
}

impl<T: PitchEngine + ?Sized> PitchEngine for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn estimate(&mut self, audio: &[f32], threshold: f32) -> Result<PitchEstimate> {
        (**self).estimate(audio, threshold)
    }
}

impl<T: FeatureEngine + ?Sized> FeatureEngine for Box<T> {
    fn encode(&mut self, audio: Array3<f32>) -> Result<Array3<f32>> {
        (**self).encode(audio)
    }
}

impl<T: VocoderEngine + ?Sized> VocoderEngine for Box<T> {
    fn decode(&mut self, inputs: &NsfInputs) -> Result<Vec<f32>> {
        (**self).decode(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acoustic_request_is_batch_of_one() {
        let cfg = SynthesisConfig {
            speaker_id: Some(3),
            ..SynthesisConfig::default()
        };
        let req = AcousticRequest::new(&[0, 12, 0, 40, 0], &cfg).unwrap();
        assert_eq!(req.token_ids.shape(), &[1, 5]);
        assert_eq!(req.token_lengths[0], 5);
        assert_eq!(req.speaker_id, Some(3));
        assert_eq!(req.steps, 10);
    }

    #[test]
    fn empty_tokens_are_rejected() {
        let err = AcousticRequest::new(&[], &SynthesisConfig::default()).unwrap_err();
        assert!(matches!(err, TtsError::EmptyInput(_)));
    }

    #[test]
    fn audio_buffer_duration() {
        let audio = AudioBuffer::new(vec![0.0; 32_000], 16_000);
        assert_eq!(audio.len(), 32_000);
        assert!((audio.duration_secs() - 2.0).abs() < 1e-6);
    }
}
