use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use ort::session::{Session, SessionInputValue};
use rand::{rngs::StdRng, SeedableRng};
use tracing::debug;
use tts_core::{ExecutionDevice, NsfInputs, Result, TtsError, VocoderConfig, VocoderEngine};
use tts_signal::{fill_standard_normal, float_to_pcm16};

use crate::session::{f32_input, i64_input, input_names, load_session, map_ort};

/// Channel count of the vocoder's noise input.
pub const NOISE_CHANNELS: usize = 192;
const NSF_INPUT_COUNT: usize = 6;

/// Packs aligned features, pitch and speaker into the NSF input contract and
/// converts the generated waveform to 16-bit PCM.
pub struct NsfVocoderAdapter<E: VocoderEngine> {
    engine: E,
    rng: StdRng,
    sample_rate: u32,
}

impl<E: VocoderEngine> NsfVocoderAdapter<E> {
    /// Fails with [`TtsError::UnsupportedDevice`] for anything but the CPU.
    pub fn new(engine: E, config: &VocoderConfig) -> Result<Self> {
        ExecutionDevice::parse(&config.device)?;
        let rng = match config.noise_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            engine,
            rng,
            sample_rate: config.sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Runs the vocoder and returns mono PCM.
    ///
    /// `hidden_features` is `[1, T, D]`; `pitch_coarse` and `pitch_track` must
    /// both hold `T` frames. Mismatches are rejected before the engine runs.
    pub fn synthesize(
        &mut self,
        hidden_features: Array3<f32>,
        pitch_coarse: &Array1<i64>,
        pitch_track: &Array1<f32>,
        speaker_id: i64,
    ) -> Result<Array1<i16>> {
        let inputs = self.prepare_inputs(hidden_features, pitch_coarse, pitch_track, speaker_id)?;
        debug!(
            hidden = ?inputs.hidden.shape(),
            hidden_length = inputs.hidden_length[0],
            pitch = ?inputs.pitch.shape(),
            pitchf = ?inputs.pitchf.shape(),
            speaker = inputs.speaker[0],
            noise = ?inputs.noise.shape(),
            "running nsf vocoder"
        );
        let waveform = self.engine.decode(&inputs)?;
        Ok(Array1::from_vec(float_to_pcm16(&waveform)))
    }

    /// Validates frame counts and builds the six vocoder inputs, noise included.
    pub fn prepare_inputs(
        &mut self,
        hidden_features: Array3<f32>,
        pitch_coarse: &Array1<i64>,
        pitch_track: &Array1<f32>,
        speaker_id: i64,
    ) -> Result<NsfInputs> {
        let (batch, frames, depth) = hidden_features.dim();
        if batch != 1 {
            return Err(TtsError::Shape(format!(
                "hidden features batch must be 1, got {batch}"
            )));
        }
        if frames == 0 {
            return Err(TtsError::EmptyInput(
                "hidden features have zero frames".to_string(),
            ));
        }
        if depth == 0 {
            return Err(TtsError::Shape(
                "hidden features have zero depth".to_string(),
            ));
        }
        if pitch_coarse.len() != frames {
            return Err(TtsError::Shape(format!(
                "pitch_coarse has {} frames, hidden features have {frames}",
                pitch_coarse.len()
            )));
        }
        if pitch_track.len() != frames {
            return Err(TtsError::Shape(format!(
                "pitch_track has {} frames, hidden features have {frames}",
                pitch_track.len()
            )));
        }

        let pitch = Array2::from_shape_vec((1, frames), pitch_coarse.to_vec())
            .map_err(|e| TtsError::Shape(format!("failed to shape pitch as [1, T]: {e}")))?;
        let pitchf = Array2::from_shape_vec((1, frames), pitch_track.to_vec())
            .map_err(|e| TtsError::Shape(format!("failed to shape pitchf as [1, T]: {e}")))?;

        let mut noise = Array3::<f32>::zeros((1, NOISE_CHANNELS, frames));
        let buf = noise
            .as_slice_mut()
            .ok_or_else(|| TtsError::Shape("noise buffer is not contiguous".to_string()))?;
        fill_standard_normal(&mut self.rng, buf);

        Ok(NsfInputs {
            hidden: hidden_features.as_standard_layout().into_owned(),
            hidden_length: Array1::from_vec(vec![frames as i64]),
            pitch,
            pitchf,
            speaker: Array1::from_vec(vec![speaker_id]),
            noise,
        })
    }
}

/// NSF vocoder session. Inputs are bound by position in the order the model
/// declares them: hidden, hidden length, pitch, pitchf, speaker, noise.
pub struct OrtVocoderEngine {
    session: Session,
    inputs: Vec<String>,
}

impl OrtVocoderEngine {
    pub fn load(model_path: &Path, device: &str) -> Result<Self> {
        let device = ExecutionDevice::parse(device)?;
        let session = load_session(model_path, device, "nsf vocoder")?;
        let inputs = input_names(&session);
        if inputs.len() < NSF_INPUT_COUNT {
            return Err(TtsError::Config(format!(
                "nsf vocoder expects {NSF_INPUT_COUNT} inputs, model declares {inputs:?}"
            )));
        }
        Ok(Self {
            session,
            inputs: inputs.into_iter().take(NSF_INPUT_COUNT).collect(),
        })
    }
}

impl VocoderEngine for OrtVocoderEngine {
    fn decode(&mut self, inputs: &NsfInputs) -> Result<Vec<f32>> {
        let values = [
            f32_input(
                "hidden",
                shape_of(inputs.hidden.shape()),
                inputs.hidden.iter().copied().collect(),
            )?,
            i64_input("hidden_length", vec![1], inputs.hidden_length.to_vec())?,
            i64_input(
                "pitch",
                shape_of(inputs.pitch.shape()),
                inputs.pitch.iter().copied().collect(),
            )?,
            f32_input(
                "pitchf",
                shape_of(inputs.pitchf.shape()),
                inputs.pitchf.iter().copied().collect(),
            )?,
            i64_input("speaker", vec![1], inputs.speaker.to_vec())?,
            f32_input(
                "noise",
                shape_of(inputs.noise.shape()),
                inputs.noise.iter().copied().collect(),
            )?,
        ];
        let input_map: Vec<(String, SessionInputValue<'static>)> =
            self.inputs.iter().cloned().zip(values).collect();

        let outputs = map_ort("nsf vocoder inference failed", self.session.run(input_map))?;
        if outputs.len() == 0 {
            return Err(TtsError::Inference(
                "nsf vocoder returned no outputs".to_string(),
            ));
        }
        let (_, audio) = map_ort(
            "failed to extract nsf vocoder output tensor<f32>",
            outputs[0].try_extract_tensor::<f32>(),
        )?;
        Ok(audio.to_vec())
    }
}

fn shape_of(shape: &[usize]) -> Vec<i64> {
    shape.iter().map(|&d| d as i64).collect()
}
