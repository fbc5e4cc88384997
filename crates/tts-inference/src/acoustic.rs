use std::{path::Path, time::Instant};

use ndarray::{Array1, Array3};
use ort::session::{Session, SessionInputValue};
use tracing::{debug, warn};
use tts_core::{
    AcousticModel, AcousticOutput, AcousticRequest, ExecutionDevice, Result, TtsError,
    ACOUSTIC_HOP_LENGTH, RTF_REFERENCE_RATE,
};

use crate::session::{
    dims, f32_input, i64_input, input_names, load_session, map_ort, output_names, position_of,
};

/// Flow-matching acoustic model exported to ONNX (text ids in, mel out).
///
/// The ODE solver steps are baked into the graph at export time. When the
/// exported count is known, requests asking for a different count are run
/// anyway with a warning.
pub struct OrtAcousticModel {
    session: Session,
    inputs: AcousticInputs,
    mel_output: usize,
    mel_lengths_output: Option<usize>,
    export_steps: Option<usize>,
}

#[derive(Debug, Clone)]
struct AcousticInputs {
    tokens: String,
    token_lengths: String,
    scales: String,
    speakers: Option<String>,
}

impl OrtAcousticModel {
    pub fn load(model_path: &Path, device: &str) -> Result<Self> {
        let device = ExecutionDevice::parse(device)?;
        let session = load_session(model_path, device, "acoustic")?;

        let names = input_names(&session);
        let find = |name: &str| names.iter().find(|n| n.as_str() == name).cloned();
        let (Some(tokens), Some(token_lengths), Some(scales)) =
            (find("x"), find("x_lengths"), find("scales"))
        else {
            return Err(TtsError::Config(format!(
                "acoustic model must declare inputs x, x_lengths and scales, found {names:?}"
            )));
        };
        let inputs = AcousticInputs {
            tokens,
            token_lengths,
            scales,
            speakers: find("spks"),
        };

        let outputs = output_names(&session);
        let mel_output = outputs.iter().position(|n| n == "mel").unwrap_or(0);
        let mel_lengths_output = outputs
            .iter()
            .position(|n| n == "mel_lengths")
            .or_else(|| position_of(&outputs, &["length"]))
            .or((outputs.len() > 1).then_some(1));

        Ok(Self {
            session,
            inputs,
            mel_output,
            mel_lengths_output,
            export_steps: None,
        })
    }

    /// Records the ODE step count the graph was exported with.
    pub fn with_export_steps(mut self, steps: usize) -> Self {
        self.export_steps = Some(steps);
        self
    }

    /// Whether the graph declares a speaker input.
    pub fn is_multi_speaker(&self) -> bool {
        self.inputs.speakers.is_some()
    }
}

impl AcousticModel for OrtAcousticModel {
    fn synthesise(&mut self, request: &AcousticRequest) -> Result<AcousticOutput> {
        if let Some(exported) = steps_mismatch(self.export_steps, request.steps) {
            warn!(
                requested = request.steps,
                exported, "ode steps are fixed at export time; using the exported count"
            );
        }

        let (_, n) = request.token_ids.dim();
        let mut input_map: Vec<(String, SessionInputValue<'static>)> = vec![
            (
                self.inputs.tokens.clone(),
                i64_input(
                    "token ids",
                    vec![1, n as i64],
                    request.token_ids.iter().copied().collect(),
                )?,
            ),
            (
                self.inputs.token_lengths.clone(),
                i64_input("token lengths", vec![1], request.token_lengths.to_vec())?,
            ),
            (
                self.inputs.scales.clone(),
                f32_input(
                    "scales",
                    vec![2],
                    vec![request.temperature, request.length_scale],
                )?,
            ),
        ];
        match (&self.inputs.speakers, request.speaker_id) {
            (Some(name), Some(speaker)) => {
                input_map.push((name.clone(), i64_input("speaker", vec![1], vec![speaker])?));
            }
            (Some(_), None) => {
                return Err(TtsError::Config(
                    "acoustic model is multi-speaker but no speaker id was given".to_string(),
                ));
            }
            (None, Some(speaker)) => {
                warn!(speaker, "acoustic model has no speaker input; ignoring speaker id");
            }
            (None, None) => {}
        }

        let started = Instant::now();
        let outputs = map_ort("acoustic inference failed", self.session.run(input_map))?;
        let elapsed = started.elapsed().as_secs_f32();

        if outputs.len() <= self.mel_output {
            return Err(TtsError::Inference(
                "acoustic model returned no mel output".to_string(),
            ));
        }
        let (shape, data) = map_ort(
            "failed to extract mel tensor<f32>",
            outputs[self.mel_output].try_extract_tensor::<f32>(),
        )?;
        let shape = dims(shape);
        let [batch, channels, frames] = shape.as_slice() else {
            return Err(TtsError::Shape(format!(
                "unexpected mel shape {shape:?}, expected [1, channels, frames]"
            )));
        };
        let mel = Array3::from_shape_vec((*batch, *channels, *frames), data.to_vec())
            .map_err(|e| TtsError::Shape(format!("mel does not match its shape: {e}")))?;

        let mel_lengths = match self.mel_lengths_output {
            Some(idx) if idx < outputs.len() => {
                let (_, lengths) = map_ort(
                    "failed to extract mel_lengths tensor<i64>",
                    outputs[idx].try_extract_tensor::<i64>(),
                )?;
                Array1::from_vec(lengths.to_vec())
            }
            _ => Array1::from_vec(vec![*frames as i64]),
        };

        let reported = mel_lengths
            .first()
            .map(|&l| l.max(0) as usize)
            .unwrap_or(*frames);
        let rtf = acoustic_rtf(elapsed, reported);
        debug!(tokens = n, mel = ?mel.shape(), mel_length = reported, rtf, "acoustic model ran");

        Ok(AcousticOutput {
            mel,
            mel_lengths,
            rtf,
        })
    }
}

/// The exported step count when it is known and differs from `requested`.
fn steps_mismatch(exported: Option<usize>, requested: usize) -> Option<usize> {
    exported.filter(|&steps| steps != requested)
}

/// Seconds of compute per second of audio at the reference rate.
pub fn acoustic_rtf(elapsed_secs: f32, mel_frames: usize) -> f32 {
    let samples = (mel_frames * ACOUSTIC_HOP_LENGTH) as f32;
    if samples <= 0.0 {
        return 0.0;
    }
    elapsed_secs * RTF_REFERENCE_RATE / samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtf_uses_reference_rate_and_hop() {
        // 86 frames * 256 = 22016 samples, just under a reference second.
        let rtf = acoustic_rtf(0.5, 86);
        assert!((rtf - 0.5 * 22_050.0 / 22_016.0).abs() < 1e-6);
        assert_eq!(acoustic_rtf(1.0, 0), 0.0);
    }

    #[test]
    fn step_mismatch_only_when_export_count_is_known() {
        assert_eq!(steps_mismatch(None, 10), None);
        assert_eq!(steps_mismatch(Some(10), 10), None);
        assert_eq!(steps_mismatch(Some(10), 4), Some(10));
    }

    #[test]
    fn non_cpu_device_is_rejected_before_loading() {
        let err = OrtAcousticModel::load(Path::new("/missing/matcha.onnx"), "cuda").err();
        assert!(matches!(err, Some(TtsError::UnsupportedDevice(_))));
    }

    #[test]
    fn missing_model_is_a_config_error() {
        let err = OrtAcousticModel::load(Path::new("/missing/matcha.onnx"), "cpu").err();
        assert!(matches!(err, Some(TtsError::Config(_))));
    }
}
