use std::path::Path;

use ndarray::{Array1, Array3, ArrayViewD, Axis, Ix1};
use ort::session::{Session, SessionInputValue};
use tracing::debug;
use tts_core::{ExecutionDevice, FeatureEngine, Result, TtsError};

use crate::session::{
    audio_input, dims, input_names, input_rank, load_session, map_ort, output_names,
    resolve_single_io_name,
};

/// Runs a HuBERT-like encoder over raw audio and hands back time-leading features.
pub struct FeatureExtractor<E: FeatureEngine> {
    engine: E,
}

impl<E: FeatureEngine> FeatureExtractor<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// `audio` is `[N]` or `[N, channels]`; returns `[1, frames, depth]`.
    ///
    /// Multi-channel input is averaged to mono. No normalisation is applied.
    pub fn extract(&mut self, audio: ArrayViewD<'_, f32>) -> Result<Array3<f32>> {
        let mono = to_mono(audio)?;
        if mono.is_empty() {
            return Err(TtsError::EmptyInput(
                "feature extraction got zero samples".to_string(),
            ));
        }

        let n = mono.len();
        let input = Array3::from_shape_vec((1, 1, n), mono.to_vec())
            .map_err(|e| TtsError::Shape(format!("failed to shape audio as [1, 1, N]: {e}")))?;
        let logits = self.engine.encode(input)?;

        let (batch, depth, frames) = logits.dim();
        if batch != 1 {
            return Err(TtsError::Shape(format!(
                "feature engine returned batch {batch}, expected 1"
            )));
        }
        debug!(samples = n, depth, frames, "hidden features extracted");

        Ok(logits
            .permuted_axes([0, 2, 1])
            .as_standard_layout()
            .into_owned())
    }
}

fn to_mono(audio: ArrayViewD<'_, f32>) -> Result<Array1<f32>> {
    let shape = audio.shape().to_vec();
    let mono = match shape.len() {
        1 => audio.to_owned().into_dyn(),
        2 => audio.mean_axis(Axis(1)).ok_or_else(|| {
            TtsError::Shape(format!("audio with shape {shape:?} has no channels"))
        })?,
        _ => {
            return Err(TtsError::Shape(format!(
                "feature extraction expects 1-D or 2-D audio, got shape {shape:?}"
            )))
        }
    };
    mono.into_dimensionality::<Ix1>()
        .map_err(|e| TtsError::Shape(format!("audio is not 1-D after downmix: {e}")))
}

/// Hidden-unit encoder backed by ONNX Runtime: `[1, 1, N]` in, `[1, D, F]` out.
pub struct OrtFeatureEngine {
    session: Session,
    input: String,
    input_rank: usize,
    output: usize,
}

impl OrtFeatureEngine {
    pub fn load(model_path: &Path, device: &str) -> Result<Self> {
        let device = ExecutionDevice::parse(device)?;
        let session = load_session(model_path, device, "hubert")?;
        let input = resolve_single_io_name(
            &input_names(&session),
            &["audio", "source", "wave", "feats", "input"],
            "hubert input",
        )?;
        let input_rank = input_rank(&session, &input).unwrap_or(3);
        let outputs = output_names(&session);
        let output_name =
            resolve_single_io_name(&outputs, &["logits", "feat", "hubert", "output"], "hubert output")?;
        let output = outputs
            .iter()
            .position(|name| *name == output_name)
            .unwrap_or(0);
        Ok(Self {
            session,
            input,
            input_rank,
            output,
        })
    }
}

impl FeatureEngine for OrtFeatureEngine {
    fn encode(&mut self, audio: Array3<f32>) -> Result<Array3<f32>> {
        let samples: Vec<f32> = audio.iter().copied().collect();
        let input_map: Vec<(String, SessionInputValue<'static>)> = vec![(
            self.input.clone(),
            audio_input("hubert audio", self.input_rank, &samples)?,
        )];
        let outputs = map_ort("hubert inference failed", self.session.run(input_map))?;
        if outputs.len() <= self.output {
            return Err(TtsError::Inference(
                "hubert model returned no outputs".to_string(),
            ));
        }
        let (shape, data) = map_ort(
            "failed to extract hubert output tensor<f32>",
            outputs[self.output].try_extract_tensor::<f32>(),
        )?;
        let shape = dims(shape);
        let [batch, depth, frames] = shape.as_slice() else {
            return Err(TtsError::Shape(format!(
                "unexpected hubert output shape {shape:?}, expected [1, depth, frames]"
            )));
        };
        Array3::from_shape_vec((*batch, *depth, *frames), data.to_vec())
            .map_err(|e| TtsError::Shape(format!("hubert output does not match its shape: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, ArrayD, IxDyn};

    /// Strided encoder: one frame per `stride` samples, frame value = mean of its window.
    struct StridedEncoder {
        stride: usize,
        depth: usize,
    }

    impl FeatureEngine for StridedEncoder {
        fn encode(&mut self, audio: Array3<f32>) -> Result<Array3<f32>> {
            assert_eq!(audio.shape()[..2], [1, 1]);
            let samples = audio.shape()[2];
            let frames = samples / self.stride;
            let mut out = Array3::<f32>::zeros((1, self.depth, frames));
            for f in 0..frames {
                let window = audio.slice(ndarray::s![0, 0, f * self.stride..(f + 1) * self.stride]);
                let mean = window.sum() / self.stride as f32;
                for d in 0..self.depth {
                    out[(0, d, f)] = mean + d as f32;
                }
            }
            Ok(out)
        }
    }

    #[test]
    fn two_seconds_of_silence_follow_the_stride() {
        let mut fe = FeatureExtractor::new(StridedEncoder {
            stride: 320,
            depth: 768,
        });
        let silence = ArrayD::<f32>::zeros(IxDyn(&[32_000]));
        let feats = fe.extract(silence.view()).unwrap();
        assert_eq!(feats.shape(), &[1, 32_000 / 320, 768]);
        assert!(feats.is_standard_layout());
    }

    #[test]
    fn output_is_transposed_to_time_leading() {
        let mut fe = FeatureExtractor::new(StridedEncoder { stride: 2, depth: 3 });
        let audio = Array1::from_vec(vec![1.0_f32, 1.0, 4.0, 4.0]).into_dyn();
        let feats = fe.extract(audio.view()).unwrap();
        assert_eq!(feats.shape(), &[1, 2, 3]);
        assert_eq!(feats[(0, 0, 0)], 1.0);
        assert_eq!(feats[(0, 1, 0)], 4.0);
        assert_eq!(feats[(0, 1, 2)], 6.0);
    }

    #[test]
    fn stereo_is_averaged() {
        let mut fe = FeatureExtractor::new(StridedEncoder { stride: 2, depth: 1 });
        let stereo = Array2::from_shape_vec((4, 2), vec![1.0_f32, 3.0, 1.0, 3.0, 0.0, 0.0, 0.0, 0.0])
            .unwrap()
            .into_dyn();
        let feats = fe.extract(stereo.view()).unwrap();
        assert_eq!(feats.shape(), &[1, 2, 1]);
        assert_eq!(feats[(0, 0, 0)], 2.0);
        assert_eq!(feats[(0, 1, 0)], 0.0);
    }

    #[test]
    fn three_dimensional_audio_is_rejected() {
        let mut fe = FeatureExtractor::new(StridedEncoder { stride: 2, depth: 1 });
        let cube = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 16]));
        assert!(matches!(fe.extract(cube.view()), Err(TtsError::Shape(_))));
    }

    #[test]
    fn empty_audio_is_rejected() {
        let mut fe = FeatureExtractor::new(StridedEncoder { stride: 2, depth: 1 });
        let empty = ArrayD::<f32>::zeros(IxDyn(&[0]));
        assert!(matches!(fe.extract(empty.view()), Err(TtsError::EmptyInput(_))));
    }
}
