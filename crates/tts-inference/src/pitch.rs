use std::path::Path;

use ndarray::{Array1, ArrayD, ArrayView2, ArrayViewD, Ix1};
use ort::session::{Session, SessionInputValue};
use tracing::debug;
use tts_core::{ExecutionDevice, PitchContour, PitchEngine, PitchEstimate, Result, TtsError};
use tts_signal::{coarse_pitch_from_f0, shift_semitones, write_right_aligned};

use crate::session::{
    audio_input, dims, f32_input, input_names, input_rank, load_session, map_ort, output_names,
    position_of, resolve_single_io_name,
};

/// Default voiced/unvoiced confidence threshold handed to the pitch engine.
pub const DEFAULT_PITCH_THRESHOLD: f32 = 0.03;
/// Fraction of a second dropped from the head of the audio before tracking.
const LEAD_IN_SECONDS: f32 = 0.01;

const SALIENCE_CENTS_BASE: f32 = 1997.3794;
const SALIENCE_CENTS_STEP: f32 = 20.0;
const SALIENCE_DECODE_RADIUS: usize = 4;

/// Builds the contour for an F0 track that needs no extraction: shift, then quantize.
pub fn contour_from_track(mut pitchf: Vec<f32>, semitone_shift: f32) -> PitchContour {
    shift_semitones(&mut pitchf, semitone_shift);
    let coarse = coarse_pitch_from_f0(&pitchf);
    PitchContour {
        coarse: Array1::from_vec(coarse),
        pitchf: Array1::from_vec(pitchf),
    }
}

/// Samples dropped from the head of the audio before tracking.
pub fn lead_in_samples(sample_rate: u32) -> usize {
    (LEAD_IN_SECONDS * sample_rate as f32) as usize
}

/// Turns raw audio into a quantized pitch contour aligned to a target frame count.
pub struct PitchExtractor<E: PitchEngine> {
    engine: E,
    threshold: f32,
}

impl<E: PitchEngine> PitchExtractor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            threshold: DEFAULT_PITCH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Extracts F0 from `audio` into the tail of `pitch_track`.
    ///
    /// `pitch_track` is pre-sized to the target frame count. Frames the engine
    /// does not cover keep their prior values. The first `0.01 * sample_rate`
    /// samples are always dropped; `warm_start_offset` does not move that cut.
    /// `frame_hop` is only used for diagnostics.
    ///
    /// Every failure comes back as [`TtsError::Extraction`] naming the engine.
    pub fn extract(
        &mut self,
        audio: ArrayViewD<'_, f32>,
        pitch_track: ArrayD<f32>,
        semitone_shift: f32,
        sample_rate: u32,
        frame_hop: usize,
        warm_start_offset: f32,
    ) -> Result<PitchContour> {
        self.extract_inner(
            audio,
            pitch_track,
            semitone_shift,
            sample_rate,
            frame_hop,
            warm_start_offset,
        )
        .map_err(|e| TtsError::extraction(self.engine.name(), e))
    }

    fn extract_inner(
        &mut self,
        audio: ArrayViewD<'_, f32>,
        pitch_track: ArrayD<f32>,
        semitone_shift: f32,
        sample_rate: u32,
        frame_hop: usize,
        warm_start_offset: f32,
    ) -> Result<PitchContour> {
        let audio_shape = audio.shape().to_vec();
        let audio = audio.into_dimensionality::<Ix1>().map_err(|_| {
            TtsError::Shape(format!(
                "pitch extraction expects 1-D audio, got shape {audio_shape:?}"
            ))
        })?;
        let track_shape = pitch_track.shape().to_vec();
        let pitch_track = pitch_track.into_dimensionality::<Ix1>().map_err(|_| {
            TtsError::Shape(format!(
                "pitch track buffer must be 1-D, got shape {track_shape:?}"
            ))
        })?;

        let lead_in = lead_in_samples(sample_rate);
        if warm_start_offset != 0.0 {
            debug!(
                warm_start_offset,
                lead_in, "warm start offset ignored; lead-in trim is fixed"
            );
        }
        let samples: Vec<f32> = audio.iter().skip(lead_in).copied().collect();
        if samples.is_empty() {
            return Err(TtsError::EmptyInput(format!(
                "audio has {} samples, nothing left after the {lead_in}-sample lead-in",
                audio.len()
            )));
        }

        let estimate = self.engine.estimate(&samples, self.threshold)?;
        let mut f0 = estimate.f0;
        for v in f0.iter_mut() {
            if !(*v > 0.0) {
                *v = 0.0;
            }
        }
        shift_semitones(&mut f0, semitone_shift);

        let mut track: Vec<f32> = pitch_track.iter().copied().collect();
        let start = write_right_aligned(&mut track, &f0);
        debug!(
            samples = samples.len(),
            expected_frames = samples.len() / frame_hop.max(1),
            engine_frames = f0.len(),
            track_frames = track.len(),
            first_written = start,
            "pitch extracted"
        );

        let coarse = coarse_pitch_from_f0(&track);
        Ok(PitchContour {
            coarse: Array1::from_vec(coarse),
            pitchf: Array1::from_vec(track),
        })
    }
}

#[derive(Debug, Clone)]
enum PitchOutputs {
    /// The model decodes F0 itself (`f0` plus an optional voiced flag).
    F0 {
        f0: usize,
        voiced: Option<usize>,
    },
    /// The model returns a `[frames, 360]` salience map.
    Salience,
}

/// RMVPE-style pitch tracker backed by ONNX Runtime.
pub struct OrtPitchEngine {
    session: Session,
    waveform_input: String,
    waveform_rank: usize,
    threshold_input: Option<String>,
    threshold_rank: usize,
    outputs: PitchOutputs,
}

impl OrtPitchEngine {
    pub fn load(model_path: &Path, device: &str) -> Result<Self> {
        let device = ExecutionDevice::parse(device)?;
        let session = load_session(model_path, device, "pitch")?;

        let inputs = input_names(&session);
        let threshold_input = inputs
            .iter()
            .find(|name| name.to_ascii_lowercase().contains("threshold"))
            .cloned();
        let waveform_candidates: Vec<String> = inputs
            .iter()
            .filter(|name| Some(*name) != threshold_input.as_ref())
            .cloned()
            .collect();
        let waveform_input = resolve_single_io_name(
            &waveform_candidates,
            &["waveform", "audio", "wave", "input"],
            "pitch waveform input",
        )?;
        let waveform_rank = input_rank(&session, &waveform_input).unwrap_or(2);
        let threshold_rank = threshold_input
            .as_deref()
            .and_then(|name| input_rank(&session, name))
            .unwrap_or(1);

        let outputs = output_names(&session);
        let outputs = if threshold_input.is_some() || outputs.len() >= 2 {
            PitchOutputs::F0 {
                f0: position_of(&outputs, &["f0", "pitch"]).unwrap_or(0),
                voiced: position_of(&outputs, &["uv", "voiced"]),
            }
        } else {
            PitchOutputs::Salience
        };

        Ok(Self {
            session,
            waveform_input,
            waveform_rank,
            threshold_input,
            threshold_rank,
            outputs,
        })
    }
}

impl PitchEngine for OrtPitchEngine {
    fn name(&self) -> &str {
        "RmvpeOnnxPitchEngine"
    }

    fn estimate(&mut self, audio: &[f32], threshold: f32) -> Result<PitchEstimate> {
        let mut input_map: Vec<(String, SessionInputValue<'static>)> = vec![(
            self.waveform_input.clone(),
            audio_input("pitch waveform", self.waveform_rank, audio)?,
        )];
        if let Some(name) = &self.threshold_input {
            let shape = if self.threshold_rank == 0 {
                Vec::new()
            } else {
                vec![1]
            };
            input_map.push((
                name.clone(),
                f32_input("pitch threshold", shape, vec![threshold])?,
            ));
        }

        let outputs = map_ort("pitch inference failed", self.session.run(input_map))?;
        if outputs.len() == 0 {
            return Err(TtsError::Inference(
                "pitch model returned no outputs".to_string(),
            ));
        }

        match self.outputs {
            PitchOutputs::F0 { f0, voiced } => {
                let (_, data) = map_ort(
                    "failed to extract pitch f0 tensor<f32>",
                    outputs[f0].try_extract_tensor::<f32>(),
                )?;
                let f0 = data.to_vec();
                let voiced = voiced
                    .and_then(|idx| outputs[idx].try_extract_tensor::<f32>().ok())
                    .map(|(_, uv)| uv.iter().map(|&v| v > 0.5).collect::<Vec<bool>>())
                    .filter(|uv| uv.len() == f0.len())
                    .unwrap_or_else(|| f0.iter().map(|&v| v > 0.0).collect());
                Ok(PitchEstimate { f0, voiced })
            }
            PitchOutputs::Salience => {
                let (shape, data) = map_ort(
                    "failed to extract pitch salience tensor<f32>",
                    outputs[0].try_extract_tensor::<f32>(),
                )?;
                let shape = dims(shape);
                let (frames, bins) = match shape.as_slice() {
                    [1, frames, bins] | [frames, bins] => (*frames, *bins),
                    _ => {
                        return Err(TtsError::Shape(format!(
                            "unexpected salience shape {shape:?}, expected [1, frames, bins]"
                        )))
                    }
                };
                let salience = ArrayView2::from_shape((frames, bins), data).map_err(|e| {
                    TtsError::Shape(format!("failed to view salience as [{frames}, {bins}]: {e}"))
                })?;
                let f0 = decode_f0_from_salience(&salience, threshold);
                let voiced = f0.iter().map(|&v| v > 0.0).collect();
                Ok(PitchEstimate { f0, voiced })
            }
        }
    }
}

/// Decodes a `[frames, bins]` salience map to F0 in Hz.
///
/// Takes a softmax-weighted average of the cents around the peak bin.
/// Frames whose peak does not exceed `threshold` are unvoiced (`0.0`).
fn decode_f0_from_salience(salience: &ArrayView2<'_, f32>, threshold: f32) -> Vec<f32> {
    let n_frames = salience.shape()[0];
    let n_bins = salience.shape()[1];
    if n_frames == 0 || n_bins == 0 {
        return Vec::new();
    }
    let threshold = threshold.max(0.0);
    let mut f0 = vec![0.0_f32; n_frames];

    for t in 0..n_frames {
        let row = salience.row(t);
        let mut peak_bin = 0usize;
        let mut peak_val = f32::NEG_INFINITY;
        for (idx, &v) in row.iter().enumerate() {
            if v > peak_val {
                peak_val = v;
                peak_bin = idx;
            }
        }
        if !peak_val.is_finite() || peak_val <= threshold {
            continue;
        }

        let start = peak_bin.saturating_sub(SALIENCE_DECODE_RADIUS);
        let end = (peak_bin + SALIENCE_DECODE_RADIUS + 1).min(n_bins);

        let mut cents_num = 0.0_f32;
        let mut cents_den = 0.0_f32;
        for b in start..end {
            let w = (row[b] - peak_val).exp();
            let cents = SALIENCE_CENTS_BASE + SALIENCE_CENTS_STEP * b as f32;
            cents_num += cents * w;
            cents_den += w;
        }
        if cents_den > f32::EPSILON {
            let cents = cents_num / cents_den;
            f0[t] = 10.0_f32 * 2.0_f32.powf(cents / 1200.0_f32);
        }
    }
    f0
}
