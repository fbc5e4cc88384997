//! Acoustic model, frame alignment, pitch and NSF vocoder, one utterance at a time.

use std::time::Instant;

use ndarray::{s, Array1, ArrayD, ArrayView1, IxDyn};
use tracing::{debug, info};
use tts_core::{
    AcousticModel, AcousticRequest, AudioBuffer, FeatureEngine, PitchContour, PitchEngine, Result,
    SynthesisConfig, SynthesisOutput, TtsError, VocoderEngine, EXTRACTOR_SAMPLE_RATE,
    PITCH_HOP_LENGTH, RTF_REFERENCE_RATE,
};
use tts_signal::{resample_linear, resize_pitch_to_frames};

use crate::{
    aligner::FrameAligner,
    features::FeatureExtractor,
    pitch::{contour_from_track, lead_in_samples, PitchExtractor},
    vocoder::NsfVocoderAdapter,
};

pub type DynPitchExtractor = PitchExtractor<Box<dyn PitchEngine>>;
pub type DynFeatureExtractor = FeatureExtractor<Box<dyn FeatureEngine>>;

#[derive(Debug, Clone, Default)]
pub struct SynthesisRequest {
    /// Interspersed symbol ids for one utterance.
    pub token_ids: Vec<i64>,
    /// Audio whose pitch drives the vocoder instead of the flat default.
    pub pitch_reference: Option<AudioBuffer>,
}

impl SynthesisRequest {
    pub fn new(token_ids: Vec<i64>) -> Self {
        Self {
            token_ids,
            pitch_reference: None,
        }
    }

    pub fn with_pitch_reference(mut self, audio: AudioBuffer) -> Self {
        self.pitch_reference = Some(audio);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub pcm: Array1<i16>,
    pub sample_rate: u32,
    pub contour: PitchContour,
    pub rtf: f32,
}

/// Owns the engine handles for a run. Nothing here is shared or global.
pub struct SynthesisOrchestrator<A: AcousticModel, V: VocoderEngine> {
    acoustic: A,
    vocoder: NsfVocoderAdapter<V>,
    pitch: Option<DynPitchExtractor>,
    features: Option<DynFeatureExtractor>,
    config: SynthesisConfig,
}

impl<A: AcousticModel, V: VocoderEngine> SynthesisOrchestrator<A, V> {
    pub fn new(
        acoustic: A,
        vocoder: NsfVocoderAdapter<V>,
        config: SynthesisConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            acoustic,
            vocoder,
            pitch: None,
            features: None,
            config,
        })
    }

    pub fn with_pitch_extractor(mut self, extractor: DynPitchExtractor) -> Self {
        self.pitch = Some(extractor);
        self
    }

    pub fn with_feature_extractor(mut self, extractor: DynFeatureExtractor) -> Self {
        self.features = Some(extractor);
        self
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.vocoder.sample_rate()
    }

    pub fn vocoder(&self) -> &NsfVocoderAdapter<V> {
        &self.vocoder
    }

    pub fn vocoder_mut(&mut self) -> &mut NsfVocoderAdapter<V> {
        &mut self.vocoder
    }

    pub fn synthesize(&mut self, request: &SynthesisRequest) -> Result<SynthesisOutput> {
        let started = Instant::now();
        let acoustic_request = AcousticRequest::new(&request.token_ids, &self.config)?;
        let acoustic = self.acoustic.synthesise(&acoustic_request)?;

        let (batch, channels, frames) = acoustic.mel.dim();
        let reported = acoustic
            .mel_lengths
            .first()
            .map(|&l| l.max(0) as usize)
            .unwrap_or(frames);
        let mel = if reported < frames {
            acoustic.mel.slice(s![.., .., ..reported]).to_owned()
        } else {
            acoustic.mel
        };
        debug!(
            batch,
            channels,
            frames,
            mel_length = reported,
            rtf = acoustic.rtf,
            "acoustic stage done"
        );

        let hidden = FrameAligner::align(mel.view())?;
        let aligned_frames = hidden.shape()[1];
        let contour = self.pitch_for(request.pitch_reference.as_ref(), aligned_frames)?;

        let pcm = self.vocoder.synthesize(
            hidden,
            &contour.coarse,
            &contour.pitchf,
            self.config.vocoder_speaker_id,
        )?;
        let vocoder_rtf = waveform_rtf(started.elapsed().as_secs_f32(), pcm.len());
        info!(
            samples = pcm.len(),
            acoustic_rtf = acoustic.rtf,
            vocoder_rtf,
            "utterance synthesized"
        );

        Ok(SynthesisOutput {
            mel,
            pcm,
            sample_rate: self.vocoder.sample_rate(),
            acoustic_rtf: acoustic.rtf,
            vocoder_rtf,
        })
    }

    /// Resynthesizes `audio` through hidden-unit features and its own pitch.
    pub fn convert(&mut self, audio: &AudioBuffer, speaker_id: i64) -> Result<ConversionOutput> {
        let started = Instant::now();
        let (Some(features), Some(pitch)) = (self.features.as_mut(), self.pitch.as_mut()) else {
            return Err(TtsError::Config(
                "conversion needs both a feature extractor and a pitch extractor".to_string(),
            ));
        };

        let samples = to_extractor_rate(audio);
        let view = ArrayView1::from(samples.as_slice()).into_dyn();
        let hidden = features.extract(view.clone())?;
        let hidden = FrameAligner::upsample(hidden.view())?;
        let frames = hidden.shape()[1];

        let contour = pitch.extract(
            view,
            ArrayD::zeros(IxDyn(&[frames])),
            self.config.semitone_shift,
            EXTRACTOR_SAMPLE_RATE,
            PITCH_HOP_LENGTH,
            0.0,
        )?;
        let pcm = self
            .vocoder
            .synthesize(hidden, &contour.coarse, &contour.pitchf, speaker_id)?;
        let rtf = waveform_rtf(started.elapsed().as_secs_f32(), pcm.len());

        Ok(ConversionOutput {
            pcm,
            sample_rate: self.vocoder.sample_rate(),
            contour,
            rtf,
        })
    }

    /// Pitch for `frames` aligned frames: the flat default, or the tracked
    /// F0 of `reference` stretched over the whole utterance.
    fn pitch_for(&mut self, reference: Option<&AudioBuffer>, frames: usize) -> Result<PitchContour> {
        let shift = self.config.semitone_shift;
        let default_f0 = self.config.default_f0_hz;
        match (reference, self.pitch.as_mut()) {
            (None, _) => Ok(contour_from_track(vec![default_f0; frames], shift)),
            (Some(_), None) => Err(TtsError::Config(
                "a pitch reference was given but no pitch extractor is configured".to_string(),
            )),
            (Some(audio), Some(extractor)) => {
                let samples = to_extractor_rate(audio);
                // Tracker frames run at 100 Hz, aligned frames at 2 * 22050 / 256.
                let tracked_frames = (samples
                    .len()
                    .saturating_sub(lead_in_samples(EXTRACTOR_SAMPLE_RATE))
                    / PITCH_HOP_LENGTH)
                    .max(1);
                let tracked = extractor.extract(
                    ArrayView1::from(samples.as_slice()).into_dyn(),
                    ArrayD::from_elem(IxDyn(&[tracked_frames]), default_f0),
                    shift,
                    EXTRACTOR_SAMPLE_RATE,
                    PITCH_HOP_LENGTH,
                    0.0,
                )?;
                let pitchf = resize_pitch_to_frames(&tracked.pitchf.to_vec(), frames);
                debug!(tracked_frames, aligned_frames = frames, "pitch reference stretched");
                Ok(contour_from_track(pitchf, 0.0))
            }
        }
    }
}

fn to_extractor_rate(audio: &AudioBuffer) -> Vec<f32> {
    if audio.sample_rate() == EXTRACTOR_SAMPLE_RATE {
        audio.samples().to_vec()
    } else {
        resample_linear(audio.samples(), audio.sample_rate(), EXTRACTOR_SAMPLE_RATE)
    }
}

/// Wall clock seconds per second of output at the reference rate.
pub fn waveform_rtf(elapsed_secs: f32, samples: usize) -> f32 {
    if samples == 0 {
        return 0.0;
    }
    elapsed_secs * RTF_REFERENCE_RATE / samples as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tts_core::{AcousticOutput, NsfInputs, PitchEstimate, VocoderConfig};

    struct FixedMel {
        frames: usize,
        reported: i64,
    }

    impl AcousticModel for FixedMel {
        fn synthesise(&mut self, request: &AcousticRequest) -> Result<AcousticOutput> {
            assert_eq!(request.token_lengths[0], request.token_ids.shape()[1] as i64);
            Ok(AcousticOutput {
                mel: Array3::from_shape_fn((1, 4, self.frames), |(_, c, t)| (c * 10 + t) as f32),
                mel_lengths: Array1::from_vec(vec![self.reported]),
                rtf: 0.1,
            })
        }
    }

    #[derive(Default)]
    struct Capture {
        last: Option<NsfInputs>,
    }

    impl VocoderEngine for Capture {
        fn decode(&mut self, inputs: &NsfInputs) -> Result<Vec<f32>> {
            self.last = Some(inputs.clone());
            Ok(vec![0.0; inputs.hidden.shape()[1] * 400])
        }
    }

    struct Flat(f32);

    impl PitchEngine for Flat {
        fn name(&self) -> &str {
            "flat"
        }

        fn estimate(&mut self, audio: &[f32], _threshold: f32) -> Result<PitchEstimate> {
            let frames = audio.len() / PITCH_HOP_LENGTH;
            Ok(PitchEstimate {
                f0: vec![self.0; frames],
                voiced: vec![true; frames],
            })
        }
    }

    fn orchestrator(frames: usize, reported: i64) -> SynthesisOrchestrator<FixedMel, Capture> {
        let vocoder = NsfVocoderAdapter::new(
            Capture::default(),
            &VocoderConfig {
                noise_seed: Some(0),
                ..VocoderConfig::default()
            },
        )
        .unwrap();
        SynthesisOrchestrator::new(
            FixedMel { frames, reported },
            vocoder,
            SynthesisConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn flat_default_pitch_when_no_reference() {
        let mut orch = orchestrator(5, 5);
        let out = orch.synthesize(&SynthesisRequest::new(vec![0, 43, 0])).unwrap();
        assert_eq!(out.mel.shape(), &[1, 4, 5]);
        assert_eq!(out.pcm.len(), 10 * 400);
        assert_eq!(out.sample_rate, 40_000);

        let inputs = orch.vocoder_mut().engine_mut().last.take().unwrap();
        assert_eq!(inputs.hidden.shape(), &[1, 10, 4]);
        assert!(inputs.pitchf.iter().all(|&f| f == 220.0));
        assert!(inputs.pitch.iter().all(|&c| c == 60));
        assert_eq!(inputs.speaker[0], 0);
    }

    #[test]
    fn mel_is_cropped_to_reported_length() {
        let mut orch = orchestrator(8, 3);
        let out = orch.synthesize(&SynthesisRequest::new(vec![0, 43, 0])).unwrap();
        assert_eq!(out.mel.shape(), &[1, 4, 3]);
        let inputs = orch.vocoder_mut().engine_mut().last.take().unwrap();
        assert_eq!(inputs.hidden.shape()[1], 6);
    }

    #[test]
    fn pitch_reference_without_extractor_is_a_config_error() {
        let mut orch = orchestrator(5, 5);
        let request = SynthesisRequest::new(vec![0, 43, 0])
            .with_pitch_reference(AudioBuffer::new(vec![0.0; 16_000], 16_000));
        assert!(matches!(orch.synthesize(&request), Err(TtsError::Config(_))));
    }

    /// Rising F0, one value per 10 ms hop.
    struct Ramp;

    impl PitchEngine for Ramp {
        fn name(&self) -> &str {
            "ramp"
        }

        fn estimate(&mut self, audio: &[f32], _threshold: f32) -> Result<PitchEstimate> {
            let frames = audio.len() / PITCH_HOP_LENGTH;
            Ok(PitchEstimate {
                f0: (0..frames).map(|i| 100.0 + i as f32).collect(),
                voiced: vec![true; frames],
            })
        }
    }

    #[test]
    fn reference_as_long_as_the_utterance_covers_every_frame() {
        // 86 mel frames is one second at hop 256; aligned to 172 frames.
        let mut orch = orchestrator(86, 86)
            .with_pitch_extractor(PitchExtractor::new(Box::new(Flat(440.0)) as Box<dyn PitchEngine>));
        let request = SynthesisRequest::new(vec![0, 43, 0])
            .with_pitch_reference(AudioBuffer::new(vec![0.0; 16_000], 16_000));
        orch.synthesize(&request).unwrap();

        let inputs = orch.vocoder_mut().engine_mut().last.take().unwrap();
        assert_eq!(inputs.pitchf.shape(), &[1, 172]);
        assert!(inputs.pitchf.iter().all(|&f| f == 440.0));
        assert!(inputs.pitch.iter().all(|&c| c == 122));
    }

    #[test]
    fn reference_contour_keeps_its_time_order() {
        let mut orch = orchestrator(86, 86)
            .with_pitch_extractor(PitchExtractor::new(Box::new(Ramp) as Box<dyn PitchEngine>));
        // 15840 samples after the lead-in: 99 tracked frames, 100..198 Hz.
        let request = SynthesisRequest::new(vec![0, 43, 0])
            .with_pitch_reference(AudioBuffer::new(vec![0.0; 16_000], 16_000));
        orch.synthesize(&request).unwrap();

        let inputs = orch.vocoder_mut().engine_mut().last.take().unwrap();
        let pitchf = inputs.pitchf.row(0).to_vec();
        assert_eq!(pitchf.len(), 172);
        assert_eq!(pitchf[0], 100.0);
        assert!((pitchf[171] - 198.0).abs() < 1e-3);
        assert!((pitchf[86] - 149.0).abs() < 1.0);
        for pair in pitchf.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn short_reference_is_stretched_over_the_utterance() {
        let mut orch = orchestrator(20, 20)
            .with_pitch_extractor(PitchExtractor::new(Box::new(Flat(440.0)) as Box<dyn PitchEngine>));
        // 0.1 s at 16 kHz: 1440 samples after the lead-in, 9 tracked frames.
        let request = SynthesisRequest::new(vec![0, 43, 0])
            .with_pitch_reference(AudioBuffer::new(vec![0.0; 1_600], 16_000));
        orch.synthesize(&request).unwrap();

        let inputs = orch.vocoder_mut().engine_mut().last.take().unwrap();
        assert_eq!(inputs.pitchf.shape(), &[1, 40]);
        assert!(inputs.pitchf.iter().all(|&f| f == 440.0));
        assert_eq!(inputs.pitch[(0, 0)], 122);
    }

    #[test]
    fn semitone_shift_applies_once_to_reference_pitch() {
        let config = SynthesisConfig {
            semitone_shift: 12.0,
            ..SynthesisConfig::default()
        };
        let vocoder = NsfVocoderAdapter::new(
            Capture::default(),
            &VocoderConfig {
                noise_seed: Some(0),
                ..VocoderConfig::default()
            },
        )
        .unwrap();
        let mut orch = SynthesisOrchestrator::new(FixedMel { frames: 10, reported: 10 }, vocoder, config)
            .unwrap()
            .with_pitch_extractor(PitchExtractor::new(Box::new(Flat(220.0)) as Box<dyn PitchEngine>));
        let request = SynthesisRequest::new(vec![0, 43, 0])
            .with_pitch_reference(AudioBuffer::new(vec![0.0; 3_200], 16_000));
        orch.synthesize(&request).unwrap();

        let inputs = orch.vocoder_mut().engine_mut().last.take().unwrap();
        assert!(inputs.pitchf.iter().all(|&f| (f - 440.0).abs() < 1e-3));
    }

    #[test]
    fn convert_requires_both_extractors() {
        let mut orch = orchestrator(5, 5);
        let audio = AudioBuffer::new(vec![0.0; 16_000], 16_000);
        assert!(matches!(orch.convert(&audio, 0), Err(TtsError::Config(_))));
    }

    #[test]
    fn rtf_against_reference_rate() {
        assert!((waveform_rtf(1.0, 22_050) - 1.0).abs() < 1e-6);
        assert_eq!(waveform_rtf(1.0, 0), 0.0);
    }
}
