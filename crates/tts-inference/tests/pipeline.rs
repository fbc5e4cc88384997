use ndarray::{Array1, Array3};
use tts_core::{
    AcousticModel, AcousticOutput, AcousticRequest, AudioBuffer, FeatureEngine, NsfInputs,
    PitchEngine, PitchEstimate, Result, SynthesisConfig, TtsError, VocoderConfig, VocoderEngine,
};
use tts_inference::{
    FeatureExtractor, NsfVocoderAdapter, PitchExtractor, SymbolEncoder, SynthesisOrchestrator,
    SynthesisRequest, NOISE_CHANNELS,
};

const MEL_CHANNELS: usize = 80;
const SAMPLES_PER_FRAME: usize = 400;

/// Three mel frames per input symbol.
struct ToyAcoustic {
    calls: usize,
}

impl AcousticModel for ToyAcoustic {
    fn synthesise(&mut self, request: &AcousticRequest) -> Result<AcousticOutput> {
        self.calls += 1;
        assert_eq!(request.token_ids.nrows(), 1);
        assert_eq!(request.steps, 10);
        let frames = request.token_ids.ncols() * 3;
        Ok(AcousticOutput {
            mel: Array3::from_elem((1, MEL_CHANNELS, frames), -4.0),
            mel_lengths: Array1::from_vec(vec![frames as i64]),
            rtf: 0.05,
        })
    }
}

/// Emits a half-scale square wave, `SAMPLES_PER_FRAME` samples per frame.
#[derive(Default)]
struct ToyVocoder {
    seen: Vec<NsfInputs>,
}

impl VocoderEngine for ToyVocoder {
    fn decode(&mut self, inputs: &NsfInputs) -> Result<Vec<f32>> {
        self.seen.push(inputs.clone());
        let n = inputs.hidden.shape()[1] * SAMPLES_PER_FRAME;
        Ok((0..n).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect())
    }
}

struct ToyPitch(f32);

impl PitchEngine for ToyPitch {
    fn name(&self) -> &str {
        "toy"
    }

    fn estimate(&mut self, audio: &[f32], _threshold: f32) -> Result<PitchEstimate> {
        let frames = audio.len() / 160;
        Ok(PitchEstimate {
            f0: vec![self.0; frames],
            voiced: vec![true; frames],
        })
    }
}

/// 768-dim features at a 320-sample stride.
struct ToyHubert;

impl FeatureEngine for ToyHubert {
    fn encode(&mut self, audio: Array3<f32>) -> Result<Array3<f32>> {
        Ok(Array3::zeros((1, 768, audio.shape()[2] / 320)))
    }
}

fn orchestrator(config: SynthesisConfig) -> SynthesisOrchestrator<ToyAcoustic, ToyVocoder> {
    let vocoder = NsfVocoderAdapter::new(
        ToyVocoder::default(),
        &VocoderConfig {
            noise_seed: Some(42),
            ..VocoderConfig::default()
        },
    )
    .unwrap();
    SynthesisOrchestrator::new(ToyAcoustic { calls: 0 }, vocoder, config).unwrap()
}

#[test]
fn text_to_pcm_end_to_end() {
    let tokens = SymbolEncoder::new().encode("həloʊ").unwrap();
    assert_eq!(tokens.len(), 11);

    let mut orch = orchestrator(SynthesisConfig::default());
    let out = orch.synthesize(&SynthesisRequest::new(tokens)).unwrap();

    let mel_frames = 11 * 3;
    assert_eq!(out.mel.shape(), &[1, MEL_CHANNELS, mel_frames]);
    assert_eq!(out.sample_rate, 40_000);
    assert_eq!(out.pcm.len(), 2 * mel_frames * SAMPLES_PER_FRAME);
    assert_eq!(out.pcm[0], 16384);
    assert_eq!(out.pcm[1], -16384);
    assert_eq!(out.acoustic_rtf, 0.05);
    assert!(out.vocoder_rtf >= 0.0);
    assert!((out.duration_secs() - 0.66).abs() < 1e-4);
}

#[test]
fn vocoder_sees_aligned_contract() {
    let mut orch = orchestrator(SynthesisConfig {
        semitone_shift: 12.0,
        vocoder_speaker_id: 2,
        ..SynthesisConfig::default()
    });
    orch.synthesize(&SynthesisRequest::new(vec![0, 43, 0])).unwrap();

    let inputs = &orch.vocoder().engine().seen[0];
    assert_eq!(inputs.hidden.shape(), &[1, 18, MEL_CHANNELS]);
    assert_eq!(inputs.hidden_length[0], 18);
    assert_eq!(inputs.speaker[0], 2);
    assert_eq!(inputs.noise.shape(), &[1, NOISE_CHANNELS, 18]);
    assert!(inputs.pitchf.iter().all(|&f| (f - 440.0).abs() < 1e-3));
    assert!(inputs.pitch.iter().all(|&c| c == 122));
}

#[test]
fn pitch_reference_drives_the_contour() {
    let mut orch = orchestrator(SynthesisConfig::default())
        .with_pitch_extractor(PitchExtractor::new(Box::new(ToyPitch(110.0)) as Box<dyn PitchEngine>));
    // One second at 32 kHz is resampled to 16 kHz before tracking.
    let reference = AudioBuffer::new(vec![0.0; 32_000], 32_000);
    let request = SynthesisRequest::new(vec![0, 43, 0]).with_pitch_reference(reference);
    let out = orch.synthesize(&request).unwrap();
    assert_eq!(out.pcm.len(), 18 * SAMPLES_PER_FRAME);

    // 99 tracked frames are stretched over the 18 aligned frames.
    let inputs = &orch.vocoder().engine().seen[0];
    assert!(inputs.pitchf.iter().all(|&f| f == 110.0));
    assert!(inputs.pitch.iter().all(|&c| c == 23));
}

#[test]
fn conversion_runs_features_pitch_and_vocoder() {
    let mut orch = orchestrator(SynthesisConfig::default())
        .with_pitch_extractor(PitchExtractor::new(Box::new(ToyPitch(220.0)) as Box<dyn PitchEngine>))
        .with_feature_extractor(FeatureExtractor::new(Box::new(ToyHubert) as Box<dyn FeatureEngine>));

    let audio = AudioBuffer::new(vec![0.0; 32_000], 16_000);
    let out = orch.convert(&audio, 1).unwrap();

    // 100 hubert frames upsampled to 200; 199 tracked pitch frames fill the tail.
    assert_eq!(out.contour.frames(), 200);
    assert_eq!(out.contour.pitchf[0], 0.0);
    assert_eq!(out.contour.coarse[0], 1);
    assert_eq!(out.contour.pitchf[199], 220.0);
    assert_eq!(out.contour.coarse[199], 60);
    assert_eq!(out.pcm.len(), 200 * SAMPLES_PER_FRAME);
}

#[test]
fn empty_symbol_sequence_is_rejected_before_the_model() {
    let mut orch = orchestrator(SynthesisConfig::default());
    let err = orch.synthesize(&SynthesisRequest::new(Vec::new())).unwrap_err();
    assert!(matches!(err, TtsError::EmptyInput(_)));
}

#[test]
fn pitch_failures_name_the_extractor() {
    struct Broken;
    impl PitchEngine for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn estimate(&mut self, _audio: &[f32], _threshold: f32) -> Result<PitchEstimate> {
            Err(TtsError::Inference("model exploded".to_string()))
        }
    }

    let mut orch = orchestrator(SynthesisConfig::default())
        .with_pitch_extractor(PitchExtractor::new(Box::new(Broken) as Box<dyn PitchEngine>));
    let request = SynthesisRequest::new(vec![0, 43, 0])
        .with_pitch_reference(AudioBuffer::new(vec![0.0; 16_000], 16_000));
    match orch.synthesize(&request).unwrap_err() {
        TtsError::Extraction { extractor, .. } => assert_eq!(extractor, "broken"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn noise_has_the_expected_channel_count() {
    let mut adapter = NsfVocoderAdapter::new(
        ToyVocoder::default(),
        &VocoderConfig {
            noise_seed: Some(7),
            ..VocoderConfig::default()
        },
    )
    .unwrap();
    let inputs = adapter
        .prepare_inputs(
            Array3::zeros((1, 6, 80)),
            &Array1::from_elem(6, 60),
            &Array1::from_elem(6, 220.0),
            0,
        )
        .unwrap();
    assert_eq!(inputs.noise.shape(), &[1, NOISE_CHANNELS, 6]);
}
