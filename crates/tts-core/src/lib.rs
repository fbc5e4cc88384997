pub mod config;
pub mod error;
pub mod pipeline;

pub use config::{
    ExecutionDevice, ModelConfig, PipelineConfig, SynthesisConfig, VocoderConfig,
    ACOUSTIC_HOP_LENGTH, EXTRACTOR_SAMPLE_RATE, PITCH_HOP_LENGTH, RTF_REFERENCE_RATE,
    VOCODER_SAMPLE_RATE,
};
pub use error::{Result, TtsError};
pub use pipeline::{
    AcousticModel, AcousticOutput, AcousticRequest, AudioBuffer, FeatureEngine, NsfInputs,
    PitchContour, PitchEngine, PitchEstimate, SynthesisOutput, VocoderEngine,
};
