pub mod acoustic;
pub mod aligner;
pub mod features;
pub mod orchestrator;
pub mod pitch;
mod session;
pub mod text;
pub mod vocoder;

pub use acoustic::OrtAcousticModel;
pub use aligner::{FrameAligner, UPSAMPLE_FACTOR};
pub use features::{FeatureExtractor, OrtFeatureEngine};
pub use orchestrator::{
    ConversionOutput, DynFeatureExtractor, DynPitchExtractor, SynthesisOrchestrator,
    SynthesisRequest,
};
pub use pitch::{contour_from_track, OrtPitchEngine, PitchExtractor, DEFAULT_PITCH_THRESHOLD};
pub use session::load_session;
pub use text::SymbolEncoder;
pub use vocoder::{NsfVocoderAdapter, OrtVocoderEngine, NOISE_CHANNELS};
