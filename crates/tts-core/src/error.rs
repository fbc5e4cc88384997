use thiserror::Error;

pub type Result<T> = std::result::Result<T, TtsError>;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("inference engine error: {0}")]
    Inference(String),
    #[error("shape error: {0}")]
    Shape(String),
    #[error("empty input: {0}")]
    EmptyInput(String),
    #[error("{extractor} failed: {source}")]
    Extraction {
        extractor: String,
        #[source]
        source: Box<TtsError>,
    },
    #[error("unsupported device '{0}': only cpu execution is available")]
    UnsupportedDevice(String),
}

impl TtsError {
    pub fn extraction(extractor: impl Into<String>, source: TtsError) -> Self {
        Self::Extraction {
            extractor: extractor.into(),
            source: Box::new(source),
        }
    }
}
