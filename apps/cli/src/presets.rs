use std::ops::RangeInclusive;

use anyhow::{bail, Result};
use clap::ValueEnum;
use tracing::warn;

/// Pretrained acoustic model families with known speaking rate and speakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelKind {
    #[value(name = "matcha_ljspeech")]
    MatchaLjspeech,
    #[value(name = "matcha_vctk")]
    MatchaVctk,
    /// Any other export; no speaker checks, speaking rate 1.0.
    #[value(name = "custom")]
    Custom,
}

#[derive(Debug, Clone)]
pub struct Preset {
    pub speaking_rate: f32,
    pub default_speaker: Option<i64>,
    pub speakers: Option<RangeInclusive<i64>>,
}

impl ModelKind {
    pub fn preset(self) -> Option<Preset> {
        match self {
            Self::MatchaLjspeech => Some(Preset {
                speaking_rate: 0.95,
                default_speaker: None,
                speakers: None,
            }),
            Self::MatchaVctk => Some(Preset {
                speaking_rate: 0.85,
                default_speaker: Some(0),
                speakers: Some(0..=107),
            }),
            Self::Custom => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub speaker: Option<i64>,
    pub speaking_rate: f32,
}

/// Fills speaking rate and speaker from the preset.
///
/// Out-of-range speakers are errors. A missing speaker on a multi-speaker
/// model, or a speaker given to a single-speaker model, only warns.
pub fn resolve(model: ModelKind, speaker: Option<i64>, speaking_rate: Option<f32>) -> Result<Resolved> {
    let resolved = match model.preset() {
        None => Resolved {
            speaker,
            speaking_rate: speaking_rate.unwrap_or(1.0),
        },
        Some(preset) => {
            let speaking_rate = speaking_rate.unwrap_or(preset.speaking_rate);
            let speaker = match (&preset.speakers, speaker) {
                (Some(range), Some(spk)) => {
                    if !range.contains(&spk) {
                        bail!(
                            "speaker id must be between {} and {} for {model:?}",
                            range.start(),
                            range.end()
                        );
                    }
                    Some(spk)
                }
                (Some(_), None) => {
                    warn!(
                        speaker = ?preset.default_speaker,
                        "speaker id not provided, using the preset default"
                    );
                    preset.default_speaker
                }
                (None, given) => {
                    if given != preset.default_speaker {
                        warn!(speaker = ?given, "ignoring speaker id for {model:?}");
                    }
                    preset.default_speaker
                }
            };
            Resolved {
                speaker,
                speaking_rate,
            }
        }
    };

    if !(resolved.speaking_rate > 0.0) {
        bail!("speaking rate must be greater than 0");
    }
    Ok(resolved)
}
