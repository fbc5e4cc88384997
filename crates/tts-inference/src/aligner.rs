//! Frame-rate reconciliation between acoustic / hidden-unit features and the
//! NSF vocoder input contract.

use ndarray::{Array3, ArrayView3};
use tts_core::{Result, TtsError};

/// The vocoder consumes features at twice the native hidden rate.
pub const UPSAMPLE_FACTOR: usize = 2;

/// Nearest-neighbour time upsampling by [`UPSAMPLE_FACTOR`].
///
/// Stands in for a learned length regulator: every source frame is repeated,
/// nothing is interpolated.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameAligner;

impl FrameAligner {
    /// `[1, depth, T]` mel to `[1, 2T, depth]` vocoder features.
    ///
    /// Output frames `2t` and `2t + 1` are exact copies of input frame `t`.
    pub fn align(mel: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (batch, depth, frames) = mel.dim();
        check_dims("mel", batch, depth, frames)?;

        let mut out = Array3::<f32>::zeros((1, frames * UPSAMPLE_FACTOR, depth));
        for t in 0..frames {
            for r in 0..UPSAMPLE_FACTOR {
                let dst = t * UPSAMPLE_FACTOR + r;
                for c in 0..depth {
                    out[(0, dst, c)] = mel[(0, c, t)];
                }
            }
        }
        Ok(out)
    }

    /// `[1, F, depth]` time-leading features to `[1, 2F, depth]`.
    pub fn upsample(features: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (batch, frames, depth) = features.dim();
        check_dims("features", batch, depth, frames)?;

        let mut out = Array3::<f32>::zeros((1, frames * UPSAMPLE_FACTOR, depth));
        for t in 0..frames {
            let src = features.slice(ndarray::s![0, t, ..]);
            for r in 0..UPSAMPLE_FACTOR {
                out.slice_mut(ndarray::s![0, t * UPSAMPLE_FACTOR + r, ..])
                    .assign(&src);
            }
        }
        Ok(out)
    }
}

fn check_dims(label: &str, batch: usize, depth: usize, frames: usize) -> Result<()> {
    if batch != 1 {
        return Err(TtsError::Shape(format!(
            "{label} batch must be 1, got {batch}"
        )));
    }
    if frames == 0 {
        return Err(TtsError::EmptyInput(format!("{label} has zero time frames")));
    }
    if depth == 0 {
        return Err(TtsError::Shape(format!("{label} has zero feature depth")));
    }
    Ok(())
}
