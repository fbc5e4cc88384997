use rand::Rng;

/// Lower F0 bound of the coarse pitch scale, in Hz.
pub const F0_MIN_HZ: f64 = 50.0;
/// Upper F0 bound of the coarse pitch scale, in Hz.
pub const F0_MAX_HZ: f64 = 1100.0;
/// Smallest coarse code. Also the "no pitch" code for unvoiced frames.
pub const PITCH_COARSE_MIN: i64 = 1;
pub const PITCH_COARSE_MAX: i64 = 255;

/// Mel warping used by the pitch embedding: `1127 * ln(1 + f / 700)`.
#[inline]
pub fn hz_to_mel(f0_hz: f64) -> f64 {
    1127.0 * (1.0 + f0_hz / 700.0).ln()
}

/// Scales every F0 value by `2^(semitones / 12)`.
pub fn shift_semitones(f0: &mut [f32], semitones: f32) {
    if semitones == 0.0 {
        return;
    }
    let factor = 2.0_f32.powf(semitones / 12.0);
    for v in f0 {
        *v *= factor;
    }
}

/// Quantizes an F0 track into mel-warped codes in `[1, 255]`.
///
/// The mel range of `[F0_MIN_HZ, F0_MAX_HZ]` maps linearly onto `[1, 255]`,
/// everything outside is clipped and the result is rounded half to even.
/// Unvoiced frames (`0.0`) come out as `1`.
pub fn coarse_pitch_from_f0(f0: &[f32]) -> Vec<i64> {
    let mel_min = hz_to_mel(F0_MIN_HZ);
    let mel_max = hz_to_mel(F0_MAX_HZ);
    let span = (PITCH_COARSE_MAX - PITCH_COARSE_MIN) as f64;

    f0.iter()
        .map(|&hz| {
            let mut mel = hz_to_mel(hz as f64);
            if !mel.is_finite() {
                return PITCH_COARSE_MIN;
            }
            if mel > 0.0 {
                mel = (mel - mel_min) * span / (mel_max - mel_min) + PITCH_COARSE_MIN as f64;
            }
            let mel = mel.clamp(PITCH_COARSE_MIN as f64, PITCH_COARSE_MAX as f64);
            mel.round_ties_even() as i64
        })
        .collect()
}

/// Copies `f0` into the tail of `track`: `track[L - n..] = f0[..n]` with
/// `n = min(f0.len(), L)`. Earlier positions keep whatever they held.
///
/// Returns the index of the first overwritten frame.
pub fn write_right_aligned(track: &mut [f32], f0: &[f32]) -> usize {
    let n = f0.len().min(track.len());
    let start = track.len() - n;
    track[start..].copy_from_slice(&f0[..n]);
    start
}

/// Stretches an F0 track onto `frames` output frames by linear interpolation.
///
/// The first and last input frames land on the first and last output frames.
/// Where either neighbour is unvoiced (`<= 0`), the nearer one is taken so
/// voiced/unvoiced boundaries stay sharp.
pub fn resize_pitch_to_frames(f0: &[f32], frames: usize) -> Vec<f32> {
    if frames == 0 {
        return Vec::new();
    }
    match f0.len() {
        0 => return vec![0.0; frames],
        1 => return vec![f0[0]; frames],
        n if n == frames => return f0.to_vec(),
        _ => {}
    }

    let last = f0.len() - 1;
    let step = if frames > 1 {
        last as f64 / (frames - 1) as f64
    } else {
        0.0
    };
    (0..frames)
        .map(|i| {
            let pos = i as f64 * step;
            let left = (pos.floor() as usize).min(last);
            let right = (left + 1).min(last);
            let frac = (pos - left as f64) as f32;
            let (a, b) = (f0[left], f0[right]);
            if a > 0.0 && b > 0.0 {
                a + (b - a) * frac
            } else if frac < 0.5 {
                a
            } else {
                b
            }
        })
        .collect()
}

/// Converts a float waveform to 16-bit PCM as `round(x * 32767)`.
///
/// There is no clipping stage; values past full scale saturate in the cast.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&x| (x * i16::MAX as f32).round() as i16)
        .collect()
}

/// Simple linear-interpolation resampler.
///
/// Good enough to bring a pitch reference to the extractor rate; it is not a
/// band-limited resampler.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return Vec::new();
    }
    if src_rate == dst_rate {
        return samples.to_vec();
    }

    let ratio = dst_rate as f64 / src_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = (i as f64) / ratio;
        let left = (src_pos.floor() as usize).min(samples.len() - 1);
        let right = (left + 1).min(samples.len() - 1);
        let frac = (src_pos - left as f64) as f32;

        let v = samples[left] * (1.0 - frac) + samples[right] * frac;
        out.push(v);
    }

    out
}

/// Averages interleaved frames down to one channel.
pub fn downmix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Fills `out` with standard-normal samples (Box-Muller over `rng`).
pub fn fill_standard_normal<R: Rng + ?Sized>(rng: &mut R, out: &mut [f32]) {
    for v in out.iter_mut() {
        *v = next_standard_normal(rng);
    }
}

fn next_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    let u1 = rng.gen::<f32>().clamp(1e-7, 1.0 - 1e-7);
    let u2 = rng.gen::<f32>();
    let r = (-2.0_f32 * u1.ln()).sqrt();
    let theta = 2.0_f32 * std::f32::consts::PI * u2;
    r * theta.cos()
}
