use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use ndarray::Array3;
use tracing::{debug, info};
use tts_core::{AudioBuffer, SynthesisOutput};
use tts_signal::{downmix_to_mono, resample_linear};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;
const WAV_BITS: u16 = 24;

/// Output file stem for the `index`-th utterance (1-based).
pub fn utterance_base_name(index: usize, speaker: Option<i64>) -> String {
    match speaker {
        Some(spk) => format!("utterance_{index:03}_speaker_{spk:03}"),
        None => format!("utterance_{index:03}"),
    }
}

/// Reads a WAV file as mono float samples at its native rate.
pub fn load_wav_mono(path: &Path) -> Result<AudioBuffer> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open wav file {}", path.display()))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("failed to decode {}", path.display()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("failed to decode {}", path.display()))?
        }
    };
    let mono = downmix_to_mono(&samples, spec.channels as usize);
    debug!(
        path = %path.display(),
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        samples = mono.len(),
        "loaded wav"
    );
    Ok(AudioBuffer::new(mono, spec.sample_rate))
}

/// Like [`load_wav_mono`], resampled to `target_rate` when needed.
pub fn load_wav_at(path: &Path, target_rate: u32) -> Result<AudioBuffer> {
    let audio = load_wav_mono(path)?;
    if audio.sample_rate() == target_rate {
        return Ok(audio);
    }
    let resampled = resample_linear(audio.samples(), audio.sample_rate(), target_rate);
    Ok(AudioBuffer::new(resampled, target_rate))
}

/// Writes mono 24-bit PCM. Each 16-bit sample is widened by `<< 8`.
pub fn write_wav_24bit(path: &Path, pcm: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: WAV_BITS,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file {}", path.display()))?;
    for &sample in pcm {
        writer.write_sample(i32::from(sample) << 8)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Writes a little-endian f32 array as NumPy `.npy` (format 1.0, C order).
pub fn write_npy_f32(path: &Path, data: &[f32], shape: &[usize]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        bail!(
            "npy shape {shape:?} needs {expected} values, got {}",
            data.len()
        );
    }

    let header = npy_header("<f4", shape)?;
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    out.write_all(&header)?;
    for v in data {
        out.write_all(&v.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

fn npy_header(descr: &str, shape: &[usize]) -> Result<Vec<u8>> {
    let dims = match shape {
        [single] => format!("({single},)"),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {dims}, }}");
    // magic + version + u16 length + dict + '\n' must land on the alignment.
    let preamble = NPY_MAGIC.len() + 2 + 2;
    let unpadded = preamble + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let len = u16::try_from(dict.len()).context("npy header too long")?;
    let mut header = Vec::with_capacity(preamble + dict.len());
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&[1, 0]);
    header.extend_from_slice(&len.to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    Ok(header)
}

pub fn write_mel_npy(path: &Path, mel: &Array3<f32>) -> Result<()> {
    let data: Vec<f32> = mel.iter().copied().collect();
    write_npy_f32(path, &data, mel.shape())
}

/// Saves `<base>.npy` (mel) and `<base>.wav` into `folder`, creating it if
/// needed. Returns the path of the wav.
pub fn save_to_folder(base_name: &str, output: &SynthesisOutput, folder: &Path) -> Result<PathBuf> {
    fs::create_dir_all(folder)
        .with_context(|| format!("failed to create output folder {}", folder.display()))?;

    let npy = folder.join(format!("{base_name}.npy"));
    write_mel_npy(&npy, &output.mel)?;
    let wav = folder.join(format!("{base_name}.wav"));
    write_wav_24bit(&wav, &output.pcm.to_vec(), output.sample_rate)?;

    info!(wav = %wav.display(), mel = %npy.display(), "utterance saved");
    Ok(wav)
}
