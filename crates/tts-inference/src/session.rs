use std::path::Path;

use ort::{
    ep::{self, ExecutionProviderDispatch},
    session::{builder::GraphOptimizationLevel, Session, SessionInputValue},
    value::Tensor,
};
use tracing::info;
use tts_core::{ExecutionDevice, Result, TtsError};

pub(crate) fn map_ort<T>(context: &str, result: ort::Result<T>) -> Result<T> {
    result.map_err(|e| TtsError::Inference(format!("{context}: {e}")))
}

fn execution_providers(device: ExecutionDevice) -> Vec<ExecutionProviderDispatch> {
    match device {
        ExecutionDevice::Cpu => vec![ep::CPU::default().build().error_on_failure()],
    }
}

/// Loads an ONNX model on the requested device.
///
/// The device is checked by the caller through [`ExecutionDevice::parse`], so a
/// non-CPU request never reaches the filesystem.
pub fn load_session(model_path: &Path, device: ExecutionDevice, label: &str) -> Result<Session> {
    if !model_path.exists() {
        return Err(TtsError::Config(format!(
            "{label} model file not found: {}",
            model_path.display()
        )));
    }

    let eps = execution_providers(device);
    let session = map_ort(
        &format!("failed to load {label} onnx model {}", model_path.display()),
        Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_execution_providers(eps))
            .and_then(|b| b.commit_from_file(model_path)),
    )?;
    info!(
        model = %model_path.display(),
        inputs = ?input_names(&session),
        outputs = ?output_names(&session),
        "loaded {label} session"
    );
    Ok(session)
}

pub(crate) fn input_names(session: &Session) -> Vec<String> {
    session
        .inputs()
        .iter()
        .map(|v| v.name().to_string())
        .collect()
}

pub(crate) fn output_names(session: &Session) -> Vec<String> {
    session
        .outputs()
        .iter()
        .map(|v| v.name().to_string())
        .collect()
}

/// Declared rank of a named input, if the model fixes it.
pub(crate) fn input_rank(session: &Session, name: &str) -> Option<usize> {
    session
        .inputs()
        .iter()
        .find(|v| v.name() == name)
        .and_then(|v| v.dtype().tensor_shape().map(|shape| shape.len()))
}

/// Picks the first name containing one of `keywords` (in keyword order),
/// falling back to the first available name.
pub(crate) fn resolve_single_io_name(
    available: &[String],
    keywords: &[&str],
    label: &str,
) -> Result<String> {
    for key in keywords {
        if let Some(found) = available
            .iter()
            .find(|name| name.to_ascii_lowercase().contains(key))
        {
            return Ok(found.clone());
        }
    }

    available.first().cloned().ok_or_else(|| {
        TtsError::Config(format!(
            "failed to infer {label}; model has no matching inputs/outputs"
        ))
    })
}

pub(crate) fn position_of(available: &[String], keywords: &[&str]) -> Option<usize> {
    keywords.iter().find_map(|key| {
        available
            .iter()
            .position(|name| name.to_ascii_lowercase().contains(key))
    })
}

pub(crate) fn f32_input(
    label: &str,
    shape: Vec<i64>,
    data: Vec<f32>,
) -> Result<SessionInputValue<'static>> {
    let tensor = map_ort(
        &format!("failed to create {label} tensor"),
        Tensor::<f32>::from_array((shape, data)),
    )?;
    Ok(SessionInputValue::from(tensor))
}

pub(crate) fn i64_input(
    label: &str,
    shape: Vec<i64>,
    data: Vec<i64>,
) -> Result<SessionInputValue<'static>> {
    let tensor = map_ort(
        &format!("failed to create {label} tensor"),
        Tensor::<i64>::from_array((shape, data)),
    )?;
    Ok(SessionInputValue::from(tensor))
}

/// Audio as a `[N]`, `[1, N]` or `[1, 1, N]` tensor depending on the declared rank.
pub(crate) fn audio_input(
    label: &str,
    rank: usize,
    samples: &[f32],
) -> Result<SessionInputValue<'static>> {
    let n = samples.len() as i64;
    let shape = match rank {
        1 => vec![n],
        2 => vec![1, n],
        _ => vec![1, 1, n],
    };
    f32_input(label, shape, samples.to_vec())
}

pub(crate) fn dims(shape: &[i64]) -> Vec<usize> {
    shape.iter().map(|&d| d.max(0) as usize).collect()
}
