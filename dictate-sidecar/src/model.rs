//! `model.get_status` / `model.download` / `model.purge_cache` (C8 wiring).
//!
//! `model.download` blocks the calling thread for the duration of the
//! install and emits `event.model_progress` from that same thread (§5) —
//! it does not spawn a detached task the way transcription does.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use dictate_core::cache::{self, ModelStatus};
use dictate_core::{asr, DictateError, Result};

use crate::state::SidecarState;

#[derive(Debug, Deserialize)]
pub struct ModelIdParams {
    pub model_id: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct PurgeParams {
    #[serde(default)]
    pub model_id: Option<String>,
}

fn status_str(status: ModelStatus) -> &'static str {
    match status {
        ModelStatus::Missing => "missing",
        ModelStatus::Downloading => "downloading",
        ModelStatus::Verifying => "verifying",
        ModelStatus::Ready => "ready",
        ModelStatus::Error => "error",
    }
}

pub fn get_status(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: ModelIdParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;
    let status = cache::status_of(&state.cache_root, &params.model_id);
    Ok(json!({
        "model_id": params.model_id,
        "status": status_str(status),
    }))
}

pub fn download(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: ModelIdParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;

    let manifest = asr::load_manifest(&params.model_id)?;
    let model_id = params.model_id.clone();
    let output = Arc::clone(&state.output);

    let dir = cache::install_model(&state.cache_root, &manifest, move |progress| {
        output.write_notification(&crate::protocol::notification(
            "event.model_progress",
            json!({
                "model_id": progress.model_id,
                "current": progress.current,
                "total": progress.total,
                "unit": "bytes",
                "current_file": progress.current_file,
                "files_completed": progress.files_completed,
                "files_total": progress.files_total,
            }),
        ));
    })?;

    Ok(json!({
        "model_id": model_id,
        "status": "ready",
        "path": dir.display().to_string(),
    }))
}

pub fn purge_cache(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: PurgeParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;

    match &params.model_id {
        Some(model_id) => {
            if state.asr.loaded_model_id().as_deref() == Some(model_id.as_str()) {
                return Err(DictateError::ModelInUse);
            }
            cache::purge_model(&state.cache_root, model_id)?;
        }
        None if !state.cache_root.is_dir() => {}
        None => {
            let entries = std::fs::read_dir(&state.cache_root).map_err(DictateError::Io)?;
            for entry in entries.flatten() {
                if !entry.path().is_dir() {
                    continue;
                }
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name == ".partial" {
                    continue;
                }
                if state.asr.loaded_model_id().as_deref() == Some(name.as_ref()) {
                    return Err(DictateError::ModelInUse);
                }
            }
            for entry in std::fs::read_dir(&state.cache_root).map_err(DictateError::Io)? {
                let entry = entry.map_err(DictateError::Io)?;
                if entry.path().is_dir() && entry.file_name() != ".partial" {
                    let name = entry.file_name();
                    cache::purge_model(&state.cache_root, &name.to_string_lossy())?;
                }
            }
        }
    }

    Ok(json!({ "purged": true }))
}
