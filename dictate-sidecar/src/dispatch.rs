//! Dispatcher (C10): method table + error mapping.
//!
//! Per §9's redesign note, this replaces a runtime string-keyed handler
//! registry with a compile-time tagged `match` over a fixed method list —
//! an unrecognized method can never be silently "registered", it falls
//! through to `E_METHOD_NOT_FOUND`.

use std::sync::Arc;

use serde_json::{json, Value};

use dictate_core::{asr::DevicePref, audio::device::list_input_devices, resources, DictateError};

use crate::protocol::{self, Request, Response};
use crate::state::SidecarState;
use crate::{meter, model, recording, replacements};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: &str = "v1";

/// Methods this dispatcher implements, required plus optional (§4.2). Used
/// by `system.info`'s capability advertisement and by the self-test.
pub const REQUIRED_METHODS: &[&str] = &[
    "system.ping",
    "system.info",
    "system.shutdown",
    "status.get",
    "audio.list_devices",
    "audio.set_device",
    "audio.meter_start",
    "audio.meter_stop",
    "recording.start",
    "recording.stop",
    "recording.cancel",
    "asr.initialize",
    "model.get_status",
    "model.download",
    "model.purge_cache",
    "replacements.get_rules",
    "replacements.set_rules",
    "replacements.get_presets",
    "replacements.get_preset_rules",
    "replacements.preview",
];

pub const OPTIONAL_METHODS: &[&str] = &[
    "asr.status",
    "audio.meter_status",
    "recording.status",
    "model.install",
];

/// Dispatches one request, returning the response to write and whether the
/// process should exit cleanly after writing it (`system.shutdown`).
pub fn dispatch(state: &Arc<SidecarState>, request: Request) -> (Response, bool) {
    protocol::log(&format!(
        "received: {} (id={:?})",
        request.method,
        request.id.as_ref().map(|v| v.to_string())
    ));

    let mut shutdown = false;
    let result = match request.method.as_str() {
        "system.ping" => Ok(handle_ping()),
        "system.info" => Ok(handle_info()),
        "system.shutdown" => {
            shutdown = true;
            Ok(json!({ "status": "shutting_down" }))
        }
        "status.get" => Ok(handle_status(state)),
        "audio.list_devices" => Ok(handle_list_devices()),
        "audio.set_device" => handle_set_device(state, request.params),
        "audio.meter_start" => meter::start(state, request.params),
        "audio.meter_stop" => meter::stop(state),
        "audio.meter_status" => Ok(meter::status(state)),
        "recording.start" => recording::start(state, request.params),
        "recording.stop" => recording::stop(state, request.params),
        "recording.cancel" => recording::cancel(state, request.params),
        "recording.status" => Ok(handle_recording_status(state)),
        "asr.initialize" => handle_asr_initialize(state, request.params),
        "asr.status" => Ok(handle_asr_status(state)),
        "model.get_status" => model::get_status(state, request.params),
        "model.download" | "model.install" => model::download(state, request.params),
        "model.purge_cache" => model::purge_cache(state, request.params),
        "replacements.get_rules" => Ok(replacements::get_rules(state)),
        "replacements.set_rules" => replacements::set_rules(state, request.params),
        "replacements.get_presets" => replacements::get_presets(),
        "replacements.get_preset_rules" => replacements::get_preset_rules(request.params),
        "replacements.preview" => replacements::preview(state, request.params),
        other => {
            let response = protocol::make_error(
                request.id.clone(),
                protocol::ERROR_METHOD_NOT_FOUND,
                format!("method not found: {other}"),
                "E_METHOD_NOT_FOUND",
            );
            return (response, shutdown);
        }
    };

    let response = match result {
        Ok(value) => protocol::make_success(request.id, value),
        Err(err) => {
            protocol::log(&format!("error handling {}: {}", request.method, err.kind()));
            protocol::error_response(request.id, &err)
        }
    };
    (response, shutdown)
}

fn handle_ping() -> Value {
    json!({ "version": VERSION, "protocol": PROTOCOL_VERSION })
}

fn handle_info() -> Value {
    let paths = resources::resource_paths();
    let path_or_null = |p: &Option<std::path::PathBuf>| {
        p.as_ref()
            .map(|p| Value::String(p.display().to_string()))
            .unwrap_or(Value::Null)
    };

    json!({
        "version": VERSION,
        "protocol": PROTOCOL_VERSION,
        "capabilities": {
            "methods": REQUIRED_METHODS,
            "optional_methods": OPTIONAL_METHODS,
            "asr": true,
            "replacements": true,
            "meter": true,
        },
        "runtime": {
            "runtime_version": VERSION,
            "platform": std::env::consts::OS,
            "cuda_available": false,
        },
        "resource_paths": {
            "shared_root": path_or_null(&paths.shared_root),
            "presets": path_or_null(&paths.presets),
            "model_manifest": path_or_null(&paths.model_manifest),
            "model_catalog": path_or_null(&paths.model_catalog),
            "contracts_dir": path_or_null(&paths.contracts_dir),
        },
    })
}

fn handle_status(state: &Arc<SidecarState>) -> Value {
    let recording_session = state.active_recording_session();
    let asr_status = state.asr.status();

    let top_state = if recording_session.is_some() {
        "recording"
    } else if state.tracker.has_pending() {
        "transcribing"
    } else {
        use dictate_core::AsrState;
        match asr_status.state {
            AsrState::Downloading | AsrState::Loading => "loading_model",
            AsrState::Error => "error",
            AsrState::Uninitialized | AsrState::Ready => "idle",
        }
    };

    let mut body = json!({ "state": top_state });
    if let Some(session_id) = &recording_session {
        body["session_id"] = json!(session_id);
    }
    if let Some(model_id) = &asr_status.model_id {
        use dictate_core::AsrState;
        let model_status = match asr_status.state {
            AsrState::Downloading => "downloading",
            AsrState::Loading => "verifying",
            AsrState::Ready => "ready",
            AsrState::Error => "error",
            AsrState::Uninitialized => "missing",
        };
        body["model"] = json!({ "model_id": model_id, "status": model_status });
    }
    body
}

fn handle_recording_status(state: &Arc<SidecarState>) -> Value {
    match state.active_recording_session() {
        Some(session_id) => json!({ "recording": true, "session_id": session_id }),
        None => json!({ "recording": false }),
    }
}

fn handle_list_devices() -> Value {
    let devices = list_input_devices();
    json!({ "devices": devices })
}

fn handle_set_device(
    state: &Arc<SidecarState>,
    params: Value,
) -> dictate_core::Result<Value> {
    #[derive(serde::Deserialize)]
    struct Params {
        device_uid: String,
    }
    let params: Params = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;
    let device = dictate_core::audio::device::find_device_by_uid(&params.device_uid)
        .ok_or(DictateError::DeviceNotFound {
            uid: params.device_uid.clone(),
        })?;
    state.device.set(device);
    Ok(json!({ "device_uid": params.device_uid }))
}

fn handle_asr_initialize(
    state: &Arc<SidecarState>,
    params: Value,
) -> dictate_core::Result<Value> {
    #[derive(serde::Deserialize)]
    struct Params {
        model_id: String,
        #[serde(default)]
        device_pref: Option<String>,
        #[serde(default)]
        language: Option<String>,
    }
    let params: Params = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;

    let device_pref = match params.device_pref.as_deref() {
        Some(pref) => DevicePref::parse(pref)?,
        None => DevicePref::Auto,
    };

    let output = Arc::clone(&state.output);
    let result = state.asr.initialize(
        &state.cache_root,
        &params.model_id,
        device_pref,
        params.language.as_deref(),
        move |progress| {
            output.write_notification(&protocol::notification(
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
        },
    )?;

    Ok(json!({
        "status": result.status,
        "model_id": result.model_id,
        "device": result.device,
    }))
}

fn handle_asr_status(state: &Arc<SidecarState>) -> Value {
    let status = state.asr.status();
    json!({
        "state": status.state,
        "ready": status.ready,
        "model_id": status.model_id,
        "device": status.device,
    })
}
