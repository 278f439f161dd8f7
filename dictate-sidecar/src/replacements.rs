//! `replacements.*` handlers: thin wiring over the text pipeline (C4) and
//! the preset catalog resource (C2).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use dictate_core::resources::{self, PRESETS_REL};
use dictate_core::text::{self, Preset, ReplacementRule};
use dictate_core::{DictateError, Result};

use crate::state::SidecarState;

pub fn get_rules(state: &Arc<SidecarState>) -> Value {
    let rules = state.rules.lock().clone();
    json!({ "rules": rules })
}

#[derive(Debug, Deserialize)]
pub struct SetRulesParams {
    pub rules: Vec<ReplacementRule>,
}

pub fn set_rules(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: SetRulesParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;
    text::validate_rule_set(&params.rules)?;
    *state.rules.lock() = params.rules.clone();
    Ok(json!({ "rules": params.rules }))
}

fn load_presets() -> Result<Vec<Preset>> {
    let path = resources::resolve_shared_path(PRESETS_REL)?;
    let bytes = std::fs::read(&path)?;
    let presets: Vec<Preset> = serde_json::from_slice(&bytes).map_err(anyhow::Error::from)?;
    Ok(presets)
}

pub fn get_presets() -> Result<Value> {
    let presets = load_presets()?;
    let summaries: Vec<Value> = presets
        .iter()
        .map(|p| json!({"id": p.id, "name": p.name, "description": p.description, "rule_count": p.rules.len()}))
        .collect();
    Ok(json!({ "presets": summaries }))
}

#[derive(Debug, Deserialize)]
pub struct PresetIdParams {
    pub preset_id: String,
}

pub fn get_preset_rules(params: Value) -> Result<Value> {
    let params: PresetIdParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;
    let presets = load_presets()?;
    let preset = presets
        .into_iter()
        .find(|p| p.id == params.preset_id)
        .ok_or_else(|| DictateError::Other(anyhow::anyhow!("unknown preset: {}", params.preset_id)))?;
    Ok(json!({ "rules": preset.namespaced_rules() }))
}

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub text: String,
    #[serde(default)]
    pub rules: Option<Vec<ReplacementRule>>,
}

pub fn preview(state: &Arc<SidecarState>, params: Value) -> Result<Value> {
    let params: PreviewParams = serde_json::from_value(params)
        .map_err(|e| DictateError::Other(anyhow::anyhow!("invalid params: {e}")))?;
    let rules = match params.rules {
        Some(rules) => rules,
        None => state.rules.lock().clone(),
    };
    let outcome = text::process(&params.text, &rules)?;
    Ok(json!({ "text": outcome.text, "truncated": outcome.truncated }))
}
