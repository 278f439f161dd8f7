//! Locates bundled resources (presets, model manifests, contracts) across
//! dev, packaged, and bundled layouts.
//!
//! Search order, first existing candidate wins: env override
//! (`DICTATE_SHARED_ROOT`) → frozen bundle extraction dir → repo layout
//! three ancestors up from this crate → executable-relative `shared/` →
//! macOS `Resources/shared/` → current working directory.

use std::env;
use std::path::PathBuf;

use crate::error::{DictateError, Result};

pub const PRESETS_REL: &str = "replacements/PRESETS.json";
pub const MODEL_MANIFEST_REL: &str = "model/MODEL_MANIFEST.json";
pub const MODEL_CATALOG_REL: &str = "model/MODEL_CATALOG.json";
pub const CONTRACTS_DIR_REL: &str = "contracts";
pub const MODEL_MANIFESTS_DIR_REL: &str = "model/manifests";

const SHARED_ROOT_ENV: &str = "DICTATE_SHARED_ROOT";
const FROZEN_BUNDLE_ENV: &str = "DICTATE_BUNDLE_DIR";

fn shared_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();

    if let Ok(root) = env::var(SHARED_ROOT_ENV) {
        if !root.trim().is_empty() {
            out.push(PathBuf::from(root));
        }
    }

    if let Ok(bundle_dir) = env::var(FROZEN_BUNDLE_ENV) {
        if !bundle_dir.trim().is_empty() {
            out.push(PathBuf::from(bundle_dir).join("shared"));
        }
    }

    // Repo layout: crate_root/../shared (dictate-core/src/resources.rs -> workspace/shared)
    let this_file = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if let Some(workspace_root) = this_file.parent() {
        out.push(workspace_root.join("shared"));
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            out.push(exe_dir.join("shared"));
            // macOS app bundle: Contents/MacOS/<exe> -> Contents/Resources/shared
            if let Some(contents_dir) = exe_dir.parent() {
                out.push(contents_dir.join("Resources").join("shared"));
            }
        }
    }

    if let Ok(cwd) = env::current_dir() {
        out.push(cwd.join("shared"));
    }

    out
}

/// Returns the first existing path among the search candidates for
/// `relative` (a path fragment under `shared/`).
pub fn resolve_shared_path(relative: &str) -> Result<PathBuf> {
    let mut tried = Vec::new();
    for candidate_root in shared_candidates() {
        let candidate = candidate_root.join(relative);
        if candidate.exists() {
            return Ok(candidate);
        }
        tried.push(candidate);
    }
    Err(DictateError::ResourceNotFound {
        relative: relative.to_string(),
        tried,
    })
}

pub fn resolve_shared_path_optional(relative: &str) -> Option<PathBuf> {
    resolve_shared_path(relative).ok()
}

/// Diagnostic listing of every candidate root checked, whether or not it
/// currently exists on disk.
pub fn list_shared_candidates() -> Vec<PathBuf> {
    shared_candidates()
}

/// Resolved paths surfaced in `system.info.resource_paths`.
pub struct ResourcePaths {
    pub shared_root: Option<PathBuf>,
    pub presets: Option<PathBuf>,
    pub model_manifest: Option<PathBuf>,
    pub model_catalog: Option<PathBuf>,
    pub contracts_dir: Option<PathBuf>,
}

pub fn resource_paths() -> ResourcePaths {
    ResourcePaths {
        shared_root: shared_candidates().into_iter().find(|p| p.exists()),
        presets: resolve_shared_path_optional(PRESETS_REL),
        model_manifest: resolve_shared_path_optional(MODEL_MANIFEST_REL),
        model_catalog: resolve_shared_path_optional(MODEL_CATALOG_REL),
        contracts_dir: resolve_shared_path_optional(CONTRACTS_DIR_REL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_resource_lists_every_tried_path() {
        let err = resolve_shared_path("definitely/does/not/exist.json").unwrap_err();
        match err {
            DictateError::ResourceNotFound { relative, tried } => {
                assert_eq!(relative, "definitely/does/not/exist.json");
                assert!(!tried.is_empty());
            }
            other => panic!("expected ResourceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn candidate_list_is_never_empty() {
        assert!(!list_shared_candidates().is_empty());
    }
}
