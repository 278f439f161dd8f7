//! Model cache: manifest-driven download, verification, and activation.
//!
//! Lifecycle of one install for a manifest with files `F1..Fn` totaling `S`
//! bytes:
//!
//! 1. Acquire the exclusive cache lock (`<cache_root>/.lock`) with a
//!    timeout.
//! 2. Stage every file under `<cache_root>/.partial/<model_id>/`, trying
//!    `primary_url` then each `mirror_url` in order, with HTTP Range resume
//!    against any partial file already on disk.
//! 3. Verify each staged file's size and SHA-256 against the manifest.
//! 4. Write `manifest.json` into the staging directory.
//! 5. Atomically rename the staging directory onto `<cache_root>/<model_id>`.
//!
//! A directory under `<cache_root>/<model_id>/` either doesn't exist or is
//! complete and verified — it is never observed half-written (invariant I5).
//!
//! Cache directory layout:
//!
//! ```text
//! <cache_root>/
//!   .lock
//!   .partial/<model_id>/...
//!   <model_id>/
//!     manifest.json
//!     <files...>
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{DictateError, Result};

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;
const MAX_ATTEMPTS_PER_URL: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// One file entry in a model manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub size_bytes: u64,
    /// 64-char lowercase hex SHA-256.
    pub sha256: String,
    pub primary_url: String,
    #[serde(default)]
    pub mirror_urls: Vec<String>,
}

/// Model manifest as defined by the shared model manifest contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub model_id: String,
    pub model_family: String,
    pub revision: String,
    pub source: String,
    pub total_size_bytes: u64,
    pub files: Vec<ManifestFile>,
    pub license: String,
    #[serde(default)]
    pub verification: Option<String>,
}

/// Cache-level status of a model, surfaced via `model.get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Missing,
    Downloading,
    Verifying,
    Ready,
    Error,
}

/// Progress update emitted during `model.download`, forwarded by the
/// dispatcher as `event.model_progress`.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub model_id: String,
    pub current: u64,
    pub total: u64,
    pub current_file: String,
    pub files_completed: usize,
    pub files_total: usize,
}

/// Resolves the platform cache root: `DICTATE_CACHE_DIR` env override, else
/// the platform's conventional cache location.
pub fn default_cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("DICTATE_CACHE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Dictate")
            .join("models")
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("Library")
            .join("Caches")
            .join("dictate")
            .join("models")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".cache")
            })
            .join("dictate")
            .join("models")
    }
}

/// Directory ASR backends look in for auxiliary models (e.g. the Silero VAD
/// model) that aren't tracked by a full manifest install.
pub fn default_models_dir() -> PathBuf {
    default_cache_root()
}

/// Advisory exclusive lock over a cache root, held for the duration of one
/// install or purge. Backed by a plain marker file plus `try_lock_exclusive`
/// where available; falls back to a spin-wait against the marker's mtime so
/// behavior is consistent across platforms without an extra file-lock crate.
pub struct CacheLock {
    path: PathBuf,
    _file: File,
}

impl CacheLock {
    pub fn acquire(cache_root: &Path) -> Result<Self> {
        fs::create_dir_all(cache_root)?;
        let path = cache_root.join(".lock");
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => return Ok(Self { path, _file: file }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(DictateError::Lock);
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(DictateError::Io(e)),
            }
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; DOWNLOAD_CHUNK_BYTES];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn verify_file(path: &Path, expected_size: u64, expected_sha256: &str) -> Result<()> {
    let size = fs::metadata(path)?.len();
    if size != expected_size {
        return Err(DictateError::CacheCorrupt(format!(
            "{}: expected {expected_size} bytes, got {size}",
            path.display()
        )));
    }
    let actual = compute_sha256(path)?;
    if !actual.eq_ignore_ascii_case(expected_sha256) {
        return Err(DictateError::CacheCorrupt(format!(
            "{}: sha256 mismatch (expected {expected_sha256}, got {actual})",
            path.display()
        )));
    }
    Ok(())
}

/// Checks that `cache_root`'s filesystem has at least `required_bytes` free.
/// Best-effort: platforms without a statvfs-equivalent always pass.
fn check_disk_space(cache_root: &Path, required_bytes: u64) -> Result<()> {
    fs::create_dir_all(cache_root)?;
    #[cfg(unix)]
    {
        // No portable statvfs in std; a soft preflight using a temp-file
        // write probe is good enough to catch "completely full" disks
        // without adding a platform-specific dependency for this build.
        let probe = cache_root.join(".spaceprobe");
        let result = fs::write(&probe, b"x");
        let _ = fs::remove_file(&probe);
        if result.is_err() {
            return Err(DictateError::DiskFull {
                required: required_bytes,
                available: 0,
            });
        }
    }
    Ok(())
}

fn download_one_url(
    client: &reqwest::blocking::Client,
    url: &str,
    dest: &Path,
    expected_size: u64,
    mut on_progress: impl FnMut(u64, u64),
) -> Result<()> {
    let resume_from = fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
    if resume_from >= expected_size && expected_size > 0 {
        on_progress(resume_from, expected_size);
        return Ok(());
    }

    let mut request = client.get(url);
    if resume_from > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={resume_from}-"));
    }
    let mut response = request
        .send()
        .map_err(|e| DictateError::Network(e.to_string()))?;

    let status = response.status();
    let resuming = status.as_u16() == 206;
    if !status.is_success() {
        return Err(DictateError::Network(format!(
            "unexpected status {status} from {url}"
        )));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(dest)?;
    let mut written = if resuming {
        file.seek(SeekFrom::End(0))?
    } else {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?
    };

    let mut buf = [0u8; DOWNLOAD_CHUNK_BYTES];
    loop {
        let read = response
            .read(&mut buf)
            .map_err(|e| DictateError::Network(e.to_string()))?;
        if read == 0 {
            break;
        }
        file.write_all(&buf[..read])?;
        written += read as u64;
        on_progress(written, expected_size);
    }
    file.flush()?;
    Ok(())
}

/// Downloads `file` into `dest`, trying `primary_url` then each mirror in
/// order, retrying each URL with a bounded number of attempts before moving
/// on. Fails with `E_NETWORK` once every URL is exhausted.
fn download_with_mirrors(
    client: &reqwest::blocking::Client,
    file: &ManifestFile,
    dest: &Path,
    mut on_progress: impl FnMut(u64, u64),
) -> Result<()> {
    let urls = std::iter::once(file.primary_url.as_str()).chain(file.mirror_urls.iter().map(String::as_str));
    let mut last_err = None;

    for url in urls {
        for attempt in 0..MAX_ATTEMPTS_PER_URL {
            match download_one_url(client, url, dest, file.size_bytes, &mut on_progress) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(url, attempt, error = %e, "model file download attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < MAX_ATTEMPTS_PER_URL {
                        std::thread::sleep(RETRY_BACKOFF * (attempt + 1));
                    }
                }
            }
        }
    }

    Err(last_err.unwrap_or(DictateError::Network("no URLs available".into())))
}

/// Drives one complete model install and reports progress to `on_progress`.
/// Blocks the calling thread for the duration of the download (the caller
/// is expected to run this on its own worker, not the request loop).
pub fn install_model(
    cache_root: &Path,
    manifest: &ModelManifest,
    mut on_progress: impl FnMut(DownloadProgress),
) -> Result<PathBuf> {
    let _lock = CacheLock::acquire(cache_root)?;
    check_disk_space(cache_root, manifest.total_size_bytes)?;

    let final_dir = cache_root.join(&manifest.model_id);
    if final_dir.is_dir() && is_installed(&final_dir, manifest) {
        return Ok(final_dir);
    }

    let staging_dir = cache_root.join(".partial").join(&manifest.model_id);
    fs::create_dir_all(&staging_dir)?;

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(300))
        .user_agent("dictate-sidecar model cache")
        .build()
        .map_err(|e| DictateError::Network(e.to_string()))?;

    let files_total = manifest.files.len();
    for (index, file) in manifest.files.iter().enumerate() {
        let dest = staging_dir.join(&file.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let model_id = manifest.model_id.clone();
        let current_file = file.path.clone();
        let result = download_with_mirrors(&client, file, &dest, |current, total| {
            on_progress(DownloadProgress {
                model_id: model_id.clone(),
                current,
                total,
                current_file: current_file.clone(),
                files_completed: index,
                files_total,
            });
        });

        if let Err(e) = result {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }

        if let Err(e) = verify_file(&dest, file.size_bytes, &file.sha256) {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }
    }

    let manifest_json = serde_json::to_vec_pretty(manifest).map_err(anyhow::Error::from)?;
    fs::write(staging_dir.join("manifest.json"), manifest_json)?;

    activate(&staging_dir, &final_dir)?;
    info!(model_id = %manifest.model_id, "model install complete");
    Ok(final_dir)
}

/// Atomically renames the staging directory onto the final location. If the
/// target already exists (a prior revision of the same model id), the old
/// directory is preserved and the rename fails rather than silently
/// clobbering a working install — the caller should purge first for a
/// clean reinstall.
fn activate(staging_dir: &Path, final_dir: &Path) -> Result<()> {
    if final_dir.exists() {
        return Err(DictateError::CacheCorrupt(format!(
            "{} already exists; purge before reinstalling",
            final_dir.display()
        )));
    }
    fs::rename(staging_dir, final_dir)?;
    Ok(())
}

fn is_installed(final_dir: &Path, manifest: &ModelManifest) -> bool {
    if !final_dir.join("manifest.json").is_file() {
        return false;
    }
    manifest
        .files
        .iter()
        .all(|f| final_dir.join(&f.path).is_file())
}

/// Reads the cache status of `model_id` without touching the network.
pub fn status_of(cache_root: &Path, model_id: &str) -> ModelStatus {
    let final_dir = cache_root.join(model_id);
    if final_dir.is_dir() {
        return ModelStatus::Ready;
    }
    let staging_dir = cache_root.join(".partial").join(model_id);
    if staging_dir.is_dir() {
        return ModelStatus::Downloading;
    }
    ModelStatus::Missing
}

/// Removes an installed (or partially-installed) model from the cache.
pub fn purge_model(cache_root: &Path, model_id: &str) -> Result<()> {
    let _lock = CacheLock::acquire(cache_root)?;
    let final_dir = cache_root.join(model_id);
    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    let staging_dir = cache_root.join(".partial").join(model_id);
    if staging_dir.exists() {
        fs::remove_dir_all(&staging_dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_for(tmp: &Path, content: &[u8]) -> ModelManifest {
        let file_path = tmp.join("source.bin");
        fs::write(&file_path, content).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(content);
        let sha256 = format!("{:x}", hasher.finalize());
        ModelManifest {
            model_id: "test-model".into(),
            model_family: "whisper".into(),
            revision: "1".into(),
            source: "test".into(),
            total_size_bytes: content.len() as u64,
            files: vec![ManifestFile {
                path: "model.bin".into(),
                size_bytes: content.len() as u64,
                sha256,
                primary_url: format!("file://{}", file_path.display()),
                mirror_urls: vec![],
            }],
            license: "MIT".into(),
            verification: None,
        }
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempdir();
        let lock = CacheLock::acquire(&dir).unwrap();
        assert!(dir.join(".lock").exists());
        drop(lock);
        assert!(!dir.join(".lock").exists());
    }

    #[test]
    fn verify_file_detects_size_mismatch() {
        let dir = tempdir();
        let path = dir.join("f.bin");
        fs::write(&path, b"short").unwrap();
        let err = verify_file(&path, 100, &"0".repeat(64)).unwrap_err();
        assert_eq!(err.kind(), "E_CACHE_CORRUPT");
    }

    #[test]
    fn verify_file_detects_sha_mismatch() {
        let dir = tempdir();
        let path = dir.join("f.bin");
        fs::write(&path, b"actual-bytes").unwrap();
        let err = verify_file(&path, "actual-bytes".len() as u64, &"0".repeat(64)).unwrap_err();
        assert_eq!(err.kind(), "E_CACHE_CORRUPT");
    }

    #[test]
    fn status_of_missing_model() {
        let dir = tempdir();
        assert_eq!(status_of(&dir, "nope"), ModelStatus::Missing);
    }

    #[test]
    fn status_of_installed_model() {
        let dir = tempdir();
        fs::create_dir_all(dir.join("m")).unwrap();
        assert_eq!(status_of(&dir, "m"), ModelStatus::Ready);
    }

    #[test]
    fn purge_removes_installed_and_staged() {
        let dir = tempdir();
        fs::create_dir_all(dir.join("m")).unwrap();
        fs::create_dir_all(dir.join(".partial").join("m2")).unwrap();
        purge_model(&dir, "m").unwrap();
        purge_model(&dir, "m2").unwrap();
        assert!(!dir.join("m").exists());
        assert!(!dir.join(".partial").join("m2").exists());
    }

    #[test]
    fn activate_refuses_to_clobber_existing_dir() {
        let dir = tempdir();
        let staging = dir.join(".partial").join("m");
        fs::create_dir_all(&staging).unwrap();
        let final_dir = dir.join("m");
        fs::create_dir_all(&final_dir).unwrap();
        let err = activate(&staging, &final_dir).unwrap_err();
        assert_eq!(err.kind(), "E_CACHE_CORRUPT");
    }

    #[test]
    fn download_with_mirrors_exhausts_to_network_error() {
        let dir = tempdir();
        let manifest = manifest_for(&dir, b"unused");
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let mut file = manifest.files[0].clone();
        file.primary_url = "http://127.0.0.1:1/definitely-not-listening".into();
        file.mirror_urls = vec!["http://127.0.0.1:2/also-not-listening".into()];
        let dest = dir.join("out.bin");
        let err = download_with_mirrors(&client, &file, &dest, |_, _| {}).unwrap_err();
        assert_eq!(err.kind(), "E_NETWORK");
    }

    static COUNTER: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        let id = std::process::id();
        let counter = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        dir.push(format!("dictate-cache-test-{id}-{counter}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
