//! Audio device enumeration with stable, content-derived UIDs.
//!
//! `uid` is a SHA-256 hash of `name|host_api|max_input_channels`, truncated
//! to 12 hex chars and prefixed by platform — the same scheme as the
//! reference implementation's `_generate_stable_uid`, ported so repeated
//! enumeration of the same physical device always yields the same uid
//! (invariant I3 / testable property P5).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Audio device descriptor, matching the wire contract in §3 of the
/// specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    pub uid: String,
    pub name: String,
    pub is_default: bool,
    pub default_sample_rate: u32,
    pub channels: u16,
    pub host_api: String,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "mixage stereo",
    "mezcla estereo",
    "mix stereo",
    "speakers (",
    "headphones (",
];

const MIC_POSITIVE_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "headphone mic",
    "input",
    "line in",
    "usb",
    "webcam",
    "yeti",
    "podcast",
];

/// Best-effort heuristic for loopback/system-output capture devices that
/// should be deprioritized when picking a default microphone.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is a more likely speech microphone. Used only to order/prefer
/// devices, never to filter them out of the enumeration.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = 0;
    if !is_loopback_like_name(&lowered) {
        score += 8;
    } else {
        score -= 16;
    }
    if MIC_POSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if lowered.contains("default") {
        score += 1;
    }
    score
}

fn platform_prefix() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "win"
    } else {
        "linux"
    }
}

/// Stable device uid: sha256("name|host_api|max_input_channels")[..12],
/// prefixed by platform, e.g. `linux:a1b2c3d4e5f6`.
pub fn stable_uid(name: &str, host_api: &str, max_input_channels: u16) -> String {
    let id_string = format!("{name}|{host_api}|{max_input_channels}");
    let digest = Sha256::digest(id_string.as_bytes());
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("{}:{}", platform_prefix(), &hex[..12])
}

#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<AudioDevice> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let host_api = format!("{:?}", host.id());
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            return Vec::new();
        }
    };

    let mut list: Vec<AudioDevice> = devices
        .enumerate()
        .filter_map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            let config = device.default_input_config().ok()?;
            let channels = config.channels();
            let uid = stable_uid(&name, &host_api, channels);
            let is_default = default_name.as_deref() == Some(name.as_str());
            Some(AudioDevice {
                uid,
                name,
                is_default,
                default_sample_rate: config.sample_rate().0,
                channels,
                host_api: host_api.clone(),
            })
        })
        .collect();

    list.sort_by_key(|d| {
        (
            !d.is_default,
            is_loopback_like_name(&d.name),
            std::cmp::Reverse(mic_preference_score(&d.name)),
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<AudioDevice> {
    Vec::new()
}

pub fn find_device_by_uid(uid: &str) -> Option<AudioDevice> {
    list_input_devices().into_iter().find(|d| d.uid == uid)
}

pub fn default_device() -> Option<AudioDevice> {
    list_input_devices().into_iter().find(|d| d.is_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("What U Hear (Sound Blaster)"));
        assert!(is_loopback_like_name(
            "Speakers (High Definition Audio Device)"
        ));
    }

    #[test]
    fn scores_mic_higher_than_loopback() {
        let mic = mic_preference_score("Microphone Array (USB PnP Audio Device)");
        let loopback = mic_preference_score("Stereo Mix (Realtek Audio)");
        assert!(mic > loopback);
    }

    #[test]
    fn stable_uid_is_deterministic() {
        let a = stable_uid("USB Microphone", "ALSA", 2);
        let b = stable_uid("USB Microphone", "ALSA", 2);
        assert_eq!(a, b);
        assert!(a.contains(':'));
    }

    #[test]
    fn stable_uid_differs_by_input() {
        let a = stable_uid("USB Microphone", "ALSA", 2);
        let b = stable_uid("USB Microphone", "ALSA", 1);
        assert_ne!(a, b);
    }
}
