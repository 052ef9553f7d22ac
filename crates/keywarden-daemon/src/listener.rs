//! Keyboard enumeration, grabbing, and event reading
//!
//! Scans /dev/input for keyboards, grabs the configured ones for exclusive
//! access, and runs one reader task per device that feeds raw key
//! transitions into the engine channel.

use std::path::PathBuf;

use anyhow::{Context, Result};
use evdev::{Device, EventType, Key};
use keywarden_config::DeviceMatch;
use tokio::sync::mpsc;

use crate::engine::EngineMessage;

/// Information about an input device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
}

impl DeviceInfo {
    /// Get vendor:product string (e.g., "3434:0361")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }

    /// Check whether this device satisfies a single match rule.
    pub fn matches(&self, rule: &DeviceMatch) -> bool {
        if let Some(name) = &rule.name {
            if name != &self.name {
                return false;
            }
        }
        if let Some(vp) = &rule.vendor_product {
            if !vp.eq_ignore_ascii_case(&self.vendor_product()) {
                return false;
            }
        }
        rule.name.is_some() || rule.vendor_product.is_some()
    }

    /// Check against a rule list. An empty list means "every keyboard".
    pub fn matches_any(&self, rules: &[DeviceMatch]) -> bool {
        rules.is_empty() || rules.iter().any(|rule| self.matches(rule))
    }
}

/// Enumerate all input devices under /dev/input.
pub fn enumerate_devices() -> Result<Vec<(DeviceInfo, Device)>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input").context("Failed to read /dev/input")? {
        let entry = entry?;
        let path = entry.path();

        // Only look at event* devices
        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                let name = device.name().unwrap_or("Unknown").to_string();
                let id = device.input_id();
                let info = DeviceInfo {
                    path: path.clone(),
                    name,
                    vendor: id.vendor(),
                    product: id.product(),
                };
                devices.push((info, device));
            }
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    Ok(devices)
}

/// Check if a device is a keyboard
pub fn is_keyboard(device: &Device) -> bool {
    device.supported_events().contains(EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(Key::KEY_A))
            .unwrap_or(false)
}

/// Grab every keyboard matching the configured device rules.
///
/// Skips non-keyboards and our own virtual output device; a grab failure on
/// a matching keyboard is a hard error since missing one would let raw keys
/// leak past interception.
pub fn grab_keyboards(rules: &[DeviceMatch]) -> Result<Vec<(DeviceInfo, Device)>> {
    let mut grabbed = Vec::new();

    for (info, mut device) in enumerate_devices()? {
        if !is_keyboard(&device) {
            continue;
        }
        if info.name == crate::VIRTUAL_DEVICE_NAME {
            continue;
        }
        if !info.matches_any(rules) {
            tracing::debug!("Skipping unmatched keyboard '{}'", info.name);
            continue;
        }

        device.grab().with_context(|| {
            format!(
                "Failed to grab keyboard '{}' at {} for exclusive access. \
                 Is another interception tool running?",
                info.name,
                info.path.display()
            )
        })?;

        tracing::info!(
            "Grabbed keyboard '{}' at {}",
            info.name,
            info.path.display()
        );
        grabbed.push((info, device));
    }

    Ok(grabbed)
}

/// Spawn a reader task for one grabbed keyboard.
///
/// Key transitions are sent into the engine channel; everything else
/// (SYN, MSC, LED) is dropped, the virtual device generates its own. The
/// task ends when the device errors out or the engine channel closes.
pub fn spawn_reader(info: DeviceInfo, device: Device, tx: mpsc::Sender<EngineMessage>) {
    tokio::spawn(async move {
        let mut stream = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    "Failed to create event stream for '{}': {}",
                    info.name,
                    e
                );
                return;
            }
        };

        loop {
            match stream.next_event().await {
                Ok(event) => {
                    if event.event_type() != EventType::KEY {
                        continue;
                    }
                    let message = EngineMessage::Key {
                        key: Key::new(event.code()),
                        value: event.value(),
                    };
                    if tx.send(message).await.is_err() {
                        // Engine gone, shut the reader down
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("Device '{}' read error, stopping reader: {}", info.name, e);
                    return;
                }
            }
        }
    });
}
