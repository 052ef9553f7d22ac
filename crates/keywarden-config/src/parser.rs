//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // Convert span from kdl's miette version to our miette version
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "device" => {
                config.devices.push(parse_device(node)?);
            }
            "bindings" => {
                config.bindings.extend(parse_bindings(node)?);
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    if let Some(entry) = child.entries().first() {
                        if let Some(val) = entry.value().as_string() {
                            global.log_level = val
                                .parse()
                                .map_err(|e| ConfigError::Invalid { message: e })?;
                        }
                    }
                }
                "sticky-mode" => {
                    if let Some(entry) = child.entries().first() {
                        if let Some(val) = entry.value().as_bool() {
                            global.sticky_mode = val;
                        }
                    }
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_device(node: &kdl::KdlNode) -> Result<DeviceMatch, ConfigError> {
    let name = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string());

    let vendor_product = node
        .entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some("vendor-product"))
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string());

    if name.is_none() && vendor_product.is_none() {
        return Err(ConfigError::MissingField {
            field: "device name or vendor-product (e.g., `device \"My Keyboard\"`)".to_string(),
        });
    }

    Ok(DeviceMatch {
        name,
        vendor_product,
    })
}

fn parse_bindings(node: &kdl::KdlNode) -> Result<Vec<Binding>, ConfigError> {
    let mut bindings = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "bind" => {
                    let mut values = child
                        .entries()
                        .iter()
                        .filter(|e| e.name().is_none())
                        .filter_map(|e| e.value().as_string());

                    let chord = values.next().ok_or_else(|| ConfigError::MissingField {
                        field: "bind chord (e.g., `bind \"Search+P\" \"pass-through\"`)"
                            .to_string(),
                    })?;
                    let command = values.next().ok_or_else(|| ConfigError::MissingField {
                        field: format!("command for binding '{}'", chord),
                    })?;

                    validate_chord(chord)?;

                    if !KNOWN_COMMANDS.contains(&command) {
                        return Err(ConfigError::UnknownCommand {
                            command: command.to_string(),
                        });
                    }

                    bindings.push(Binding {
                        chord: chord.to_string(),
                        command: command.to_string(),
                    });
                }
                name => {
                    tracing::warn!("Unknown bindings option: {}", name);
                }
            }
        }
    }

    Ok(bindings)
}

/// Validate the syntax of a chord string like "Search+P".
///
/// The daemon owns the authoritative chord parser; this check catches the
/// common mistakes (empty components, duplicate modifiers, a missing or
/// ambiguous trigger key) at config load time with a miette diagnostic.
///
/// NOTE: This must stay in sync with parse_chord() in
/// keywarden-daemon/src/keys.rs
fn validate_chord(chord: &str) -> Result<(), ConfigError> {
    let chord = chord.trim();

    if chord.is_empty() {
        return Err(ConfigError::InvalidChord {
            chord: chord.to_string(),
            reason: "empty chord".to_string(),
        });
    }

    let parts: Vec<&str> = chord.split('+').map(|s| s.trim()).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::InvalidChord {
            chord: chord.to_string(),
            reason: "empty component in chord string".to_string(),
        });
    }

    let mut seen_modifiers = Vec::new();
    let mut trigger_count = 0usize;

    for part in &parts {
        if is_modifier_name(part) {
            let canonical = part.to_uppercase();
            if seen_modifiers.contains(&canonical) {
                return Err(ConfigError::InvalidChord {
                    chord: chord.to_string(),
                    reason: format!("duplicate modifier: {}", part),
                });
            }
            seen_modifiers.push(canonical);
        } else {
            trigger_count += 1;
            if !is_valid_key(part) {
                return Err(ConfigError::InvalidChord {
                    chord: chord.to_string(),
                    reason: format!("unknown key: '{}'", part),
                });
            }
        }
    }

    // A bare-modifier binding (e.g., "Ctrl" for stop-speech) is allowed:
    // the modifier itself is the trigger.
    if trigger_count > 1 {
        return Err(ConfigError::InvalidChord {
            chord: chord.to_string(),
            reason: "more than one trigger key".to_string(),
        });
    }
    if trigger_count == 0 && seen_modifiers.len() != 1 {
        return Err(ConfigError::InvalidChord {
            chord: chord.to_string(),
            reason: "no trigger key (a bare chord must be a single modifier)".to_string(),
        });
    }

    Ok(())
}

fn is_modifier_name(name: &str) -> bool {
    matches!(
        name.to_uppercase().as_str(),
        "CTRL" | "CONTROL" | "SHIFT" | "ALT" | "SEARCH" | "META" | "SUPER"
    )
}

/// Check if a key name is recognized.
///
/// `KEY_*` names are accepted as-is and resolved against evdev by the
/// daemon's parser; everything else is checked against the common-name list.
fn is_valid_key(name: &str) -> bool {
    let upper = name.to_uppercase();

    if upper.starts_with("KEY_") {
        return true;
    }

    match upper.as_str() {
        "CAPSLOCK" | "CAPS_LOCK" | "CAPS" => true,
        "ESCAPE" | "ESC" => true,
        "ENTER" | "RETURN" => true,
        "TAB" => true,
        "SPACE" => true,
        "BACKSPACE" => true,
        "UP" | "DOWN" | "LEFT" | "RIGHT" => true,
        "HOME" | "END" | "PAGEUP" | "PAGEDOWN" | "INSERT" | "DELETE" => true,
        // Single letters and digits
        s if s.len() == 1 && s.chars().all(|c| c.is_ascii_alphanumeric()) => true,
        // Function keys F1-F24
        s if s.strip_prefix('F').map_or(false, |n| {
            n.parse::<u8>().map_or(false, |n| (1..=24).contains(&n))
        }) =>
        {
            true
        }
        // Bare modifiers used as trigger keys
        "CTRL" | "CONTROL" | "SHIFT" | "ALT" | "SEARCH" | "META" | "SUPER" => true,
        _ => false,
    }
}
