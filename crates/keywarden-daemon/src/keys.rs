//! Key event model and chord parsing
//!
//! Defines the modifier snapshot attached to every key event, the chord
//! representation used by key bindings, and the tracker that derives
//! modifier snapshots from raw evdev press/release values.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use evdev::Key;

/// Normalized modifier key representation.
///
/// Left and right variants are combined into a single modifier type so that
/// either left or right Ctrl satisfies "Ctrl" in a chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Ctrl,
    Shift,
    Alt,
    /// Meta / Super key; the search key on the target hardware.
    Meta,
}

impl Modifier {
    /// Check if an evdev key is a modifier and return its normalized form.
    pub fn from_key(key: Key) -> Option<Self> {
        match key {
            Key::KEY_LEFTCTRL | Key::KEY_RIGHTCTRL => Some(Modifier::Ctrl),
            Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT => Some(Modifier::Shift),
            Key::KEY_LEFTALT | Key::KEY_RIGHTALT => Some(Modifier::Alt),
            Key::KEY_LEFTMETA | Key::KEY_RIGHTMETA => Some(Modifier::Meta),
            _ => None,
        }
    }

    /// Parse a modifier name string (case-insensitive).
    pub fn from_str_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "CTRL" | "CONTROL" => Some(Modifier::Ctrl),
            "SHIFT" => Some(Modifier::Shift),
            "ALT" => Some(Modifier::Alt),
            "SEARCH" | "META" | "SUPER" => Some(Modifier::Meta),
            _ => None,
        }
    }

    /// Get the default evdev key for this modifier (left variant).
    pub fn to_key(self) -> Key {
        match self {
            Modifier::Ctrl => Key::KEY_LEFTCTRL,
            Modifier::Shift => Key::KEY_LEFTSHIFT,
            Modifier::Alt => Key::KEY_LEFTALT,
            Modifier::Meta => Key::KEY_LEFTMETA,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Ctrl => write!(f, "Ctrl"),
            Modifier::Shift => write!(f, "Shift"),
            Modifier::Alt => write!(f, "Alt"),
            Modifier::Meta => write!(f, "Search"),
        }
    }
}

/// Snapshot of the modifier flags attached to a single key event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        alt: false,
        ctrl: false,
        meta: false,
        shift: false,
    };

    pub fn any(&self) -> bool {
        self.alt || self.ctrl || self.meta || self.shift
    }

    fn set(&mut self, modifier: Modifier, held: bool) {
        match modifier {
            Modifier::Ctrl => self.ctrl = held,
            Modifier::Shift => self.shift = held,
            Modifier::Alt => self.alt = held,
            Modifier::Meta => self.meta = held,
        }
    }

    fn get(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Ctrl => self.ctrl,
            Modifier::Shift => self.shift,
            Modifier::Alt => self.alt,
            Modifier::Meta => self.meta,
        }
    }
}

/// A single key transition as seen by the dispatcher.
///
/// Created fresh for every physical keydown/keyup; `sticky_mode` is stamped
/// by the dispatcher from the preference store before processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
    pub sticky_mode: bool,
}

impl KeyEvent {
    pub fn new(key: Key, modifiers: Modifiers) -> Self {
        Self {
            key,
            modifiers,
            sticky_mode: false,
        }
    }
}

/// A parsed key chord like `Search+P`: required modifiers plus trigger key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl KeyChord {
    pub fn new(key: Key) -> Self {
        Self {
            modifiers: Modifiers::NONE,
            key,
        }
    }

    /// Check whether a key event matches this chord.
    ///
    /// Matching requires the trigger key and an exact modifier set, with two
    /// adjustments:
    /// - the trigger key's own modifier flag is ignored, so a bare `Ctrl`
    ///   chord matches the Ctrl keydown even though the tracker already
    ///   counts Ctrl as held;
    /// - in sticky mode a required Meta modifier is treated as held.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        if event.key != self.key {
            return false;
        }

        let mut held = event.modifiers;
        if let Some(own) = Modifier::from_key(self.key) {
            held.set(own, self.modifiers.get(own));
        }
        if event.sticky_mode && self.modifiers.meta {
            held.meta = true;
        }

        held == self.modifiers
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, modifier) in [
            (self.modifiers.ctrl, Modifier::Ctrl),
            (self.modifiers.shift, Modifier::Shift),
            (self.modifiers.alt, Modifier::Alt),
            (self.modifiers.meta, Modifier::Meta),
        ] {
            if flag {
                write!(f, "{}+", modifier)?;
            }
        }
        // Bare-modifier chords show the modifier's name, not the raw key
        if let Some(modifier) = Modifier::from_key(self.key) {
            return write!(f, "{}", modifier);
        }
        write!(f, "{}", key_display_name(self.key))
    }
}

/// Human-readable name for a trigger key. Chords are rendered into spoken
/// hints, so the names mirror what parse_key() accepts rather than the raw
/// evdev `KEY_*` identifiers.
fn key_display_name(key: Key) -> String {
    let named = match key {
        Key::KEY_CAPSLOCK => Some("CapsLock"),
        Key::KEY_ESC => Some("Escape"),
        Key::KEY_ENTER => Some("Enter"),
        Key::KEY_TAB => Some("Tab"),
        Key::KEY_SPACE => Some("Space"),
        Key::KEY_BACKSPACE => Some("Backspace"),
        Key::KEY_UP => Some("Up"),
        Key::KEY_DOWN => Some("Down"),
        Key::KEY_LEFT => Some("Left"),
        Key::KEY_RIGHT => Some("Right"),
        Key::KEY_HOME => Some("Home"),
        Key::KEY_END => Some("End"),
        Key::KEY_PAGEUP => Some("PageUp"),
        Key::KEY_PAGEDOWN => Some("PageDown"),
        Key::KEY_INSERT => Some("Insert"),
        Key::KEY_DELETE => Some("Delete"),
        _ => None,
    };

    match named {
        Some(name) => name.to_string(),
        None => {
            let debug = format!("{:?}", key);
            debug.strip_prefix("KEY_").unwrap_or(&debug).to_string()
        }
    }
}

/// Error type for chord parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse chord '{input}': {reason}")]
pub struct ChordParseError {
    pub input: String,
    pub reason: String,
}

impl ChordParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a chord string like `"Search+P"` into a [`KeyChord`].
///
/// Components are separated by `+`; modifier order does not matter. A chord
/// consisting of a single modifier name (e.g., `"Ctrl"`) uses that modifier
/// key itself as the trigger.
pub fn parse_chord(input: &str) -> Result<KeyChord, ChordParseError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(ChordParseError::new(input, "empty input"));
    }

    let parts: Vec<&str> = trimmed.split('+').map(|s| s.trim()).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ChordParseError::new(
            input,
            "empty component in chord string",
        ));
    }

    let mut modifiers = Modifiers::NONE;
    let mut seen: HashSet<Modifier> = HashSet::new();
    let mut trigger: Option<Key> = None;

    for part in &parts {
        if let Some(modifier) = Modifier::from_str_name(part) {
            if !seen.insert(modifier) {
                return Err(ChordParseError::new(
                    input,
                    format!("duplicate modifier: {}", modifier),
                ));
            }
            modifiers.set(modifier, true);
        } else {
            if trigger.is_some() {
                return Err(ChordParseError::new(
                    input,
                    format!("multiple trigger keys: unexpected '{}'", part),
                ));
            }
            match parse_key(part) {
                Some(key) => trigger = Some(key),
                None => {
                    return Err(ChordParseError::new(
                        input,
                        format!("unknown key: '{}'", part),
                    ));
                }
            }
        }
    }

    match trigger {
        Some(key) => Ok(KeyChord { modifiers, key }),
        None => {
            // Bare modifier chord: the single modifier is the trigger.
            match (seen.len(), seen.iter().next()) {
                (1, Some(modifier)) => Ok(KeyChord::new(modifier.to_key())),
                _ => Err(ChordParseError::new(
                    input,
                    "no trigger key found (only modifiers specified)",
                )),
            }
        }
    }
}

/// Parse a key name string to an evdev Key.
///
/// Common names are matched directly; single letters/digits and `F1`-`F24`
/// are mapped through evdev's `KEY_*` naming; raw `KEY_*` names are accepted
/// as an escape hatch.
pub fn parse_key(name: &str) -> Option<Key> {
    let upper = name.to_uppercase();

    let direct = match upper.as_str() {
        "CAPSLOCK" | "CAPS_LOCK" | "CAPS" => Some(Key::KEY_CAPSLOCK),
        "ESCAPE" | "ESC" => Some(Key::KEY_ESC),
        "ENTER" | "RETURN" => Some(Key::KEY_ENTER),
        "TAB" => Some(Key::KEY_TAB),
        "SPACE" => Some(Key::KEY_SPACE),
        "BACKSPACE" => Some(Key::KEY_BACKSPACE),

        "UP" | "UPARROW" => Some(Key::KEY_UP),
        "DOWN" | "DOWNARROW" => Some(Key::KEY_DOWN),
        "LEFT" | "LEFTARROW" => Some(Key::KEY_LEFT),
        "RIGHT" | "RIGHTARROW" => Some(Key::KEY_RIGHT),

        "HOME" => Some(Key::KEY_HOME),
        "END" => Some(Key::KEY_END),
        "PAGEUP" | "PGUP" => Some(Key::KEY_PAGEUP),
        "PAGEDOWN" | "PGDN" | "PGDOWN" => Some(Key::KEY_PAGEDOWN),
        "INSERT" | "INS" => Some(Key::KEY_INSERT),
        "DELETE" | "DEL" => Some(Key::KEY_DELETE),

        "LEFTCTRL" | "LCTRL" => Some(Key::KEY_LEFTCTRL),
        "RIGHTCTRL" | "RCTRL" => Some(Key::KEY_RIGHTCTRL),
        "LEFTSHIFT" | "LSHIFT" => Some(Key::KEY_LEFTSHIFT),
        "RIGHTSHIFT" | "RSHIFT" => Some(Key::KEY_RIGHTSHIFT),
        "LEFTALT" | "LALT" => Some(Key::KEY_LEFTALT),
        "RIGHTALT" | "RALT" => Some(Key::KEY_RIGHTALT),
        "LEFTMETA" | "LMETA" => Some(Key::KEY_LEFTMETA),
        "RIGHTMETA" | "RMETA" => Some(Key::KEY_RIGHTMETA),

        _ => None,
    };

    if direct.is_some() {
        return direct;
    }

    // Modifier aliases used as bare trigger keys
    if let Some(modifier) = Modifier::from_str_name(&upper) {
        return Some(modifier.to_key());
    }

    // Letters, digits, and function keys share the KEY_<name> pattern
    let is_single = upper.len() == 1 && upper.chars().all(|c| c.is_ascii_alphanumeric());
    let is_fkey = upper
        .strip_prefix('F')
        .map_or(false, |n| n.parse::<u8>().map_or(false, |n| (1..=24).contains(&n)));
    if is_single || is_fkey {
        return Key::from_str(&format!("KEY_{}", upper)).ok();
    }

    // Raw kernel key names as an escape hatch
    if upper.starts_with("KEY_") {
        match Key::from_str(&upper) {
            Ok(key) => return Some(key),
            Err(_) => {
                tracing::warn!("Unknown evdev key: {}", name);
                return None;
            }
        }
    }

    tracing::warn!("Unknown key: {}", name);
    None
}

/// Tracks which physical modifier keys are currently held.
///
/// Fed every raw evdev key event by the listener loop; the snapshot it
/// produces is attached to the [`KeyEvent`] handed to the dispatcher.
#[derive(Debug, Default)]
pub struct ModifierTracker {
    held: Modifiers,
}

impl ModifierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update held state from a raw key event value.
    ///
    /// - Press (value=1): sets the modifier flag
    /// - Release (value=0): clears the modifier flag
    /// - Repeat (value=2): no change, the flag is already set
    ///
    /// Non-modifier keys are ignored.
    pub fn update(&mut self, key: Key, value: i32) {
        if let Some(modifier) = Modifier::from_key(key) {
            match value {
                0 => self.held.set(modifier, false),
                1 => self.held.set(modifier, true),
                _ => {}
            }
        }
    }

    /// Current modifier snapshot.
    pub fn snapshot(&self) -> Modifiers {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_common_names() {
        assert_eq!(parse_key("CapsLock"), Some(Key::KEY_CAPSLOCK));
        assert_eq!(parse_key("Escape"), Some(Key::KEY_ESC));
        assert_eq!(parse_key("a"), Some(Key::KEY_A));
        assert_eq!(parse_key("7"), Some(Key::KEY_7));
        assert_eq!(parse_key("F12"), Some(Key::KEY_F12));
        assert_eq!(parse_key("Search"), Some(Key::KEY_LEFTMETA));
    }

    #[test]
    fn parse_key_raw_fallback() {
        assert_eq!(parse_key("KEY_KPASTERISK"), Some(Key::KEY_KPASTERISK));
        assert_eq!(parse_key("KEY_NOT_A_REAL_KEY"), None);
        assert_eq!(parse_key("Blorp"), None);
    }

    #[test]
    fn parse_chord_with_modifiers() {
        let chord = parse_chord("Search+P").unwrap();
        assert!(chord.modifiers.meta);
        assert!(!chord.modifiers.ctrl);
        assert_eq!(chord.key, Key::KEY_P);
    }

    #[test]
    fn parse_chord_order_independent() {
        assert_eq!(
            parse_chord("Ctrl+Alt+Delete").unwrap(),
            parse_chord("Alt+Ctrl+Delete").unwrap()
        );
    }

    #[test]
    fn parse_chord_bare_modifier() {
        let chord = parse_chord("Ctrl").unwrap();
        assert_eq!(chord.key, Key::KEY_LEFTCTRL);
        assert_eq!(chord.modifiers, Modifiers::NONE);
    }

    #[test]
    fn parse_chord_errors() {
        assert!(parse_chord("").is_err());
        assert!(parse_chord("Ctrl+").is_err());
        assert!(parse_chord("Ctrl+Ctrl+P").is_err());
        assert!(parse_chord("A+B").is_err());
        assert!(parse_chord("Ctrl+Alt").is_err());
        assert!(parse_chord("Search+Blorp").is_err());
    }

    #[test]
    fn chord_matches_exact_modifiers() {
        let chord = parse_chord("Search+P").unwrap();

        let meta_p = KeyEvent::new(
            Key::KEY_P,
            Modifiers {
                meta: true,
                ..Modifiers::NONE
            },
        );
        assert!(chord.matches(&meta_p));

        // Missing modifier
        let bare_p = KeyEvent::new(Key::KEY_P, Modifiers::NONE);
        assert!(!chord.matches(&bare_p));

        // Extra modifier
        let meta_shift_p = KeyEvent::new(
            Key::KEY_P,
            Modifiers {
                meta: true,
                shift: true,
                ..Modifiers::NONE
            },
        );
        assert!(!chord.matches(&meta_shift_p));
    }

    #[test]
    fn bare_modifier_chord_matches_own_keydown() {
        let chord = parse_chord("Ctrl").unwrap();
        // The tracker counts Ctrl as held by the time its own keydown is
        // dispatched; the chord must still match.
        let event = KeyEvent::new(
            Key::KEY_LEFTCTRL,
            Modifiers {
                ctrl: true,
                ..Modifiers::NONE
            },
        );
        assert!(chord.matches(&event));
    }

    #[test]
    fn sticky_mode_satisfies_meta_requirement() {
        let chord = parse_chord("Search+J").unwrap();

        let mut event = KeyEvent::new(Key::KEY_J, Modifiers::NONE);
        assert!(!chord.matches(&event));

        event.sticky_mode = true;
        assert!(chord.matches(&event));
    }

    #[test]
    fn modifier_tracker_follows_press_release() {
        let mut tracker = ModifierTracker::new();
        assert!(!tracker.snapshot().any());

        tracker.update(Key::KEY_LEFTCTRL, 1);
        tracker.update(Key::KEY_RIGHTSHIFT, 1);
        let snapshot = tracker.snapshot();
        assert!(snapshot.ctrl && snapshot.shift);
        assert!(!snapshot.alt && !snapshot.meta);

        // Repeat does not change state
        tracker.update(Key::KEY_LEFTCTRL, 2);
        assert!(tracker.snapshot().ctrl);

        tracker.update(Key::KEY_LEFTCTRL, 0);
        tracker.update(Key::KEY_RIGHTSHIFT, 0);
        assert!(!tracker.snapshot().any());
    }

    #[test]
    fn modifier_tracker_ignores_plain_keys() {
        let mut tracker = ModifierTracker::new();
        tracker.update(Key::KEY_A, 1);
        assert!(!tracker.snapshot().any());
    }

    #[test]
    fn chord_display() {
        let chord = parse_chord("Ctrl+Shift+Q").unwrap();
        assert_eq!(chord.to_string(), "Ctrl+Shift+Q");
        assert_eq!(parse_chord("Search+P").unwrap().to_string(), "Search+P");
    }

    #[test]
    fn chord_display_speaks_human_key_names() {
        // Chord strings are read out in hints; the raw evdev names
        // ("SPACE", "LEFTCTRL") must not leak into speech.
        assert_eq!(
            parse_chord("Search+Space").unwrap().to_string(),
            "Search+Space"
        );
        assert_eq!(
            parse_chord("Search+Escape").unwrap().to_string(),
            "Search+Escape"
        );
        assert_eq!(parse_chord("Ctrl").unwrap().to_string(), "Ctrl");
        assert_eq!(
            parse_chord("Ctrl+PageDown").unwrap().to_string(),
            "Ctrl+PageDown"
        );
    }
}
