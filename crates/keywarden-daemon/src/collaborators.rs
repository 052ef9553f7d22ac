//! Dispatcher collaborators: navigation range, event source, preferences
//!
//! These are the externally-owned bits of state the dispatcher consults and
//! nudges while deciding what to do with a key event. They live in-process
//! and are owned by the engine alongside the dispatcher.

/// A position in the accessibility tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRange {
    /// Human-readable description of the focused node.
    pub description: String,
    /// True when the range sits inside math content.
    pub is_math: bool,
}

impl NavigationRange {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            is_math: false,
        }
    }
}

/// Owns the current and last-valid navigation ranges.
///
/// The current range can be dropped externally (focus lost, node removed);
/// `restore_last_valid` brings back the most recent valid position so
/// commands keep working.
#[derive(Debug, Default)]
pub struct NavigationRangeStore {
    current: Option<NavigationRange>,
    last_valid: Option<NavigationRange>,
}

impl NavigationRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&NavigationRange> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, range: NavigationRange) {
        self.last_valid = Some(range.clone());
        self.current = Some(range);
    }

    /// Drop the current range, keeping the last valid one for restoration.
    pub fn invalidate_current(&mut self) {
        self.current = None;
    }

    /// Restore the last valid range if the current one is gone.
    ///
    /// Returns true if a restoration happened.
    pub fn restore_last_valid(&mut self) -> bool {
        if self.current.is_none() {
            if let Some(last) = &self.last_valid {
                self.current = Some(last.clone());
                return true;
            }
        }
        false
    }
}

/// Where the event currently being processed came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventSource {
    #[default]
    None,
    StandardKeyboard,
    Braille,
    TouchGesture,
}

/// Records the source of the most recent input event.
#[derive(Debug, Default)]
pub struct EventSourceRegistry {
    source: EventSource,
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source(&mut self, source: EventSource) {
        self.source = source;
    }

    pub fn source(&self) -> EventSource {
        self.source
    }
}

/// Runtime preferences the dispatcher reads per event.
#[derive(Debug, Default)]
pub struct Preferences {
    pub sticky_mode: bool,
}

impl Preferences {
    pub fn new(sticky_mode: bool) -> Self {
        Self { sticky_mode }
    }

    /// Flip sticky mode, returning the new value.
    pub fn toggle_sticky_mode(&mut self) -> bool {
        self.sticky_mode = !self.sticky_mode;
        self.sticky_mode
    }
}
