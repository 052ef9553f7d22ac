//! Key event dispatch and pass-through state machine
//!
//! Single entry point for every native keydown/keyup. The dispatcher decides
//! whether the event is consumed (fed to accessibility command processing)
//! or forwarded to the underlying application, and runs the pass-through
//! state machine that lets one full shortcut flow through uninspected.
//!
//! ## Pass-through states
//!
//! ```text
//!  ┌────────────────┐
//!  │ NoPassThrough  │ ◄──────────────────────────────────────────┐
//!  └───────┬────────┘                                            │
//!          │                                                     │
//!          │ pass-through command fires during a keydown         │
//!          ▼                                                     │
//!  ┌──────────────────────────────────┐                          │
//!  │ PendingPassThroughShortcutKeyups │                          │
//!  │                                  │                          │
//!  │ waiting for the activating       │                          │
//!  │ shortcut to fully release        │                          │
//!  └───────┬──────────────────────────┘                          │
//!          │                                                     │
//!          │ keyup with no modifiers held and no eaten keys      │
//!          ▼                                                     │
//!  ┌───────────────────────┐                                     │
//!  │ PendingShortcutKeyups │                                     │
//!  │                       │                                     │
//!  │ raw keys forwarded;   │                                     │
//!  │ waiting for forwarded │  all passed-through keys released   │
//!  │ shortcut to release   │ ────────────────────────────────────┘
//!  └───────────────────────┘    (pass-through flag cleared)
//! ```
//!
//! All transitions happen on keyup, never on keydown. The cycle is
//! re-entrant: every pass-through session walks the same three states.
//!
//! ## Key tracking
//!
//! - `eaten_key_downs`: keys whose keydown was consumed; the matching
//!   keyup must be consumed too so the application never sees an unpaired
//!   key transition.
//! - `passed_through_key_downs`: keys currently being forwarded while
//!   pass-through is active.
//!
//! A key is never in both sets: pass-through keydowns return before the
//! eat decision, and eaten keydowns only happen with pass-through off.
//! A keydown with no modifiers held clears both sets, bounding the damage
//! of a keyup the kernel never delivered to a single further keydown.

use std::collections::HashSet;

use evdev::Key;

use crate::collaborators::{EventSource, EventSourceRegistry, NavigationRangeStore, Preferences};
use crate::commands::{CommandContext, KeyCommandHandler};
use crate::keys::KeyEvent;
use crate::speech::{QueueMode, SpeechOutput};

/// The search key position on the target hardware.
pub const SEARCH_KEY: Key = Key::KEY_LEFTMETA;

/// Phase of the pass-through cycle. See the module docs for the diagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PassThroughState {
    /// Normal interception; no pass-through session in progress.
    #[default]
    NoPassThrough,
    /// Pass-through was just enabled; waiting for the activating shortcut's
    /// keys to release before raw forwarding starts.
    PendingPassThroughShortcutKeyups,
    /// Raw keys are being forwarded; waiting for the forwarded shortcut to
    /// fully release.
    PendingShortcutKeyups,
}

impl PassThroughState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassThroughState::NoPassThrough => "no-pass-through",
            PassThroughState::PendingPassThroughShortcutKeyups => {
                "pending-pass-through-shortcut-keyups"
            }
            PassThroughState::PendingShortcutKeyups => "pending-shortcut-keyups",
        }
    }
}

/// External state the dispatcher consults and nudges per event.
pub struct Collaborators {
    pub speech: Box<dyn SpeechOutput>,
    pub range: NavigationRangeStore,
    pub sources: EventSourceRegistry,
    pub prefs: Preferences,
}

/// Decides, for every native key transition, whether to stop propagation.
///
/// The hosting process constructs exactly one dispatcher and hands it to
/// the engine loop; all mutation happens on that single task, one event at
/// a time, so no locking is involved.
pub struct KeyEventDispatcher {
    eaten_key_downs: HashSet<Key>,
    passed_through_key_downs: HashSet<Key>,
    state: PassThroughState,
    pass_through_enabled: bool,
    handlers: Vec<Box<dyn KeyCommandHandler>>,
    collab: Collaborators,
}

impl KeyEventDispatcher {
    /// Create a dispatcher over the given command chain.
    ///
    /// Handlers are consulted in order; the first to report an event
    /// handled wins.
    pub fn new(collab: Collaborators, handlers: Vec<Box<dyn KeyCommandHandler>>) -> Self {
        Self {
            eaten_key_downs: HashSet::new(),
            passed_through_key_downs: HashSet::new(),
            state: PassThroughState::NoPassThrough,
            pass_through_enabled: false,
            handlers,
            collab,
        }
    }

    /// Process a keydown. Returns true if native propagation must stop.
    pub fn on_key_down(&mut self, mut event: KeyEvent) -> bool {
        self.collab.sources.set_source(EventSource::StandardKeyboard);
        event.sticky_mode = self.collab.prefs.sticky_mode;

        // Stale-state recovery: a keyup the kernel never delivered leaves a
        // dangling entry; the first modifier-free keydown clears both sets.
        if !event.modifiers.any() {
            self.eaten_key_downs.clear();
            self.passed_through_key_downs.clear();
        }

        if self.pass_through_enabled {
            self.passed_through_key_downs.insert(event.key);
            return false;
        }

        self.collab.speech.flush_next();
        self.collab.range.restore_last_valid();

        let (handled, pass_through_requested) = {
            let mut ctx = CommandContext::new(
                self.collab.speech.as_mut(),
                &mut self.collab.range,
                &mut self.collab.prefs,
            );
            let handled = self
                .handlers
                .iter_mut()
                .any(|handler| handler.try_handle_key_down(&event, &mut ctx));
            (handled, ctx.pass_through_requested())
        };
        if pass_through_requested {
            self.enable_pass_through_mode();
        }

        let search_key = (event.modifiers.meta || event.key == SEARCH_KEY)
            && self.collab.range.current().is_some();

        let mut stop_propagation = false;
        if !handled || search_key {
            stop_propagation = true;
            self.eaten_key_downs.insert(event.key);
        }

        // Pass-through was off on entry, so if the flag is set now a command
        // in the chain enabled it. The activating shortcut's keys are still
        // down; wait for their keyups before forwarding raw keys.
        if self.pass_through_enabled {
            self.state = PassThroughState::PendingPassThroughShortcutKeyups;
        }

        stop_propagation
    }

    /// Process a keyup. Returns true if native propagation must stop.
    pub fn on_key_up(&mut self, event: KeyEvent) -> bool {
        let mut stop_propagation = false;
        if self.eaten_key_downs.remove(&event.key) {
            stop_propagation = true;
        }

        if self.pass_through_enabled {
            self.passed_through_key_downs.remove(&event.key);

            match self.state {
                PassThroughState::PendingPassThroughShortcutKeyups => {
                    if !event.modifiers.any() && self.eaten_key_downs.is_empty() {
                        tracing::debug!("pass-through shortcut released; forwarding raw keys");
                        self.state = PassThroughState::PendingShortcutKeyups;
                    }
                }
                PassThroughState::PendingShortcutKeyups => {
                    if self.passed_through_key_downs.is_empty() {
                        tracing::debug!("forwarded shortcut released; resuming interception");
                        self.pass_through_enabled = false;
                        self.state = PassThroughState::NoPassThrough;
                    }
                }
                PassThroughState::NoPassThrough => {}
            }
        }

        stop_propagation
    }

    /// Enter pass-through mode.
    ///
    /// Fire-and-forget command entry point. Announces the mode and raises
    /// the flag; it never touches the state machine itself. The transition
    /// to `PendingPassThroughShortcutKeyups` happens on the keydown that
    /// carried the enabling command, tying the machine to real key-release
    /// observation.
    pub fn enable_pass_through_mode(&mut self) {
        self.collab.speech.speak(
            "Press a key or shortcut to pass through to the application",
            QueueMode::Flush,
        );
        self.pass_through_enabled = true;
    }

    /// Enter pass-through mode from the control socket.
    ///
    /// No keydown carries the enable here, so the machine is armed
    /// directly; whatever keys are still down (typically none) play the
    /// role of the activating shortcut.
    pub fn enable_pass_through_external(&mut self) {
        self.enable_pass_through_mode();
        self.state = PassThroughState::PendingPassThroughShortcutKeyups;
    }

    /// Whether a keydown repeat for this key should be suppressed.
    ///
    /// Repeats do not re-run the command chain: an eaten key stays eaten,
    /// everything else keeps flowing.
    pub fn should_suppress_repeat(&self, key: Key) -> bool {
        !self.pass_through_enabled && self.eaten_key_downs.contains(&key)
    }

    pub fn pass_through_enabled(&self) -> bool {
        self.pass_through_enabled
    }

    pub fn pass_through_state(&self) -> PassThroughState {
        self.state
    }

    pub fn sticky_mode(&self) -> bool {
        self.collab.prefs.sticky_mode
    }

    pub fn set_sticky_mode(&mut self, enabled: bool) {
        if self.collab.prefs.sticky_mode != enabled {
            self.collab.prefs.sticky_mode = enabled;
            let text = if enabled {
                "Sticky mode enabled"
            } else {
                "Sticky mode disabled"
            };
            self.collab.speech.speak(text, QueueMode::Flush);
        }
    }

    /// Speak a message through the dispatcher's speech output.
    pub fn speak(&mut self, text: &str) {
        self.collab.speech.speak(text, QueueMode::Queue);
    }

    #[cfg(test)]
    fn eaten_key_downs(&self) -> &HashSet<Key> {
        &self.eaten_key_downs
    }

    #[cfg(test)]
    fn passed_through_key_downs(&self) -> &HashSet<Key> {
        &self.passed_through_key_downs
    }
}
