//! Accessibility command chain
//!
//! Keydowns that survive the dispatcher's pass-through short-circuit are
//! offered to an ordered list of [`KeyCommandHandler`]s: the math handler,
//! the forced-action handler, then the binding handler. The first handler
//! that reports the event handled short-circuits the chain.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use evdev::Key;

use crate::collaborators::{NavigationRangeStore, Preferences};
use crate::keys::{parse_chord, KeyChord, KeyEvent, Modifier};
use crate::speech::{QueueMode, SpeechOutput};

/// Commands executable from key bindings or the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Enable pass-through mode: forward the next shortcut uninspected.
    PassThrough,
    /// Flip the sticky-mode preference.
    ToggleStickyMode,
    /// Stop all speech output.
    StopSpeech,
    /// Speak the current navigation position.
    AnnouncePosition,
}

impl Command {
    /// Resolve a configured command name.
    ///
    /// NOTE: This must stay in sync with KNOWN_COMMANDS in
    /// keywarden-config/src/model.rs
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pass-through" => Some(Command::PassThrough),
            "toggle-sticky-mode" => Some(Command::ToggleStickyMode),
            "stop-speech" => Some(Command::StopSpeech),
            "announce-position" => Some(Command::AnnouncePosition),
            _ => None,
        }
    }
}

/// Mutable view of the collaborators a handler may touch, plus the
/// pass-through request flag the dispatcher inspects after the chain.
///
/// A command cannot flip the dispatcher's pass-through flag directly (the
/// dispatcher is the caller); it records the request here and the
/// dispatcher applies it once the chain returns.
pub struct CommandContext<'a> {
    pub speech: &'a mut dyn SpeechOutput,
    pub range: &'a mut NavigationRangeStore,
    pub prefs: &'a mut Preferences,
    pass_through_requested: bool,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        speech: &'a mut dyn SpeechOutput,
        range: &'a mut NavigationRangeStore,
        prefs: &'a mut Preferences,
    ) -> Self {
        Self {
            speech,
            range,
            prefs,
            pass_through_requested: false,
        }
    }

    /// Ask the dispatcher to enter pass-through mode after the chain.
    pub fn request_pass_through(&mut self) {
        self.pass_through_requested = true;
    }

    pub fn pass_through_requested(&self) -> bool {
        self.pass_through_requested
    }
}

/// A link in the command chain.
pub trait KeyCommandHandler: Send {
    /// Attempt to handle a keydown. Returning true consumes the event for
    /// command processing and stops the chain.
    fn try_handle_key_down(&mut self, event: &KeyEvent, ctx: &mut CommandContext<'_>) -> bool;
}

// ============================================================================
// Math handler
// ============================================================================

/// Handles exploration keys while the navigation range sits in math content.
///
/// Inactive (handles nothing) whenever the current range is missing or not
/// math; math tree traversal itself is owned by the math subsystem, this
/// handler only routes the arrow keys and speaks the movement.
#[derive(Debug, Default)]
pub struct MathCommandHandler;

impl MathCommandHandler {
    pub fn new() -> Self {
        Self
    }
}

impl KeyCommandHandler for MathCommandHandler {
    fn try_handle_key_down(&mut self, event: &KeyEvent, ctx: &mut CommandContext<'_>) -> bool {
        let in_math = ctx.range.current().map_or(false, |r| r.is_math);
        if !in_math || event.modifiers.any() {
            return false;
        }

        let movement = match event.key {
            Key::KEY_RIGHT => "next term",
            Key::KEY_LEFT => "previous term",
            Key::KEY_DOWN => "into expression",
            Key::KEY_UP => "out of expression",
            _ => return false,
        };

        ctx.speech
            .speak(&format!("Math: {}", movement), QueueMode::Flush);
        true
    }
}

// ============================================================================
// Forced action handler
// ============================================================================

/// While armed with an expected chord, consumes every keydown until that
/// chord is pressed (used for guided tutorials and confirmation flows).
///
/// Modifier keydowns are consumed silently so the user can build up the
/// expected chord without triggering the hint on each modifier.
///
/// The handler itself is boxed into the dispatcher's chain; arming happens
/// from outside (the control socket) through a [`ForcedActionHandle`], so
/// the expected chord lives behind a shared lock.
#[derive(Debug, Default)]
pub struct ForcedActionHandler {
    expected: Arc<Mutex<Option<KeyChord>>>,
}

impl ForcedActionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for arming and cancelling the capture from outside the chain.
    pub fn handle(&self) -> ForcedActionHandle {
        ForcedActionHandle {
            expected: Arc::clone(&self.expected),
        }
    }
}

/// Arms and cancels the forced action capture while the handler sits inside
/// the dispatcher.
#[derive(Debug, Clone)]
pub struct ForcedActionHandle {
    expected: Arc<Mutex<Option<KeyChord>>>,
}

impl ForcedActionHandle {
    /// Arm the capture: all input is consumed until `chord` is pressed.
    pub fn arm(&self, chord: KeyChord) {
        *lock_expected(&self.expected) = Some(chord);
    }

    pub fn cancel(&self) {
        *lock_expected(&self.expected) = None;
    }

    pub fn is_armed(&self) -> bool {
        lock_expected(&self.expected).is_some()
    }
}

// A poisoned lock still holds a usable Option.
fn lock_expected(expected: &Mutex<Option<KeyChord>>) -> MutexGuard<'_, Option<KeyChord>> {
    expected.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KeyCommandHandler for ForcedActionHandler {
    fn try_handle_key_down(&mut self, event: &KeyEvent, ctx: &mut CommandContext<'_>) -> bool {
        let mut slot = lock_expected(&self.expected);
        let Some(expected) = *slot else {
            return false;
        };

        if expected.matches(event) {
            *slot = None;
            ctx.speech.speak("Continuing", QueueMode::Flush);
            return true;
        }

        if Modifier::from_key(event.key).is_some() {
            return true;
        }

        ctx.speech.speak(
            &format!("Press {} to continue", expected),
            QueueMode::Flush,
        );
        true
    }
}

// ============================================================================
// Binding handler
// ============================================================================

/// Matches keydowns against the configured chord-to-command bindings and
/// executes the bound command.
#[derive(Debug, Default)]
pub struct BindingCommandHandler {
    bindings: Vec<(KeyChord, Command)>,
}

impl BindingCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the binding table from configuration.
    ///
    /// Bindings that fail to parse are skipped with a warning; the config
    /// crate validates chord syntax up front, so this only fires when the
    /// two parsers disagree.
    pub fn from_config(bindings: &[keywarden_config::Binding]) -> Self {
        let mut handler = Self::new();
        for binding in bindings {
            let chord = match parse_chord(&binding.chord) {
                Ok(chord) => chord,
                Err(e) => {
                    tracing::warn!("Skipping binding '{}': {}", binding.chord, e);
                    continue;
                }
            };
            let command = match Command::from_name(&binding.command) {
                Some(command) => command,
                None => {
                    tracing::warn!(
                        "Skipping binding '{}': unknown command '{}'",
                        binding.chord,
                        binding.command
                    );
                    continue;
                }
            };
            tracing::debug!("Registered binding: {} -> {:?}", chord, command);
            handler.register(chord, command);
        }
        handler
    }

    pub fn register(&mut self, chord: KeyChord, command: Command) {
        self.bindings.push((chord, command));
    }

    fn execute(command: Command, ctx: &mut CommandContext<'_>) {
        match command {
            Command::PassThrough => {
                ctx.request_pass_through();
            }
            Command::ToggleStickyMode => {
                let enabled = ctx.prefs.toggle_sticky_mode();
                let text = if enabled {
                    "Sticky mode enabled"
                } else {
                    "Sticky mode disabled"
                };
                ctx.speech.speak(text, QueueMode::Flush);
            }
            Command::StopSpeech => {
                ctx.speech.stop();
            }
            Command::AnnouncePosition => {
                let text = match ctx.range.current() {
                    Some(range) => range.description.clone(),
                    None => "No current position".to_string(),
                };
                ctx.speech.speak(&text, QueueMode::Flush);
            }
        }
    }
}

impl KeyCommandHandler for BindingCommandHandler {
    fn try_handle_key_down(&mut self, event: &KeyEvent, ctx: &mut CommandContext<'_>) -> bool {
        let command = self
            .bindings
            .iter()
            .find(|(chord, _)| chord.matches(event))
            .map(|&(_, command)| command);

        match command {
            Some(command) => {
                Self::execute(command, ctx);
                true
            }
            None => false,
        }
    }
}
