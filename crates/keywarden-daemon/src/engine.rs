//! Engine loop: single-task event processing
//!
//! Device reader tasks and IPC connection tasks all feed one mpsc channel;
//! the engine drains it on a single task that owns the dispatcher, the
//! modifier tracker, and the output device. Events are processed one at a
//! time in arrival order, so the dispatcher never needs locking.

use anyhow::Result;
use evdev::Key;
use tokio::sync::mpsc;

use crate::commands::ForcedActionHandle;
use crate::dispatcher::KeyEventDispatcher;
use crate::injector::EventSink;
use crate::ipc::{ControlRequest, DeviceStatus, IpcRequest, IpcResponse};
use crate::keys::{parse_chord, KeyEvent, ModifierTracker};
use crate::listener::DeviceInfo;

/// Messages feeding the engine loop.
#[derive(Debug)]
pub enum EngineMessage {
    /// Raw key transition from a grabbed keyboard.
    Key { key: Key, value: i32 },
    /// Control request from the IPC socket.
    Control(ControlRequest),
}

/// Owns the dispatcher and processes the merged event stream.
pub struct Engine<S: EventSink> {
    dispatcher: KeyEventDispatcher,
    forced_action: ForcedActionHandle,
    tracker: ModifierTracker,
    output: S,
    devices: Vec<DeviceInfo>,
    rx: mpsc::Receiver<EngineMessage>,
}

impl<S: EventSink> Engine<S> {
    pub fn new(
        dispatcher: KeyEventDispatcher,
        forced_action: ForcedActionHandle,
        output: S,
        devices: Vec<DeviceInfo>,
        rx: mpsc::Receiver<EngineMessage>,
    ) -> Self {
        Self {
            dispatcher,
            forced_action,
            tracker: ModifierTracker::new(),
            output,
            devices,
            rx,
        }
    }

    /// Run until every sender is gone.
    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.rx.recv().await {
            match message {
                EngineMessage::Key { key, value } => self.handle_key(key, value)?,
                EngineMessage::Control(control) => self.handle_control(control),
            }
        }

        tracing::info!("All event sources closed, engine stopping");
        Ok(())
    }

    /// Process one raw key transition.
    ///
    /// The tracker is updated before the snapshot is taken, so a modifier's
    /// own keydown already carries its flag and its keyup no longer does.
    fn handle_key(&mut self, key: Key, value: i32) -> Result<()> {
        self.tracker.update(key, value);
        let event = KeyEvent::new(key, self.tracker.snapshot());

        let consumed = match value {
            1 => self.dispatcher.on_key_down(event),
            0 => self.dispatcher.on_key_up(event),
            2 => self.dispatcher.should_suppress_repeat(key),
            other => {
                tracing::trace!("Ignoring key event with value {}", other);
                false
            }
        };

        if !consumed {
            self.output.key_event(key, value)?;
        }
        Ok(())
    }

    fn handle_control(&mut self, control: ControlRequest) {
        tracing::debug!("Control request: {:?}", control.request);

        let response = match control.request {
            IpcRequest::Status => IpcResponse::Status {
                pass_through: self.dispatcher.pass_through_enabled(),
                pass_through_state: self.dispatcher.pass_through_state().as_str().to_string(),
                sticky_mode: self.dispatcher.sticky_mode(),
                forced_action: self.forced_action.is_armed(),
                devices: self
                    .devices
                    .iter()
                    .map(|info| DeviceStatus {
                        name: info.name.clone(),
                        path: info.path.clone(),
                    })
                    .collect(),
            },
            IpcRequest::PassThrough => {
                self.dispatcher.enable_pass_through_external();
                IpcResponse::Success {
                    message: Some("Pass-through enabled".to_string()),
                }
            }
            IpcRequest::SetSticky { enabled } => {
                self.dispatcher.set_sticky_mode(enabled);
                IpcResponse::Success {
                    message: Some(
                        if enabled {
                            "Sticky mode enabled"
                        } else {
                            "Sticky mode disabled"
                        }
                        .to_string(),
                    ),
                }
            }
            IpcRequest::ForceAction { chord } => match parse_chord(&chord) {
                Ok(parsed) => {
                    self.forced_action.arm(parsed);
                    self.dispatcher.speak(&format!("Press {} to continue", parsed));
                    IpcResponse::Success {
                        message: Some(format!("Capturing input until {}", parsed)),
                    }
                }
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            },
            IpcRequest::CancelForceAction => {
                self.forced_action.cancel();
                IpcResponse::Success {
                    message: Some("Forced action cancelled".to_string()),
                }
            }
            IpcRequest::Speak { text } => {
                self.dispatcher.speak(&text);
                IpcResponse::Success { message: None }
            }
        };

        // Client may have disconnected while waiting; nothing to do then.
        let _ = control.reply.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{EventSourceRegistry, NavigationRangeStore, Preferences};
    use crate::commands::{CommandContext, ForcedActionHandler, KeyCommandHandler};
    use crate::dispatcher::Collaborators;
    use crate::injector::RecordingSink;
    use crate::speech::RecordingSpeech;
    use tokio::sync::oneshot;

    struct StaticHandler {
        handled: bool,
    }

    impl KeyCommandHandler for StaticHandler {
        fn try_handle_key_down(&mut self, _: &KeyEvent, _: &mut CommandContext<'_>) -> bool {
            self.handled
        }
    }

    fn collab() -> Collaborators {
        Collaborators {
            speech: Box::new(RecordingSpeech::new()),
            range: NavigationRangeStore::new(),
            sources: EventSourceRegistry::new(),
            prefs: Preferences::new(false),
        }
    }

    fn engine(handled: bool) -> Engine<RecordingSink> {
        let forced = ForcedActionHandler::new();
        let handle = forced.handle();
        let dispatcher = KeyEventDispatcher::new(
            collab(),
            vec![Box::new(forced), Box::new(StaticHandler { handled })],
        );
        let (_tx, rx) = mpsc::channel(8);
        Engine::new(dispatcher, handle, RecordingSink::new(), Vec::new(), rx)
    }

    #[test]
    fn forwards_events_the_dispatcher_does_not_consume() {
        let mut engine = engine(true);

        engine.handle_key(Key::KEY_A, 1).unwrap();
        engine.handle_key(Key::KEY_A, 0).unwrap();

        assert_eq!(
            engine.output.events,
            vec![(Key::KEY_A, 1), (Key::KEY_A, 0)]
        );
    }

    #[test]
    fn eaten_events_never_reach_the_output() {
        let mut engine = engine(false);

        engine.handle_key(Key::KEY_A, 1).unwrap();
        engine.handle_key(Key::KEY_A, 0).unwrap();

        assert!(engine.output.events.is_empty());
    }

    #[test]
    fn repeats_of_eaten_keys_are_suppressed() {
        let mut engine = engine(false);

        engine.handle_key(Key::KEY_A, 1).unwrap();
        engine.handle_key(Key::KEY_A, 2).unwrap();
        assert!(engine.output.events.is_empty());

        // Repeat for a key that was never eaten flows through
        engine.handle_key(Key::KEY_B, 2).unwrap();
        assert_eq!(engine.output.events, vec![(Key::KEY_B, 2)]);
    }

    #[test]
    fn modifier_snapshot_reflects_held_keys() {
        // Ctrl held: its own keydown is forwarded (handled chain), and the
        // following keyup with Ctrl released again.
        let mut engine = engine(true);

        engine.handle_key(Key::KEY_LEFTCTRL, 1).unwrap();
        assert!(engine.tracker.snapshot().ctrl);
        engine.handle_key(Key::KEY_LEFTCTRL, 0).unwrap();
        assert!(!engine.tracker.snapshot().any());
    }

    #[test]
    fn status_control_reports_dispatcher_state() {
        let mut engine = engine(false);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        engine.handle_control(ControlRequest {
            request: IpcRequest::Status,
            reply: reply_tx,
        });

        match reply_rx.try_recv().unwrap() {
            IpcResponse::Status {
                pass_through,
                pass_through_state,
                sticky_mode,
                forced_action,
                devices,
            } => {
                assert!(!pass_through);
                assert_eq!(pass_through_state, "no-pass-through");
                assert!(!sticky_mode);
                assert!(!forced_action);
                assert!(devices.is_empty());
            }
            other => panic!("Expected Status response, got {:?}", other),
        }
    }

    #[test]
    fn pass_through_control_starts_raw_forwarding() {
        let mut engine = engine(false);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        engine.handle_control(ControlRequest {
            request: IpcRequest::PassThrough,
            reply: reply_tx,
        });
        assert!(matches!(
            reply_rx.try_recv().unwrap(),
            IpcResponse::Success { .. }
        ));

        // With the unhandling chain these would normally be eaten; under
        // pass-through they are forwarded raw.
        engine.handle_key(Key::KEY_A, 1).unwrap();
        engine.handle_key(Key::KEY_A, 0).unwrap();
        assert_eq!(
            engine.output.events,
            vec![(Key::KEY_A, 1), (Key::KEY_A, 0)]
        );
    }

    #[test]
    fn force_action_control_captures_until_chord() {
        // The static handler would forward everything; once armed, the
        // forced action capture must win until its chord is pressed.
        let mut engine = engine(true);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        engine.handle_control(ControlRequest {
            request: IpcRequest::ForceAction {
                chord: "Search+Space".to_string(),
            },
            reply: reply_tx,
        });
        assert!(matches!(
            reply_rx.try_recv().unwrap(),
            IpcResponse::Success { .. }
        ));
        assert!(engine.forced_action.is_armed());

        // Wrong key is consumed
        engine.handle_key(Key::KEY_A, 1).unwrap();
        assert!(engine.output.events.is_empty());
        assert!(engine.forced_action.is_armed());

        // The expected chord disarms the capture
        engine.handle_key(Key::KEY_LEFTMETA, 1).unwrap();
        engine.handle_key(Key::KEY_SPACE, 1).unwrap();
        assert!(!engine.forced_action.is_armed());
    }

    #[test]
    fn force_action_control_rejects_bad_chord() {
        let mut engine = engine(true);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        engine.handle_control(ControlRequest {
            request: IpcRequest::ForceAction {
                chord: "Nope+Q".to_string(),
            },
            reply: reply_tx,
        });

        assert!(matches!(
            reply_rx.try_recv().unwrap(),
            IpcResponse::Error { .. }
        ));
        assert!(!engine.forced_action.is_armed());
    }

    #[test]
    fn cancel_force_action_control_disarms() {
        let mut engine = engine(true);
        engine
            .forced_action
            .arm(parse_chord("Search+Space").unwrap());

        let (reply_tx, mut reply_rx) = oneshot::channel();
        engine.handle_control(ControlRequest {
            request: IpcRequest::CancelForceAction,
            reply: reply_tx,
        });

        assert!(matches!(
            reply_rx.try_recv().unwrap(),
            IpcResponse::Success { .. }
        ));
        assert!(!engine.forced_action.is_armed());
    }

    #[test]
    fn set_sticky_control_updates_preference() {
        let mut engine = engine(false);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        engine.handle_control(ControlRequest {
            request: IpcRequest::SetSticky { enabled: true },
            reply: reply_tx,
        });

        match reply_rx.try_recv().unwrap() {
            IpcResponse::Success { message } => {
                assert_eq!(message.as_deref(), Some("Sticky mode enabled"));
            }
            other => panic!("Expected Success response, got {:?}", other),
        }
        assert!(engine.dispatcher.sticky_mode());
    }
}
