//! Virtual device injection via uinput
//!
//! Grabbed keyboards are read exclusively, so every event the dispatcher
//! does not consume must be re-emitted through a virtual keyboard for the
//! rest of the system to see it.

use anyhow::Result;
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, EventType, InputEvent, Key};

/// Destination for key events that survive interception.
///
/// The engine forwards through this trait so tests can capture the outgoing
/// stream without a uinput device.
pub trait EventSink: Send {
    /// Emit a single key transition (value 0 = release, 1 = press,
    /// 2 = repeat) followed by a synchronization report.
    fn key_event(&mut self, key: Key, value: i32) -> Result<()>;
}

/// A virtual keyboard device for re-injecting forwarded events.
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualDevice {
    /// Create a new virtual keyboard device.
    ///
    /// Fails if /dev/uinput is not accessible.
    pub fn new_keyboard(name: &str) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();

        // Advertise all standard keys so any forwarded code is valid
        for code in 0..256u16 {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .build()?;

        Ok(Self { device })
    }

    /// Emit raw input events.
    pub fn emit(&mut self, events: &[InputEvent]) -> Result<()> {
        self.device.emit(events)?;
        Ok(())
    }
}

impl EventSink for VirtualDevice {
    fn key_event(&mut self, key: Key, value: i32) -> Result<()> {
        let event = InputEvent::new(EventType::KEY, key.code(), value);
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.emit(&[event, syn])
    }
}

/// Sink that records forwarded events for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<(Key, i32)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for RecordingSink {
    fn key_event(&mut self, key: Key, value: i32) -> Result<()> {
        self.events.push((key, value));
        Ok(())
    }
}
