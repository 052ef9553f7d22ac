//! Configuration data model

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub devices: Vec<DeviceMatch>,
    pub bindings: Vec<Binding>,
}

/// Global settings
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Initial sticky-mode preference. Runtime toggles do not write back.
    pub sticky_mode: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            sticky_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Name understood by tracing's env filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Rule for selecting which input devices to grab.
///
/// An empty rule set means "grab every keyboard".
#[derive(Debug, Clone, Default)]
pub struct DeviceMatch {
    /// Device name to match (from evdev)
    pub name: Option<String>,
    /// Vendor:Product ID to match (e.g., "3434:0361")
    pub vendor_product: Option<String>,
}

/// A key binding: chord string mapped to a named command.
///
/// The chord string (e.g., "Search+P") is validated at parse time but kept
/// as text; the daemon parses it into its own chord representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub chord: String,
    pub command: String,
}

/// Command names the daemon knows how to execute.
///
/// NOTE: This must stay in sync with Command::from_name() in
/// keywarden-daemon/src/commands.rs
pub const KNOWN_COMMANDS: &[&str] = &[
    "pass-through",
    "toggle-sticky-mode",
    "stop-speech",
    "announce-position",
];
