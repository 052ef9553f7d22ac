//! keywarden CLI
//!
//! Control and configuration tool for keywarden. Configuration commands
//! work offline; control commands talk to the running daemon over its
//! Unix socket.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "keywarden")]
#[command(about = "Accessibility key interception tool")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keywarden/config.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List available input devices
    Devices,

    /// Show current daemon status
    Status,

    /// Enable pass-through mode: the next shortcut is forwarded uninspected
    PassThrough,

    /// Turn sticky mode on or off
    Sticky {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Capture all keyboard input until a chord is pressed
    ForceAction {
        /// Chord that releases the capture (e.g., "Search+Space")
        chord: String,
    },

    /// Cancel a pending forced action
    CancelForceAction,

    /// Speak a message through the daemon's speech output
    Speak {
        /// Text to speak
        text: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Toggle {
    On,
    Off,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(),
        Commands::Status => cmd_status(),
        Commands::PassThrough => cmd_simple(json!({"type": "pass_through"})),
        Commands::Sticky { state } => cmd_simple(json!({
            "type": "set_sticky",
            "enabled": matches!(state, Toggle::On),
        })),
        Commands::ForceAction { chord } => {
            cmd_simple(json!({"type": "force_action", "chord": chord}))
        }
        Commands::CancelForceAction => cmd_simple(json!({"type": "cancel_force_action"})),
        Commands::Speak { text } => cmd_simple(json!({"type": "speak", "text": text})),
    }
}

fn cmd_validate(config_path: &PathBuf) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = keywarden_config::parse_config(config_path)?;

    println!("Configuration is valid!");
    println!("  Device rules: {}", config.devices.len());
    for device in &config.devices {
        match (&device.name, &device.vendor_product) {
            (Some(name), Some(vp)) => println!("    - {} ({})", name, vp),
            (Some(name), None) => println!("    - {}", name),
            (None, Some(vp)) => println!("    - id {}", vp),
            (None, None) => println!("    - <any>"),
        }
    }
    println!("  Bindings: {}", config.bindings.len());
    for binding in &config.bindings {
        println!("    - {} -> {}", binding.chord, binding.command);
    }

    Ok(())
}

fn cmd_devices() -> miette::Result<()> {
    println!("Available input devices:\n");

    for entry in std::fs::read_dir("/dev/input").into_diagnostic()? {
        let entry = entry.into_diagnostic()?;
        let path = entry.path();

        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        match evdev::Device::open(&path) {
            Ok(device) => {
                let name = device.name().unwrap_or("Unknown");
                let id = device.input_id();
                let vendor_product = format!("{:04x}:{:04x}", id.vendor(), id.product());

                // Check if it's a keyboard
                let is_keyboard = device.supported_events().contains(evdev::EventType::KEY)
                    && device
                        .supported_keys()
                        .map(|keys| keys.contains(evdev::Key::KEY_A))
                        .unwrap_or(false);

                let device_type = if is_keyboard { "keyboard" } else { "other" };

                println!("  {} [{}]", name, device_type);
                println!("    Path: {}", path.display());
                println!("    ID: {}", vendor_product);
                println!();
            }
            Err(_) => {
                // Skip devices we can't open
            }
        }
    }

    Ok(())
}

fn cmd_status() -> miette::Result<()> {
    let response = send_request(json!({"type": "status"}))?;

    match response["type"].as_str() {
        Some("status") => {
            println!("Daemon status:");
            println!(
                "  Pass-through: {} ({})",
                if response["pass_through"].as_bool().unwrap_or(false) {
                    "enabled"
                } else {
                    "disabled"
                },
                response["pass_through_state"].as_str().unwrap_or("unknown")
            );
            println!(
                "  Sticky mode:  {}",
                if response["sticky_mode"].as_bool().unwrap_or(false) {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!(
                "  Forced action: {}",
                if response["forced_action"].as_bool().unwrap_or(false) {
                    "armed"
                } else {
                    "none"
                }
            );
            println!("  Keyboards:");
            if let Some(devices) = response["devices"].as_array() {
                for device in devices {
                    println!(
                        "    - {} ({})",
                        device["name"].as_str().unwrap_or("Unknown"),
                        device["path"].as_str().unwrap_or("?")
                    );
                }
            }
            Ok(())
        }
        Some("error") => Err(daemon_error(&response)),
        _ => Err(miette::miette!("Unexpected response from daemon")),
    }
}

/// Send a request expecting a success/error answer.
fn cmd_simple(request: Value) -> miette::Result<()> {
    let response = send_request(request)?;

    match response["type"].as_str() {
        Some("success") => {
            if let Some(message) = response["message"].as_str() {
                println!("{}", message);
            }
            Ok(())
        }
        Some("error") => Err(daemon_error(&response)),
        _ => Err(miette::miette!("Unexpected response from daemon")),
    }
}

fn daemon_error(response: &Value) -> miette::Report {
    miette::miette!(
        "Daemon error: {}",
        response["message"].as_str().unwrap_or("unknown error")
    )
}

/// Send one JSON-line request to the daemon socket and read the reply.
fn send_request(request: Value) -> miette::Result<Value> {
    let path = socket_path();
    let mut stream = UnixStream::connect(&path).map_err(|e| {
        miette::miette!(
            "Could not connect to daemon at {} ({}). Is keywardend running?",
            path.display(),
            e
        )
    })?;

    let mut line = request.to_string();
    line.push('\n');
    stream.write_all(line.as_bytes()).into_diagnostic()?;
    stream.flush().into_diagnostic()?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).into_diagnostic()?;

    serde_json::from_str(response_line.trim()).into_diagnostic()
}

/// Daemon socket location.
///
/// NOTE: This must stay in sync with determine_socket_path() in
/// keywarden-daemon/src/ipc.rs
fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("keywarden.sock")
    } else {
        let uid = unsafe { nix::libc::getuid() };
        PathBuf::from(format!("/tmp/keywarden-{}.sock", uid))
    }
}
