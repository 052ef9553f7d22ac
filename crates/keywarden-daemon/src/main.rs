//! keywarden daemon
//!
//! Grabs keyboards for exclusive access, runs every key transition through
//! the accessibility dispatcher, and re-injects whatever is not consumed
//! through a virtual output device.

mod collaborators;
mod commands;
mod dispatcher;
mod engine;
mod injector;
mod ipc;
mod keys;
mod listener;
mod speech;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::collaborators::{EventSourceRegistry, NavigationRangeStore, Preferences};
use crate::commands::{
    BindingCommandHandler, ForcedActionHandler, KeyCommandHandler, MathCommandHandler,
};
use crate::dispatcher::{Collaborators, KeyEventDispatcher};
use crate::engine::Engine;
use crate::ipc::IpcServer;
use crate::speech::TracingSpeech;

/// Name of the uinput device forwarded events are emitted through. The
/// listener must skip it during enumeration or the daemon would grab its
/// own output.
pub const VIRTUAL_DEVICE_NAME: &str = "keywarden virtual keyboard";

#[derive(Parser, Debug)]
#[command(name = "keywardend")]
#[command(about = "Accessibility key interception daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keywarden/config.kdl")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging comes up before the config load so parse diagnostics are not
    // lost; the filter is swapped to the configured level afterwards.
    // RUST_LOG still wins over the config.
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new("info"), false),
    };
    let (filter, filter_handle) = tracing_subscriber::reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    let config = keywarden_config::parse_config(&config_path)?;

    if !from_env {
        let level = config.global.log_level.as_str();
        filter_handle.modify(|filter| *filter = EnvFilter::new(level))?;
    }

    tracing::info!(
        "Loaded configuration from {} ({} binding(s), {} device rule(s))",
        config_path.display(),
        config.bindings.len(),
        config.devices.len()
    );

    // Output device first so enumeration below can skip it by name
    let output = injector::VirtualDevice::new_keyboard(VIRTUAL_DEVICE_NAME)?;

    let grabbed = listener::grab_keyboards(&config.devices)?;
    if grabbed.is_empty() {
        anyhow::bail!("No keyboards matched the configuration, nothing to intercept");
    }

    let collab = Collaborators {
        speech: Box::new(TracingSpeech::new()),
        range: NavigationRangeStore::new(),
        sources: EventSourceRegistry::new(),
        prefs: Preferences::new(config.global.sticky_mode),
    };
    // The forced action handler lives in the dispatcher chain; its arming
    // handle goes to the engine so the control socket can reach it.
    let forced_action = ForcedActionHandler::new();
    let forced_action_handle = forced_action.handle();
    let handlers: Vec<Box<dyn KeyCommandHandler>> = vec![
        Box::new(MathCommandHandler::new()),
        Box::new(forced_action),
        Box::new(BindingCommandHandler::from_config(&config.bindings)),
    ];
    let dispatcher = KeyEventDispatcher::new(collab, handlers);

    let (tx, rx) = mpsc::channel(256);

    let mut infos = Vec::with_capacity(grabbed.len());
    for (info, device) in grabbed {
        infos.push(info.clone());
        listener::spawn_reader(info, device, tx.clone());
    }

    let ipc_server = IpcServer::new()?;

    let engine = Engine::new(dispatcher, forced_action_handle, output, infos, rx);

    tracing::info!("keywarden daemon running");

    tokio::select! {
        result = engine.run() => result,
        result = accept_loop(&ipc_server, tx) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            Ok(())
        }
    }
}

/// Accept IPC connections and serve each on its own task.
async fn accept_loop(
    server: &IpcServer,
    engine_tx: mpsc::Sender<engine::EngineMessage>,
) -> Result<()> {
    loop {
        let stream = server.accept().await?;
        let tx = engine_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc::serve_connection(stream, tx).await {
                tracing::warn!("IPC connection failed: {}", e);
            }
        });
    }
}
