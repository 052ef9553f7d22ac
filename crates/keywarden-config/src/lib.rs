//! Configuration parsing for keywarden
//!
//! This crate handles parsing KDL configuration files for the keywarden
//! daemon: global options, device matching rules, and key bindings.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{parse_config, parse_config_str};
