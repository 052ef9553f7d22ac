use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(keywarden::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(keywarden::config::invalid))]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    #[diagnostic(code(keywarden::config::missing_field))]
    MissingField { field: String },

    #[error("Invalid key chord '{chord}': {reason}")]
    #[diagnostic(code(keywarden::config::invalid_chord))]
    InvalidChord { chord: String, reason: String },

    #[error("Unknown command: {command}")]
    #[diagnostic(
        code(keywarden::config::unknown_command),
        help("valid commands are: pass-through, toggle-sticky-mode, stop-speech, announce-position")
    )]
    UnknownCommand { command: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
