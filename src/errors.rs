use miette::Diagnostic;
use thiserror::Error;

use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum TollgateError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(tollgate::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(tollgate::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(tollgate::serde))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error("Invalid listen address `{0}`")]
    #[diagnostic(
        code(tollgate::bad_address),
        help("Check server.host and server.port in the configuration")
    )]
    BadAddress(String),
}
