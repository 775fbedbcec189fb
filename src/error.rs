//! Error handler for reserva-auth.

use ldap3::LdapError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
///
/// Denied credentials are never errors: every refusal path in
/// [`crate::auth`] reports a boolean outcome instead.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The directory could not be reached while no fallback was
    /// configured. Fatal, must reach the caller.
    #[error("directory is unreachable")]
    DirectoryUnreachable,

    /// No local account exists for a user who must already be known.
    #[error("no local account for `{0}`")]
    UserNotFound(String),

    #[error("LDAP transport failed: {0}")]
    Ldap(#[from] LdapError),

    #[error("mail broker failed: {0}")]
    Mail(#[from] lapin::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    UrlParsing(#[from] url::ParseError),

    #[error("address scheme must be `amqp` or `amqps`")]
    InvalidScheme,
}
