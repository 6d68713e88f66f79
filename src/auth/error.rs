use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The callback listener could not claim its local address.
#[derive(Debug, Error)]
#[error("failed to bind callback listener on {addr}: {source}")]
pub struct BindError {
    pub addr: String,
    #[source]
    pub source: io::Error,
}

/// Why the network path stopped competing in the race.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("callback listener was already started")]
    AlreadyStarted,

    #[error("callback listener closed before credentials arrived")]
    Closed,
}

/// Failures of the paste-a-token path. None of these abort the race.
#[derive(Debug, Error)]
pub enum ManualEntryError {
    #[error("no token was pasted")]
    Empty,

    #[error("pasted token is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("pasted token is not a valid credential record: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read pasted token: {0}")]
    Input(#[source] io::Error),
}

#[derive(Debug, Error)]
#[error("failed to open web browser: {0}")]
pub struct OpenError(#[from] pub io::Error);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not determine where to store credentials: {0}")]
    Location(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("credentials file {} is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize credentials: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Umbrella error returned when a login attempt as a whole fails.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials were received (callback: {listener}; pasted token: {manual})")]
    AllChannelsFailed { listener: String, manual: String },

    #[error("timed out after {}s waiting for credentials", .0.as_secs())]
    TimedOut(Duration),

    #[error("credentials were received but could not be stored: {0}")]
    Storage(#[from] StorageError),
}
