//! Browser-assisted credential handshake.
//!
//! The CLI opens the admin UI in a browser, then waits for the token bundle
//! on two paths at once: the UI posting it to a local callback listener, or
//! the operator pasting it into the terminal. The first to arrive is stored.

mod coordinator;
mod error;
mod listener;
mod manual;
mod payload;

pub use coordinator::{LoginCoordinator, LoginOptions, DEFAULT_LOGIN_TIMEOUT};
pub use error::{AuthError, OpenError, StorageError};
pub use listener::{ListenerConfig, DEFAULT_CALLBACK_PORT};
pub use manual::TerminalLineReader;
pub use payload::{encode_pasted, CredentialPayload};

use crate::ui::{print_command_status, CommandStatus};

/// One handshake. Built once the target has been resolved; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub app_id: String,
    pub env_name: String,
    pub region: String,
    pub origin_url: String,
}

/// What a single delivery path produced.
#[derive(Debug)]
pub enum ChannelOutcome<E> {
    Delivered(CredentialPayload),
    Failed(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
}

pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> Result<(), OpenError>;
}

/// Operator-facing status line sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str);
}

pub trait CredentialStore: Send + Sync {
    fn store(&self, payload: &CredentialPayload, app_id: &str) -> Result<(), StorageError>;
}

/// Opens URLs with the platform's default handler.
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), OpenError> {
        open::that_detached(url)?;
        Ok(())
    }
}

pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        let status = match level {
            NotifyLevel::Info => CommandStatus::Info,
            NotifyLevel::Success => CommandStatus::Success,
            NotifyLevel::Warning => CommandStatus::Warning,
            NotifyLevel::Error => CommandStatus::Error,
        };
        print_command_status(status, message);
    }
}
