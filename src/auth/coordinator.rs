use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::error::{AuthError, ListenerError, ManualEntryError};
use super::listener::{CallbackListener, ListenerConfig, ListenerState};
use super::manual::{LineReader, ManualEntryChannel, PASTE_PROMPT};
use super::payload::CredentialPayload;
use super::{Browser, ChannelOutcome, CredentialStore, LoginAttempt, Notifier, NotifyLevel};
use crate::target::build_login_url;

pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub listener: ListenerConfig,
    /// `None` waits for the operator forever.
    pub timeout: Option<Duration>,
    pub open_browser: bool,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeout: Some(DEFAULT_LOGIN_TIMEOUT),
            open_browser: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    BrowserOpened,
    Racing,
    Storing,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Winner {
    Callback,
    Manual,
}

/// Drives one login: browser, both delivery paths, storage, cleanup.
pub struct LoginCoordinator {
    browser: Arc<dyn Browser>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn CredentialStore>,
    reader: Arc<dyn LineReader>,
    options: LoginOptions,
    state: CoordinatorState,
    listener_state: ListenerState,
    listener_stops: usize,
}

impl LoginCoordinator {
    pub fn new(
        browser: Arc<dyn Browser>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn CredentialStore>,
        reader: Arc<dyn LineReader>,
        options: LoginOptions,
    ) -> Self {
        Self {
            browser,
            notifier,
            store,
            reader,
            options,
            state: CoordinatorState::Idle,
            listener_state: ListenerState::NotStarted,
            listener_stops: 0,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Listener state as of the end of the last `run`.
    pub fn listener_state(&self) -> ListenerState {
        self.listener_state
    }

    pub fn listener_stops(&self) -> usize {
        self.listener_stops
    }

    pub async fn run(&mut self, attempt: &LoginAttempt) -> Result<(), AuthError> {
        self.state = CoordinatorState::Idle;

        let url = build_login_url(&attempt.origin_url, &attempt.app_id, &attempt.env_name);
        self.open_browser(&url);
        self.state = CoordinatorState::BrowserOpened;

        let mut listener =
            CallbackListener::new(self.options.listener.clone(), &attempt.origin_url);
        let raced = self.race(&mut listener).await;

        // the loser is abandoned here; a pending paste is never read again
        listener.stop().await;
        self.listener_state = listener.state();
        self.listener_stops = listener.stop_count();

        let result = match raced {
            Ok((payload, winner)) => self.finish(&payload, winner, attempt),
            Err(err) => Err(err),
        };

        match &result {
            Ok(()) => self.state = CoordinatorState::Done,
            Err(err) => {
                self.state = CoordinatorState::Aborted;
                self.notifier.notify(
                    NotifyLevel::Error,
                    &format!("Failed to authenticate with Amplify Studio: {err}"),
                );
            }
        }
        result
    }

    fn open_browser(&self, url: &str) {
        if !self.options.open_browser {
            self.notifier
                .notify(NotifyLevel::Info, &format!("Open this link to log in: {url}"));
            return;
        }

        self.notifier
            .notify(NotifyLevel::Info, &format!("Opening link: {url}"));
        if let Err(err) = self.browser.open(url) {
            warn!(error = %err, "browser open failed");
            self.notifier.notify(NotifyLevel::Warning, &err.to_string());
        }
        self.notifier
            .notify(NotifyLevel::Info, "Continue in browser to log in…");
    }

    async fn race(
        &mut self,
        listener: &mut CallbackListener,
    ) -> Result<(CredentialPayload, Winner), AuthError> {
        let (delivered_tx, delivered) = oneshot::channel();
        let callback_failure = match listener.start(move |payload| {
            let _ = delivered_tx.send(payload);
        }) {
            Ok(_) => {
                info!(
                    url = listener.callback_url().unwrap_or_default(),
                    "waiting for browser callback"
                );
                None
            }
            Err(err) => {
                warn!(error = %err, "callback listener unavailable");
                self.notifier.notify(
                    NotifyLevel::Warning,
                    &format!("{err}. Paste the token from the browser instead."),
                );
                Some(err)
            }
        };

        let manual = ManualEntryChannel::spawn(Arc::clone(&self.reader), PASTE_PROMPT).await_input();

        self.state = CoordinatorState::Racing;
        debug!(listener = ?listener.state(), "racing callback against pasted token");
        self.first_delivery(delivered, manual, callback_failure).await
    }

    /// Wait for whichever path delivers first. A path that fails drops out
    /// and the other keeps going.
    async fn first_delivery(
        &self,
        mut delivered: oneshot::Receiver<CredentialPayload>,
        manual: impl Future<Output = ChannelOutcome<ManualEntryError>>,
        mut callback_failure: Option<ListenerError>,
    ) -> Result<(CredentialPayload, Winner), AuthError> {
        tokio::pin!(manual);
        let mut manual_failure: Option<ManualEntryError> = None;

        let timeout = self.options.timeout;
        let deadline = deadline(timeout);
        tokio::pin!(deadline);

        loop {
            if let (Some(listener_err), Some(manual_err)) = (&callback_failure, &manual_failure) {
                return Err(AuthError::AllChannelsFailed {
                    listener: listener_err.to_string(),
                    manual: manual_err.to_string(),
                });
            }

            // biased: a callback that is ready wins over a paste that is ready
            tokio::select! {
                biased;

                received = &mut delivered, if callback_failure.is_none() => match received {
                    Ok(payload) => return Ok((payload, Winner::Callback)),
                    Err(_) => callback_failure = Some(ListenerError::Closed),
                },

                outcome = &mut manual, if manual_failure.is_none() => match outcome {
                    ChannelOutcome::Delivered(payload) => return Ok((payload, Winner::Manual)),
                    ChannelOutcome::Failed(err) => {
                        self.notifier.notify(
                            NotifyLevel::Warning,
                            &manual_failure_message(&err, callback_failure.is_none()),
                        );
                        manual_failure = Some(err);
                    }
                },

                _ = &mut deadline => {
                    return Err(AuthError::TimedOut(timeout.unwrap_or_default()));
                }
            }
        }
    }

    fn finish(
        &mut self,
        payload: &CredentialPayload,
        winner: Winner,
        attempt: &LoginAttempt,
    ) -> Result<(), AuthError> {
        info!(
            ?winner,
            app_id = %attempt.app_id,
            region = %attempt.region,
            "credentials received"
        );
        if payload.is_expired_at(Utc::now()) {
            self.notifier.notify(
                NotifyLevel::Warning,
                "Received tokens have already expired; they are stored anyway.",
            );
        }

        self.state = CoordinatorState::Storing;
        self.store.store(payload, &attempt.app_id)?;

        self.notifier.notify(
            NotifyLevel::Success,
            "Successfully received Amplify Studio tokens.",
        );
        Ok(())
    }
}

fn manual_failure_message(err: &ManualEntryError, browser_pending: bool) -> String {
    let message = match err {
        ManualEntryError::Input(_) => format!("Token input closed: {err}"),
        _ => format!("Provided token was invalid: {err}"),
    };
    if browser_pending {
        format!("{message}. Still waiting for the browser.")
    } else {
        message
    }
}

fn deadline(timeout: Option<Duration>) -> impl Future<Output = ()> {
    async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    }
}
