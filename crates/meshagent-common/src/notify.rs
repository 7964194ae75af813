//! Operational notifications
//!
//! Prunes, successful applies and failures are reported as human-readable
//! messages through a [`Notifier`]. Delivery is best-effort: a failed
//! notification is logged and returned, but it never replaces the error
//! being reported.

#[cfg(any(test, feature = "test-utils"))]
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

#[cfg(any(test, feature = "test-utils"))]
use crate::Error;
use crate::Result;

/// Sink for human-readable operational messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Writes every message to the tracing log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!(notification = %message, "notification");
        Ok(())
    }
}

/// Drops every message.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Keeps every message in memory, optionally failing each delivery.
///
/// Used by tests across the workspace to assert on what was reported.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingNotifier {
    /// A notifier that records and succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records and then fails every delivery
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Messages delivered so far
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
        if self.fail {
            return Err(Error::notification("sink unavailable"));
        }
        Ok(())
    }
}
