//! Update progress observers
//!
//! The updater reports through [`UpdateObserver`] and never talks to a
//! presentation layer directly. Observers are invoked synchronously from
//! the updater's own task; [`ChannelObserver`] forwards events to another
//! task when the subscriber must not block the update.

use tokio::sync::mpsc;

/// Receives status, progress and completion notifications
pub trait UpdateObserver: Send + Sync {
    /// A human-readable step description
    fn on_status(&self, message: &str);

    /// Bytes done out of `total`; `total` is 0 when unknown
    fn on_progress(&self, current: u64, total: u64);

    /// The operation ended
    fn on_finished(&self, success: bool, message: &str);
}

/// Discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl UpdateObserver for NullObserver {
    fn on_status(&self, _message: &str) {}
    fn on_progress(&self, _current: u64, _total: u64) {}
    fn on_finished(&self, _success: bool, _message: &str) {}
}

/// Forwards notifications to `tracing`
#[derive(Debug, Clone)]
pub struct TracingObserver {
    app: String,
}

impl TracingObserver {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into() }
    }
}

impl UpdateObserver for TracingObserver {
    fn on_status(&self, message: &str) {
        tracing::info!("[{}] {}", self.app, message);
    }

    fn on_progress(&self, current: u64, total: u64) {
        if total > 0 {
            tracing::trace!("[{}] downloaded {}/{} bytes", self.app, current, total);
        } else {
            tracing::trace!("[{}] downloaded {} bytes", self.app, current);
        }
    }

    fn on_finished(&self, success: bool, message: &str) {
        if success {
            tracing::info!("[{}] {}", self.app, message);
        } else {
            tracing::error!("[{}] {}", self.app, message);
        }
    }
}

/// An observer notification as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Status(String),
    Progress { current: u64, total: u64 },
    Finished { success: bool, message: String },
}

/// Sends notifications over an unbounded channel
///
/// Sending never blocks; events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UpdateEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UpdateObserver for ChannelObserver {
    fn on_status(&self, message: &str) {
        let _ = self.tx.send(UpdateEvent::Status(message.to_string()));
    }

    fn on_progress(&self, current: u64, total: u64) {
        let _ = self.tx.send(UpdateEvent::Progress { current, total });
    }

    fn on_finished(&self, success: bool, message: &str) {
        let _ = self.tx.send(UpdateEvent::Finished {
            success,
            message: message.to_string(),
        });
    }
}
