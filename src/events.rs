// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! User-visible provisioning notifications.
//!
//! The provisioner emits events; the host (editor binding, CLI) subscribes
//! and decides how to render them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// An event with the time it was emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The specific event data.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Types of provisioning events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The provisioner moved between states.
    StateChanged {
        /// Previous state name.
        from: String,
        /// New state name.
        to: String,
    },
    /// A download began.
    DownloadStarted {
        /// Source URL.
        url: String,
    },
    /// Bytes received so far.
    DownloadProgress {
        /// Bytes written.
        received: u64,
        /// Expected size, if the server sent one.
        total: Option<u64>,
    },
    /// The artifact was downloaded and verified.
    DownloadSucceeded {
        /// Installed artifact.
        path: PathBuf,
    },
    /// The download or its verification failed.
    DownloadFailed {
        /// Human-readable cause.
        cause: String,
    },
    /// Superseded artifacts were removed.
    Reaped {
        /// Number of files deleted.
        removed: usize,
    },
    /// Legacy storage was migrated or discarded.
    Migrated {
        /// Legacy directory.
        from: PathBuf,
        /// New location, or `None` if the legacy directory was deleted.
        to: Option<PathBuf>,
    },
}

/// Cloneable event sender shared between the provisioner and its fetch task.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<ProvisionEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Creates a notifier with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emits an event. Events with no subscribers are dropped.
    pub fn send(&self, kind: EventKind) {
        let event = ProvisionEvent {
            timestamp: Utc::now(),
            kind,
        };
        let _ = self.sender.send(event);
    }

    /// Subscribes to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProvisionEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_subscriber_receives_events_in_order() -> Result<()> {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.send(EventKind::DownloadStarted {
            url: "https://x/srv.jar".to_string(),
        });
        notifier.send(EventKind::DownloadFailed {
            cause: "boom".to_string(),
        });

        assert_eq!(
            rx.try_recv()?.kind,
            EventKind::DownloadStarted {
                url: "https://x/srv.jar".to_string()
            }
        );
        assert_eq!(
            rx.try_recv()?.kind,
            EventKind::DownloadFailed {
                cause: "boom".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_send_without_subscribers_is_ok() {
        let notifier = Notifier::new();
        notifier.send(EventKind::Reaped { removed: 1 });
    }

    #[test]
    fn test_event_serializes_with_type_tag() -> Result<()> {
        let event = ProvisionEvent {
            timestamp: Utc::now(),
            kind: EventKind::StateChanged {
                from: "checking".to_string(),
                to: "fetching".to_string(),
            },
        };
        let json: serde_json::Value = serde_json::to_value(&event)?;
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["to"], "fetching");
        Ok(())
    }
}
