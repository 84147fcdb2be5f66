use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Connection lifecycle of a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Searching,
    Connected,
    Syncing,
    Disconnected,
}

impl ConnectionState {
    /// Whether a device link is up
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Syncing)
    }

    /// Whether `connect()` may start a new cycle
    pub fn can_connect(self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Searching => "searching",
            ConnectionState::Connected => "connected",
            ConnectionState::Syncing => "syncing",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Stream of state changes starting with the current state
pub fn state_stream(rx: watch::Receiver<ConnectionState>) -> impl Stream<Item = ConnectionState> {
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if first {
            let current = *rx.borrow_and_update();
            return Some((current, (rx, false)));
        }
        match rx.changed().await {
            Ok(()) => {
                let current = *rx.borrow_and_update();
                Some((current, (rx, false)))
            }
            Err(_) => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_replays_current_state() {
        let (tx, rx) = watch::channel(ConnectionState::Connected);
        let mut states = Box::pin(state_stream(rx));

        assert_eq!(states.next().await, Some(ConnectionState::Connected));

        tx.send_replace(ConnectionState::Syncing);
        assert_eq!(states.next().await, Some(ConnectionState::Syncing));

        drop(tx);
        assert_eq!(states.next().await, None);
    }

    #[test]
    fn test_can_connect() {
        assert!(ConnectionState::Idle.can_connect());
        assert!(ConnectionState::Disconnected.can_connect());
        assert!(!ConnectionState::Syncing.can_connect());
        assert!(ConnectionState::Syncing.is_connected());
    }
}
