//! Real-time channel to the chat backend
//!
//! The reconciler only sees the [`Transport`] trait and decoded
//! [`SocketEvent`]s. The Socket.IO adapter in `websocket` is one
//! implementation; tests substitute a recording fake.

pub mod events;
pub mod packet;
pub mod websocket;

pub use events::{
    ClientEvent, ForwardTarget, GroupChange, OutgoingFile, OutgoingText, RoomPreview, Scope,
    ServerEvent,
};
pub use websocket::{SocketOptions, SocketTransport};

use crate::error::ChatError;

/// Connection state as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// What the transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// Connected (first time or after a reconnect).
    Connected { reconnect_attempts: u32 },
    Disconnected { reason: String },
    /// Reconnection attempts exhausted; no further events follow.
    GaveUp,
    Event(ServerEvent),
}

/// Outbound capability injected into the reconciler.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queue an event for sending. Fails fast when disconnected.
    fn emit(&self, event: ClientEvent) -> Result<(), ChatError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records everything emitted; connectivity is toggled by the test.
    #[derive(Default)]
    pub struct FakeTransport {
        connected: AtomicBool,
        sent: Mutex<Vec<ClientEvent>>,
    }

    impl FakeTransport {
        pub fn connected() -> Self {
            let t = Self::default();
            t.set_connected(true);
            t
        }

        pub fn set_connected(&self, up: bool) {
            self.connected.store(up, Ordering::SeqCst);
        }

        /// Drain recorded events.
        pub fn take(&self) -> Vec<ClientEvent> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }

        pub fn names(&self) -> Vec<&'static str> {
            self.take().iter().map(ClientEvent::name).collect()
        }
    }

    impl Transport for FakeTransport {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn emit(&self, event: ClientEvent) -> Result<(), ChatError> {
            if !self.is_connected() {
                return Err(ChatError::Transport("not connected".into()));
            }
            self.sent.lock().unwrap().push(event);
            Ok(())
        }
    }
}
