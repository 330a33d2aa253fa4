//! Transport seam between the session layer and a switch connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use ofp_wire::{Message, OfpMessage};
use tokio::sync::Notify;

use crate::connection::SessionError;
use crate::xid::Xid;

/// Outbound side of a switch connection.
///
/// Implementations must allow concurrent callers; each call writes one
/// complete message.
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    /// Encode and send one message.
    async fn write(&self, message: OfpMessage) -> Result<(), SessionError>;

    /// Close the transport. Subsequent writes fail.
    async fn disconnect(&self) -> Result<(), SessionError>;

    fn is_alive(&self) -> bool;

    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Answer an echo request, reusing its xid and payload.
    async fn echo_reply(&self, version: u8, xid: Xid, data: Bytes) -> Result<(), SessionError> {
        self.write(OfpMessage::new(version, xid.0, Message::EchoReply(data)))
            .await
    }
}

/// In-memory adapter that records every written message.
///
/// Useful for driving a session without a socket, e.g. when simulating a
/// switch or embedding the session layer behind another transport.
#[derive(Debug)]
pub struct MemoryAdapter {
    written: Mutex<Vec<OfpMessage>>,
    written_changed: Notify,
    alive: AtomicBool,
    fail_writes: AtomicBool,
    disconnects: AtomicU64,
    remote: Option<SocketAddr>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            written_changed: Notify::new(),
            alive: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            disconnects: AtomicU64::new(0),
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Messages written so far.
    pub fn written(&self) -> Vec<OfpMessage> {
        self.written.lock().expect("adapter mutex poisoned").clone()
    }

    /// Messages written so far, clearing the record.
    pub fn take_written(&self) -> Vec<OfpMessage> {
        std::mem::take(&mut *self.written.lock().expect("adapter mutex poisoned"))
    }

    /// Wait until a recorded message satisfies `predicate`.
    pub async fn next_matching<P>(&self, predicate: P) -> OfpMessage
    where
        P: Fn(&OfpMessage) -> bool,
    {
        loop {
            let changed = self.written_changed.notified();
            let found = self
                .written
                .lock()
                .expect("adapter mutex poisoned")
                .iter()
                .find(|message| predicate(message))
                .cloned();
            if let Some(message) = found {
                return message;
            }
            changed.await;
        }
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of `disconnect` calls observed.
    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionAdapter for MemoryAdapter {
    async fn write(&self, message: OfpMessage) -> Result<(), SessionError> {
        if !self.alive.load(Ordering::Relaxed) {
            return Err(SessionError::Closed);
        }
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        self.written
            .lock()
            .expect("adapter mutex poisoned")
            .push(message);
        self.written_changed.notify_waiters();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.alive.store(false, Ordering::Relaxed);
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }
}
