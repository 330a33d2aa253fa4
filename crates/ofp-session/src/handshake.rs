//! HELLO exchange and version negotiation.

use std::sync::OnceLock;

use ofp_wire::{version, Hello, Message, OfpMessage, VersionBitmap};
use thiserror::Error;
use tracing::{debug, info};

use crate::request::RequestError;

/// Reasons a handshake is abandoned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("no common protocol version (local {local:#04x}, remote {remote:#04x})")]
    NoCompatibleVersion { local: u8, remote: u8 },
    #[error("negotiated version {0:#04x} is not supported")]
    UnsupportedVersion(u8),
    #[error("handshake timed out")]
    Timeout,
    #[error("features request failed: {0}")]
    Features(RequestError),
}

/// Agree on a wire version from the HELLO header versions and the optional
/// version bitmaps of both sides.
///
/// * equal header versions win outright;
/// * with two bitmaps the highest common bit wins;
/// * with one bitmap the other side's header version wins if the bitmap
///   contains it;
/// * anything else fails.
pub fn negotiate_version(
    local_version: u8,
    local_bitmap: Option<&VersionBitmap>,
    remote_version: u8,
    remote_bitmap: Option<&VersionBitmap>,
) -> Result<u8, HandshakeError> {
    let failure = HandshakeError::NoCompatibleVersion {
        local: local_version,
        remote: remote_version,
    };
    if local_version == remote_version {
        return Ok(local_version);
    }
    match (local_bitmap, remote_bitmap) {
        (Some(local), Some(remote)) => local.highest_common(remote).ok_or(failure),
        (Some(local), None) if local.contains(remote_version) => Ok(remote_version),
        (None, Some(remote)) if remote.contains(local_version) => Ok(local_version),
        _ => Err(failure),
    }
}

/// [`negotiate_version`] applied to two HELLO messages.
pub fn negotiate_hello(local: &OfpMessage, remote: &OfpMessage) -> Result<u8, HandshakeError> {
    negotiate_version(
        local.version,
        hello_bitmap(local),
        remote.version,
        hello_bitmap(remote),
    )
}

fn hello_bitmap(message: &OfpMessage) -> Option<&VersionBitmap> {
    match &message.body {
        Message::Hello(hello) => hello.bitmap(),
        _ => None,
    }
}

/// Drives the HELLO half of the handshake for one connection.
#[derive(Debug)]
pub struct HandshakeManager {
    supported: Vec<u8>,
    local_hello: OfpMessage,
    negotiated: OnceLock<u8>,
}

impl HandshakeManager {
    /// Prepare our HELLO: header version is the highest supported one, the
    /// bitmap (if enabled) lists every supported version.
    pub fn new(supported: Vec<u8>, use_bitmap: bool, hello_xid: u32) -> Self {
        let highest = supported.iter().copied().max().unwrap_or(version::OF13);
        let hello = if use_bitmap {
            Hello::with_versions(&supported)
        } else {
            Hello::default()
        };
        Self {
            supported,
            local_hello: OfpMessage::new(highest, hello_xid, Message::Hello(hello)),
            negotiated: OnceLock::new(),
        }
    }

    /// HELLO to send as the first message of the connection.
    pub fn local_hello(&self) -> &OfpMessage {
        &self.local_hello
    }

    pub fn version(&self) -> Option<u8> {
        self.negotiated.get().copied()
    }

    /// Process the switch HELLO.
    ///
    /// Returns the newly agreed version, or `None` if a version was already
    /// agreed and this HELLO is ignored.
    pub fn shake(&self, remote: &OfpMessage) -> Result<Option<u8>, HandshakeError> {
        if let Some(agreed) = self.version() {
            debug!(version = agreed, "handshake already settled; ignoring HELLO");
            return Ok(None);
        }
        let agreed = negotiate_hello(&self.local_hello, remote)?;
        if !self.supported.contains(&agreed) {
            return Err(HandshakeError::UnsupportedVersion(agreed));
        }
        if self.negotiated.set(agreed).is_err() {
            return Ok(None);
        }
        info!(
            version = %version::name(agreed),
            remote_header = remote.version,
            "protocol version negotiated"
        );
        Ok(Some(agreed))
    }
}
