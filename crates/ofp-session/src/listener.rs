//! Callback surface invoked by the transport for inbound traffic.

use async_trait::async_trait;
use bytes::Bytes;
use ofp_wire::{ErrorMsg, Experimenter, Hello, Message, MultipartReply, OfpMessage, PortStatus};

use crate::connection::SessionError;
use crate::xid::Xid;

/// Header fields of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub xid: Xid,
}

impl Header {
    pub fn of(message: &OfpMessage) -> Self {
        Self {
            version: message.version,
            xid: Xid(message.xid),
        }
    }
}

/// Per-message-kind handlers. Unhandled kinds default to no-ops.
#[async_trait]
pub trait OpenflowProtocolListener: Send + Sync {
    async fn on_hello(&self, _header: Header, _hello: Hello) -> Result<(), SessionError> {
        Ok(())
    }

    async fn on_echo_request(&self, _header: Header, _data: Bytes) -> Result<(), SessionError> {
        Ok(())
    }

    async fn on_error(&self, _header: Header, _error: ErrorMsg) -> Result<(), SessionError> {
        Ok(())
    }

    async fn on_multipart_reply(
        &self,
        _header: Header,
        _reply: MultipartReply,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    async fn on_port_status(&self, _header: Header, _status: PortStatus) -> Result<(), SessionError> {
        Ok(())
    }

    async fn on_packet_in(&self, _header: Header, _data: Bytes) -> Result<(), SessionError> {
        Ok(())
    }

    async fn on_flow_removed(&self, _header: Header, _data: Bytes) -> Result<(), SessionError> {
        Ok(())
    }

    async fn on_experimenter(
        &self,
        _header: Header,
        _message: Experimenter,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    /// Any other message, typically a reply to one of our requests.
    async fn on_reply(&self, _message: OfpMessage) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Connection-level events raised by the transport.
#[async_trait]
pub trait SystemListener: Send + Sync {
    /// The transport is established; nothing has been exchanged yet.
    async fn on_connection_ready(&self);

    /// Nothing was read for the configured idle interval.
    async fn on_switch_idle(&self);

    /// The transport closed or failed.
    async fn on_disconnect(&self);
}

/// Route one inbound message to the matching listener method.
pub async fn dispatch<L>(listener: &L, message: OfpMessage) -> Result<(), SessionError>
where
    L: OpenflowProtocolListener + ?Sized,
{
    let header = Header::of(&message);
    match message.body {
        Message::Hello(hello) => listener.on_hello(header, hello).await,
        Message::EchoRequest(data) => listener.on_echo_request(header, data).await,
        Message::Error(error) => listener.on_error(header, error).await,
        Message::MultipartReply(reply) => listener.on_multipart_reply(header, reply).await,
        Message::PortStatus(status) => listener.on_port_status(header, status).await,
        Message::PacketIn(data) => listener.on_packet_in(header, data).await,
        Message::FlowRemoved(data) => listener.on_flow_removed(header, data).await,
        Message::Experimenter(experimenter) => listener.on_experimenter(header, experimenter).await,
        body => {
            listener
                .on_reply(OfpMessage::new(header.version, header.xid.0, body))
                .await
        }
    }
}
