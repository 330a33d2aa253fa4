//! Per-connection session state: lifecycle, negotiated parameters and the
//! outstanding request table.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use ofp_wire::{FeaturesReply, Message, OfpMessage, WireError};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::adapter::ConnectionAdapter;
use crate::config::consts;
use crate::device::{DeviceDisconnectedHandler, NodeId};
use crate::handshake::HandshakeError;
use crate::outstanding::{Correlation, OutstandingRequests};
use crate::request::{pending, Reply, RequestContext, RequestContextStack, RequestError};
use crate::stats::{Instrumentation, StatisticsGroup};
use crate::xid::{Xid, XidGenerator};

/// Errors raised by the session layer itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("request: {0}")]
    Request(#[from] RequestError),
    #[error("connection not ready: {0}")]
    NotReady(&'static str),
    #[error("connection closed")]
    Closed,
}

/// Lifecycle of a switch connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConnectionState {
    /// Accepted, version and features not yet agreed.
    Handshaking,
    /// Handshake complete, normal operation.
    Working,
    /// Idle detected; an echo keepalive is in flight.
    Timeouting,
    /// Terminal.
    Rip,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Handshaking => "HANDSHAKING",
            ConnectionState::Working => "WORKING",
            ConnectionState::Timeouting => "TIMEOUTING",
            ConnectionState::Rip => "RIP",
        };
        f.write_str(name)
    }
}

/// One switch connection, primary or auxiliary.
pub struct ConnectionContext {
    adapter: Arc<dyn ConnectionAdapter>,
    state: Mutex<ConnectionState>,
    version: OnceLock<u8>,
    features: OnceLock<FeaturesReply>,
    node_id: OnceLock<NodeId>,
    xids: Arc<XidGenerator>,
    control: RequestContextStack,
    outstanding: Mutex<OutstandingRequests>,
    disconnect_handler: Mutex<Option<Arc<dyn DeviceDisconnectedHandler>>>,
    instrumentation: Arc<Instrumentation>,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("remote", &self.adapter.remote_addr())
            .field("state", &self.connection_state())
            .field("version", &self.version())
            .field("node_id", &self.node_id())
            .finish()
    }
}

impl ConnectionContext {
    pub fn new(
        adapter: Arc<dyn ConnectionAdapter>,
        xid_start: u32,
        instrumentation: Arc<Instrumentation>,
    ) -> Self {
        Self {
            adapter,
            state: Mutex::new(ConnectionState::Handshaking),
            version: OnceLock::new(),
            features: OnceLock::new(),
            node_id: OnceLock::new(),
            xids: Arc::new(XidGenerator::new(xid_start)),
            control: RequestContextStack::new(consts::CONTROL_QUOTA),
            outstanding: Mutex::new(OutstandingRequests::default()),
            disconnect_handler: Mutex::new(None),
            instrumentation,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock().expect("state mutex poisoned")
    }

    /// Enter `Working`, from `Handshaking` or after a successful echo keepalive.
    pub fn change_state_to_working(&self) -> Result<(), SessionError> {
        self.transition(
            &[ConnectionState::Handshaking, ConnectionState::Timeouting],
            ConnectionState::Working,
        )
    }

    /// Enter `Timeouting` when the switch went idle.
    pub fn change_state_to_timeouting(&self) -> Result<(), SessionError> {
        self.transition(&[ConnectionState::Working], ConnectionState::Timeouting)
    }

    fn transition(
        &self,
        allowed: &[ConnectionState],
        to: ConnectionState,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("state mutex poisoned");
        let from = *state;
        if !allowed.contains(&from) {
            return Err(SessionError::InvalidTransition { from, to });
        }
        *state = to;
        drop(state);
        debug!(remote = ?self.remote_addr(), %from, %to, "connection state changed");
        Ok(())
    }

    pub fn adapter(&self) -> &Arc<dyn ConnectionAdapter> {
        &self.adapter
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.adapter.remote_addr()
    }

    /// Negotiated wire version, once the HELLO exchange settled.
    pub fn version(&self) -> Option<u8> {
        self.version.get().copied()
    }

    pub(crate) fn set_version(&self, version: u8) {
        if self.version.set(version).is_err() {
            warn!(version, "negotiated version already set");
        }
    }

    pub fn features(&self) -> Option<FeaturesReply> {
        self.features.get().copied()
    }

    pub(crate) fn set_features(&self, features: FeaturesReply) {
        let node_id = NodeId::from_datapath_id(features.datapath_id);
        if self.features.set(features).is_ok() {
            let _ = self.node_id.set(node_id);
        }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.get()
    }

    /// Auxiliary id reported in the features reply; `0` for the primary.
    pub fn auxiliary_id(&self) -> Option<u8> {
        self.features().map(|f| f.auxiliary_id)
    }

    pub fn xid_generator(&self) -> &Arc<XidGenerator> {
        &self.xids
    }

    pub fn next_xid(&self) -> Xid {
        self.xids.generate()
    }

    /// Quota for the session's own requests (features, echo keepalives).
    pub(crate) fn control_stack(&self) -> &RequestContextStack {
        &self.control
    }

    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }

    pub fn set_disconnect_handler(&self, handler: Arc<dyn DeviceDisconnectedHandler>) {
        *self
            .disconnect_handler
            .lock()
            .expect("handler mutex poisoned") = Some(handler);
    }

    /// Requests awaiting a reply on this connection.
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding.lock().expect("outstanding mutex poisoned").len()
    }

    pub fn is_closed(&self) -> bool {
        self.connection_state() == ConnectionState::Rip
    }

    /// Write a message that expects no reply.
    pub async fn send(&self, message: OfpMessage) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let kind = message.kind();
        match self.adapter.write(message).await {
            Ok(()) => {
                self.instrumentation
                    .messages
                    .spy_message(StatisticsGroup::ToSwitchSubmitSuccess, kind);
                Ok(())
            }
            Err(err) => {
                self.instrumentation
                    .messages
                    .spy_message(StatisticsGroup::ToSwitchSubmitFailure, kind);
                Err(err)
            }
        }
    }

    /// Register `ctx` under the message's xid and write the message.
    ///
    /// Every outcome, including write failures and a closed connection, is
    /// delivered on the context's future; `map` converts the correlated reply.
    pub async fn submit<T, F>(&self, mut ctx: RequestContext<T>, message: OfpMessage, map: F)
    where
        T: Send + 'static,
        F: FnOnce(Reply) -> Result<T, RequestError> + Send + 'static,
    {
        let xid = Xid(message.xid);
        let kind = message.kind();
        ctx.set_xid(xid);
        self.instrumentation
            .messages
            .spy_message(StatisticsGroup::ToSwitchEntered, kind);

        let registered = self
            .outstanding
            .lock()
            .expect("outstanding mutex poisoned")
            .register(xid, pending(ctx, map));
        if let Err((request, err)) = registered {
            debug!(%xid, %err, "request refused");
            request.complete(Err(err));
            return;
        }

        self.instrumentation
            .messages
            .spy_message(StatisticsGroup::ToSwitchReadyForSubmit, kind);
        trace!(%xid, kind = kind.name(), "submitting request");
        match self.adapter.write(message).await {
            Ok(()) => self
                .instrumentation
                .messages
                .spy_message(StatisticsGroup::ToSwitchSubmitSuccess, kind),
            Err(err) => {
                self.instrumentation
                    .messages
                    .spy_message(StatisticsGroup::ToSwitchSubmitFailure, kind);
                warn!(%xid, %err, "request write failed");
                let request = self
                    .outstanding
                    .lock()
                    .expect("outstanding mutex poisoned")
                    .remove(xid);
                if let Some(request) = request {
                    request.complete(Err(RequestError::Write(err.to_string())));
                }
            }
        }
    }

    /// Complete the request waiting for `message`'s xid.
    ///
    /// Returns `false` when no request is waiting; such replies are dropped.
    pub fn correlate(&self, message: OfpMessage) -> bool {
        let correlation = self
            .outstanding
            .lock()
            .expect("outstanding mutex poisoned")
            .correlate(message);
        match correlation {
            Correlation::Ready(request, outcome) => {
                request.complete(outcome);
                true
            }
            Correlation::Accumulating(_) => true,
            Correlation::Miss(message) => {
                self.instrumentation.session.record_correlation_miss();
                debug!(
                    xid = message.xid,
                    kind = message.kind().name(),
                    "no pending request for reply; dropping"
                );
                false
            }
        }
    }

    /// Feed one multipart reply fragment.
    pub fn add_multipart_msg(&self, message: OfpMessage) -> bool {
        debug_assert!(matches!(message.body, Message::MultipartReply(_)));
        self.correlate(message)
    }

    /// Close the connection and fail every outstanding request with
    /// [`RequestError::ConnectionClosed`].
    ///
    /// With `propagate` the registered disconnect handler is told, so the
    /// device layer can drop its context. Closing twice is a no-op.
    pub async fn close_connection(&self, propagate: bool) {
        self.close_with_cause(RequestError::ConnectionClosed, propagate)
            .await;
    }

    pub(crate) async fn close_with_cause(&self, cause: RequestError, propagate: bool) {
        let previous = {
            let mut state = self.state.lock().expect("state mutex poisoned");
            std::mem::replace(&mut *state, ConnectionState::Rip)
        };
        if previous == ConnectionState::Rip {
            return;
        }

        let failed = self
            .outstanding
            .lock()
            .expect("outstanding mutex poisoned")
            .fail_all(cause.clone());
        let failed_count = failed.len();
        for request in failed {
            request.complete(Err(cause.clone()));
        }

        if self.adapter.is_alive() {
            if let Err(err) = self.adapter.disconnect().await {
                debug!(%err, "transport disconnect failed");
            }
        }
        self.instrumentation.session.record_disconnect();
        info!(
            remote = ?self.remote_addr(),
            node = ?self.node_id().map(NodeId::as_str),
            %previous,
            %cause,
            failed = failed_count,
            "connection closed"
        );

        let handler = self
            .disconnect_handler
            .lock()
            .expect("handler mutex poisoned")
            .take();
        // A connection still handshaking was never exposed to the device layer.
        if propagate && previous != ConnectionState::Handshaking {
            if let Some(handler) = handler {
                handler.on_device_disconnected(self);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use bytes::Bytes;
    use ofp_wire::{version, MultipartReply, MultipartReplyFlags, MultipartType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection() -> (Arc<MemoryAdapter>, ConnectionContext) {
        let adapter = Arc::new(MemoryAdapter::new());
        let connection =
            ConnectionContext::new(adapter.clone(), 1, Arc::new(Instrumentation::new()));
        (adapter, connection)
    }

    fn fragment(xid: u32, byte: u8, more: bool) -> OfpMessage {
        OfpMessage::new(
            version::OF13,
            xid,
            Message::MultipartReply(MultipartReply {
                mp_type: MultipartType::Desc,
                flags: if more {
                    MultipartReplyFlags::REPLY_MORE
                } else {
                    MultipartReplyFlags::empty()
                },
                body: Bytes::from(vec![byte]),
            }),
        )
    }

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
    }

    impl DeviceDisconnectedHandler for CountingHandler {
        fn on_device_disconnected(&self, _connection: &ConnectionContext) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn valid_transitions() {
        let (_, connection) = connection();
        assert_eq!(connection.connection_state(), ConnectionState::Handshaking);
        connection.change_state_to_working().expect("handshaking -> working");
        connection
            .change_state_to_timeouting()
            .expect("working -> timeouting");
        connection.change_state_to_working().expect("timeouting -> working");
    }

    #[test]
    fn timeouting_requires_working() {
        let (_, connection) = connection();
        let err = connection
            .change_state_to_timeouting()
            .expect_err("handshaking -> timeouting");
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                from: ConnectionState::Handshaking,
                to: ConnectionState::Timeouting
            }
        ));
    }

    #[tokio::test]
    async fn rip_is_terminal() {
        let (adapter, connection) = connection();
        connection.change_state_to_working().expect("working");
        connection.close_connection(false).await;
        assert_eq!(connection.connection_state(), ConnectionState::Rip);
        assert!(connection.change_state_to_working().is_err());
        assert!(connection.change_state_to_timeouting().is_err());
        connection.close_connection(false).await;
        assert_eq!(adapter.disconnects(), 1);
    }

    #[tokio::test]
    async fn multipart_reply_completes_after_last_fragment() {
        let (adapter, connection) = connection();
        let stack = RequestContextStack::new(4);
        let mut ctx = stack.create_request_context::<Reply>().expect("context");
        let mut future = ctx.future().expect("future");
        let request = OfpMessage::new(version::OF13, 5, Message::BarrierRequest);
        connection.submit(ctx, request, Ok).await;
        assert_eq!(adapter.written().len(), 1);
        assert_eq!(connection.outstanding_requests(), 1);

        assert!(connection.add_multipart_msg(fragment(5, 1, true)));
        assert!(connection.add_multipart_msg(fragment(5, 2, true)));
        assert!(future.try_result().is_none());
        assert!(connection.add_multipart_msg(fragment(5, 3, false)));

        match future.await {
            Ok(Reply::Multipart(parts)) => {
                let bodies: Vec<u8> = parts.iter().map(|p| p.body[0]).collect();
                assert_eq!(bodies, vec![1, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(connection.outstanding_requests(), 0);
        assert_eq!(stack.available(), 4);
    }

    #[tokio::test]
    async fn close_fails_every_outstanding_request() {
        let (_, connection) = connection();
        connection.change_state_to_working().expect("working");
        let handler = Arc::new(CountingHandler::default());
        connection.set_disconnect_handler(handler.clone());

        let stack = RequestContextStack::new(8);
        let mut futures = Vec::new();
        for xid in 10..15 {
            let mut ctx = stack.create_request_context::<Reply>().expect("context");
            futures.push(ctx.future().expect("future"));
            let message = OfpMessage::new(version::OF13, xid, Message::BarrierRequest);
            connection.submit(ctx, message, Ok).await;
        }
        connection.close_connection(true).await;

        for future in futures {
            assert_eq!(future.await, Err(RequestError::ConnectionClosed));
        }
        assert_eq!(stack.available(), 8);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closing_while_handshaking_does_not_propagate() {
        let (_, connection) = connection();
        let handler = Arc::new(CountingHandler::default());
        connection.set_disconnect_handler(handler.clone());
        connection.close_connection(true).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn submit_after_close_fails_immediately() {
        let (adapter, connection) = connection();
        connection.close_connection(false).await;
        let stack = RequestContextStack::new(1);
        let mut ctx = stack.create_request_context::<Reply>().expect("context");
        let future = ctx.future().expect("future");
        let message = OfpMessage::new(version::OF13, 1, Message::BarrierRequest);
        connection.submit(ctx, message, Ok).await;
        assert_eq!(future.await, Err(RequestError::ConnectionClosed));
        assert!(adapter.written().is_empty());
    }

    #[tokio::test]
    async fn write_failure_surfaces_on_future() {
        let (adapter, connection) = connection();
        adapter.fail_writes(true);
        let stack = RequestContextStack::new(1);
        let mut ctx = stack.create_request_context::<Reply>().expect("context");
        let future = ctx.future().expect("future");
        let message = OfpMessage::new(version::OF13, 3, Message::BarrierRequest);
        connection.submit(ctx, message, Ok).await;
        assert!(matches!(future.await, Err(RequestError::Write(_))));
        assert_eq!(connection.outstanding_requests(), 0);
    }

    #[tokio::test]
    async fn uncorrelated_reply_is_dropped() {
        let (_, connection) = connection();
        let stack = RequestContextStack::new(1);
        let mut ctx = stack.create_request_context::<Reply>().expect("context");
        let mut future = ctx.future().expect("future");
        let message = OfpMessage::new(version::OF13, 7, Message::BarrierRequest);
        connection.submit(ctx, message, Ok).await;

        let reply = OfpMessage::new(version::OF13, 99, Message::BarrierReply);
        assert!(!connection.correlate(reply));
        assert!(future.try_result().is_none());
        assert_eq!(connection.outstanding_requests(), 1);

        let reply = OfpMessage::new(version::OF13, 7, Message::BarrierReply);
        assert!(connection.correlate(reply));
        assert!(matches!(future.await, Ok(Reply::Single(_))));
        assert_eq!(
            connection
                .instrumentation()
                .session
                .snapshot()
                .correlation_misses,
            1
        );
    }
}
