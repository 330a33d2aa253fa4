//! Drives one connection: handshake, echo supervision and routing of
//! inbound messages to the session layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ofp_wire::{
    version, ErrorMsg, Experimenter, FeaturesReply, Hello, Message, MultipartReply,
    MultipartType, OfpMessage, PortStatus,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::connection::{ConnectionContext, ConnectionState, SessionError};
use crate::device::{DeviceAdmission, DeviceConnectedHandler, DeviceContext, DeviceEvent};
use crate::handshake::{HandshakeError, HandshakeManager};
use crate::listener::{Header, OpenflowProtocolListener, SystemListener};
use crate::request::{Reply, RequestError};
use crate::stats::{EventTimer, EVENT_ECHO_ROUND_TRIP, EVENT_HANDSHAKE};

/// Listener bound to one connection.
///
/// Long-running work (waiting for the features reply, echo keepalives, initial
/// device queries) runs on spawned tasks so the reader is never blocked.
pub struct ConnectionConductor {
    connection: Arc<ConnectionContext>,
    handshake: HandshakeManager,
    config: SessionConfig,
    handler: Arc<dyn DeviceConnectedHandler>,
    events: Option<broadcast::Sender<DeviceEvent>>,
    handshake_timer: EventTimer,
}

impl ConnectionConductor {
    pub fn new(
        connection: Arc<ConnectionContext>,
        config: SessionConfig,
        handler: Arc<dyn DeviceConnectedHandler>,
    ) -> Self {
        let hello_xid = connection.next_xid().0;
        let handshake = HandshakeManager::new(
            config.supported_versions.clone(),
            config.use_version_bitmap,
            hello_xid,
        );
        let handshake_timer = connection.instrumentation().events.start();
        Self {
            connection,
            handshake,
            config,
            handler,
            events: None,
            handshake_timer,
        }
    }

    /// Publish asynchronous switch notifications on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<DeviceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn connection(&self) -> &Arc<ConnectionContext> {
        &self.connection
    }

    pub fn handshake(&self) -> &HandshakeManager {
        &self.handshake
    }

    fn publish(&self, event: DeviceEvent) {
        if let Some(events) = &self.events {
            // No subscribers is not an error.
            let _ = events.send(event);
        }
    }

    async fn request_features(&self, version: u8) {
        let connection = Arc::clone(&self.connection);
        connection.set_version(version);
        let Some(mut ctx) = connection
            .control_stack()
            .create_request_context::<FeaturesReply>()
        else {
            abort_handshake(
                &connection,
                &HandshakeError::Features(RequestError::QuotaExceeded),
            )
            .await;
            return;
        };
        let Some(future) = ctx.future() else {
            return;
        };
        let xid = connection.next_xid();
        let request = OfpMessage::new(version, xid.0, Message::FeaturesRequest);
        connection
            .submit(ctx, request, |reply| match reply {
                Reply::Single(OfpMessage {
                    body: Message::FeaturesReply(features),
                    ..
                }) => Ok(features),
                _ => Err(RequestError::UnexpectedReply("expected features reply")),
            })
            .await;

        let handler = Arc::clone(&self.handler);
        let timer = self.handshake_timer;
        tokio::spawn(async move {
            match future.await {
                Ok(features) => complete_handshake(connection, features, handler, timer).await,
                Err(err) => abort_handshake(&connection, &HandshakeError::Features(err)).await,
            }
        });
    }
}

async fn abort_handshake(connection: &ConnectionContext, err: &HandshakeError) {
    if connection.is_closed() {
        return;
    }
    warn!(remote = ?connection.remote_addr(), %err, "handshake failed");
    connection
        .instrumentation()
        .session
        .record_handshake_failure();
    connection.close_connection(false).await;
}

async fn complete_handshake(
    connection: Arc<ConnectionContext>,
    features: FeaturesReply,
    handler: Arc<dyn DeviceConnectedHandler>,
    timer: EventTimer,
) {
    connection.set_features(features);
    if let Err(err) = connection.change_state_to_working() {
        debug!(%err, "features reply arrived after the handshake ended");
        return;
    }
    let instrumentation = connection.instrumentation();
    instrumentation.session.record_handshake_completed();
    instrumentation.events.finish(EVENT_HANDSHAKE, timer);
    info!(
        remote = ?connection.remote_addr(),
        datapath_id = features.datapath_id,
        auxiliary_id = features.auxiliary_id,
        n_tables = features.n_tables,
        "handshake complete"
    );

    match handler.on_device_connected(Arc::clone(&connection)) {
        DeviceAdmission::Primary(device) => {
            tokio::spawn(query_device_description(device));
        }
        DeviceAdmission::Auxiliary(device) => {
            debug!(node = %device.device_info().node_id(), "auxiliary connection admitted");
        }
        DeviceAdmission::Rejected(reason) => {
            warn!(remote = ?connection.remote_addr(), reason, "connection rejected");
            connection.close_connection(false).await;
        }
    }
}

/// Static description queries sent once a primary is admitted, in order.
pub fn device_description_queries(of_version: u8) -> Vec<MultipartType> {
    let mut queries = vec![MultipartType::Desc];
    if of_version >= version::OF13 {
        queries.extend([
            MultipartType::MeterFeatures,
            MultipartType::GroupFeatures,
            MultipartType::TableFeatures,
            MultipartType::PortDesc,
        ]);
    }
    queries
}

async fn query_device_description(device: Arc<DeviceContext>) {
    let node = device.device_info().node_id().clone();
    for mp_type in device_description_queries(device.device_info().version()) {
        let result = match device.multipart_request(mp_type, Bytes::new()).await {
            Ok(future) => future.await,
            Err(err) => Err(err),
        };
        match result {
            Ok(fragments) => {
                let bytes: usize = fragments.iter().map(|f| f.body.len()).sum();
                debug!(%node, ?mp_type, fragments = fragments.len(), bytes, "device query answered");
            }
            Err(err) => warn!(%node, ?mp_type, %err, "device query failed"),
        }
    }
}

async fn echo_keepalive(connection: Arc<ConnectionContext>, timeout: Duration) {
    let Some(version) = connection.version() else {
        return;
    };
    let Some(mut ctx) = connection.control_stack().create_request_context::<()>() else {
        warn!("no control slot for echo keepalive; disconnecting");
        connection
            .close_with_cause(RequestError::EchoTimeout, true)
            .await;
        return;
    };
    let Some(future) = ctx.future() else {
        return;
    };
    let xid = connection.next_xid();
    let timer = connection.instrumentation().events.start();
    let request = OfpMessage::new(version, xid.0, Message::EchoRequest(Bytes::new()));
    connection
        .submit(ctx, request, |reply| match reply {
            Reply::Single(OfpMessage {
                body: Message::EchoReply(_),
                ..
            }) => Ok(()),
            _ => Err(RequestError::UnexpectedReply("expected echo reply")),
        })
        .await;

    match tokio::time::timeout(timeout, future).await {
        Ok(Ok(())) => {
            connection
                .instrumentation()
                .events
                .finish(EVENT_ECHO_ROUND_TRIP, timer);
            match connection.change_state_to_working() {
                Ok(()) => debug!(%xid, "echo reply received; switch alive"),
                Err(err) => debug!(%xid, %err, "echo reply after state change"),
            }
        }
        Ok(Err(err)) => {
            if !connection.is_closed() {
                warn!(%xid, %err, "echo keepalive failed; disconnecting");
                connection
                    .close_with_cause(RequestError::EchoTimeout, true)
                    .await;
            }
        }
        Err(_) => {
            warn!(
                remote = ?connection.remote_addr(),
                timeout_ms = timeout.as_millis() as u64,
                "no echo reply; disconnecting"
            );
            connection.instrumentation().session.record_echo_timeout();
            connection
                .close_with_cause(RequestError::EchoTimeout, true)
                .await;
        }
    }
}

#[async_trait]
impl OpenflowProtocolListener for ConnectionConductor {
    async fn on_hello(&self, header: Header, hello: Hello) -> Result<(), SessionError> {
        if self.connection.connection_state() != ConnectionState::Handshaking {
            debug!(xid = %header.xid, "HELLO outside handshake ignored");
            return Ok(());
        }
        let remote = OfpMessage::new(header.version, header.xid.0, Message::Hello(hello));
        match self.handshake.shake(&remote) {
            Ok(Some(version)) => self.request_features(version).await,
            Ok(None) => {}
            Err(err) => abort_handshake(&self.connection, &err).await,
        }
        Ok(())
    }

    async fn on_echo_request(&self, header: Header, data: Bytes) -> Result<(), SessionError> {
        self.connection
            .adapter()
            .echo_reply(header.version, header.xid, data)
            .await
    }

    async fn on_error(&self, header: Header, error: ErrorMsg) -> Result<(), SessionError> {
        let (err_type, code) = (error.err_type, error.code);
        let message = OfpMessage::new(header.version, header.xid.0, Message::Error(error));
        if !self.connection.correlate(message) {
            warn!(
                node = ?self.connection.node_id().map(|n| n.as_str()),
                xid = %header.xid,
                err_type,
                code,
                "uncorrelated error from switch"
            );
        }
        Ok(())
    }

    async fn on_multipart_reply(
        &self,
        header: Header,
        reply: MultipartReply,
    ) -> Result<(), SessionError> {
        self.connection.add_multipart_msg(OfpMessage::new(
            header.version,
            header.xid.0,
            Message::MultipartReply(reply),
        ));
        Ok(())
    }

    async fn on_port_status(&self, _header: Header, status: PortStatus) -> Result<(), SessionError> {
        debug!(port = status.port_no, reason = status.reason, "port status");
        self.publish(DeviceEvent::PortStatus {
            node: self.connection.node_id().cloned(),
            status,
        });
        Ok(())
    }

    async fn on_packet_in(&self, _header: Header, data: Bytes) -> Result<(), SessionError> {
        self.publish(DeviceEvent::PacketIn {
            node: self.connection.node_id().cloned(),
            data,
        });
        Ok(())
    }

    async fn on_flow_removed(&self, _header: Header, data: Bytes) -> Result<(), SessionError> {
        self.publish(DeviceEvent::FlowRemoved {
            node: self.connection.node_id().cloned(),
            data,
        });
        Ok(())
    }

    async fn on_experimenter(
        &self,
        _header: Header,
        message: Experimenter,
    ) -> Result<(), SessionError> {
        self.publish(DeviceEvent::Experimenter {
            node: self.connection.node_id().cloned(),
            message,
        });
        Ok(())
    }

    async fn on_reply(&self, message: OfpMessage) -> Result<(), SessionError> {
        self.connection.correlate(message);
        Ok(())
    }
}

#[async_trait]
impl SystemListener for ConnectionConductor {
    async fn on_connection_ready(&self) {
        self.connection
            .instrumentation()
            .session
            .record_connection_accepted();
        debug!(remote = ?self.connection.remote_addr(), "connection ready; sending HELLO");
        if let Err(err) = self.connection.send(self.handshake.local_hello().clone()).await {
            warn!(%err, "failed to send HELLO");
            self.connection.close_connection(false).await;
            return;
        }
        let connection = Arc::clone(&self.connection);
        let timeout = self.config.handshake_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if connection.connection_state() == ConnectionState::Handshaking {
                abort_handshake(&connection, &HandshakeError::Timeout).await;
            }
        });
    }

    async fn on_switch_idle(&self) {
        let state = self.connection.connection_state();
        match state {
            ConnectionState::Working => {
                if let Err(err) = self.connection.change_state_to_timeouting() {
                    debug!(%err, "idle event raced with a state change");
                    return;
                }
                debug!(remote = ?self.connection.remote_addr(), "switch idle; sending echo keepalive");
                tokio::spawn(echo_keepalive(
                    Arc::clone(&self.connection),
                    self.config.echo_reply_timeout,
                ));
            }
            ConnectionState::Rip => {}
            ConnectionState::Handshaking | ConnectionState::Timeouting => {
                info!(%state, "switch idle outside working state; disconnecting");
                self.connection.close_connection(true).await;
            }
        }
    }

    async fn on_disconnect(&self) {
        self.connection.close_connection(true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::listener::dispatch;
    use crate::stats::Instrumentation;
    use ofp_wire::{MessageType, MultipartReplyFlags};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DPID: u64 = 0x0000_0000_0000_00aa;

    #[derive(Default)]
    struct AcceptAll {
        quota: usize,
        admitted: AtomicUsize,
        devices: Mutex<Vec<Arc<DeviceContext>>>,
    }

    impl DeviceConnectedHandler for AcceptAll {
        fn on_device_connected(
            self: Arc<Self>,
            connection: Arc<ConnectionContext>,
        ) -> DeviceAdmission {
            self.admitted.fetch_add(1, Ordering::SeqCst);
            let instrumentation = Arc::clone(connection.instrumentation());
            match DeviceContext::new(connection, self.quota.max(1), instrumentation) {
                Ok(device) => {
                    let device = Arc::new(device);
                    self.devices.lock().expect("devices").push(Arc::clone(&device));
                    DeviceAdmission::Primary(device)
                }
                Err(_) => DeviceAdmission::Rejected("not ready"),
            }
        }
    }

    struct RejectAll;

    impl DeviceConnectedHandler for RejectAll {
        fn on_device_connected(self: Arc<Self>, _: Arc<ConnectionContext>) -> DeviceAdmission {
            DeviceAdmission::Rejected("duplicate")
        }
    }

    fn conductor_with(
        config: SessionConfig,
        handler: Arc<dyn DeviceConnectedHandler>,
    ) -> (Arc<MemoryAdapter>, Arc<ConnectionConductor>) {
        let adapter = Arc::new(MemoryAdapter::new());
        let connection = Arc::new(ConnectionContext::new(
            adapter.clone(),
            config.xid_start,
            Arc::new(Instrumentation::new()),
        ));
        let conductor = Arc::new(ConnectionConductor::new(connection, config, handler));
        (adapter, conductor)
    }

    async fn next_of(adapter: &MemoryAdapter, kind: MessageType) -> OfpMessage {
        tokio::time::timeout(
            Duration::from_secs(5),
            adapter.next_matching(|m| m.kind() == kind),
        )
        .await
        .expect("message written in time")
    }

    fn features_reply(version: u8, xid: u32, auxiliary_id: u8) -> OfpMessage {
        OfpMessage::new(
            version,
            xid,
            Message::FeaturesReply(FeaturesReply {
                datapath_id: DPID,
                n_buffers: 256,
                n_tables: 254,
                auxiliary_id,
                capabilities: 0x47,
            }),
        )
    }

    async fn wait_for_state(connection: &ConnectionContext, state: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while connection.connection_state() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("state reached in time");
    }

    async fn handshake(adapter: &MemoryAdapter, conductor: &ConnectionConductor) {
        conductor.on_connection_ready().await;
        let hello = next_of(adapter, MessageType::Hello).await;
        assert_eq!(hello.version, version::OF13);
        dispatch(
            conductor,
            OfpMessage::new(version::OF13, 100, Message::Hello(Hello::default())),
        )
        .await
        .expect("hello");
        let request = next_of(adapter, MessageType::FeaturesRequest).await;
        dispatch(conductor, features_reply(version::OF13, request.xid, 0))
            .await
            .expect("features");
        wait_for_state(conductor.connection(), ConnectionState::Working).await;
    }

    #[tokio::test]
    async fn hello_sent_first_then_features_then_working() {
        let handler = Arc::new(AcceptAll {
            quota: 8,
            ..Default::default()
        });
        let (adapter, conductor) = conductor_with(SessionConfig::default(), handler.clone());
        handshake(&adapter, &conductor).await;

        let written = adapter.written();
        assert_eq!(written[0].kind(), MessageType::Hello);
        assert_eq!(written[1].kind(), MessageType::FeaturesRequest);
        assert_eq!(handler.admitted.load(Ordering::SeqCst), 1);
        let connection = conductor.connection();
        assert_eq!(connection.version(), Some(version::OF13));
        assert_eq!(
            connection.node_id().map(|n| n.as_str().to_owned()),
            Some("openflow:170".to_owned())
        );
        let counters = connection.instrumentation().session.snapshot();
        assert_eq!(counters.handshakes_completed, 1);

        // Initial device description query follows registration.
        let desc = next_of(&adapter, MessageType::MultipartRequest).await;
        assert!(matches!(
            desc.body,
            Message::MultipartRequest(ref r) if r.mp_type == MultipartType::Desc
        ));
    }

    #[test]
    fn description_queries_follow_version() {
        assert_eq!(device_description_queries(version::OF10), vec![MultipartType::Desc]);
        assert_eq!(
            device_description_queries(version::OF13),
            vec![
                MultipartType::Desc,
                MultipartType::MeterFeatures,
                MultipartType::GroupFeatures,
                MultipartType::TableFeatures,
                MultipartType::PortDesc,
            ]
        );
    }

    #[tokio::test]
    async fn of13_device_is_described_one_query_at_a_time() {
        let handler = Arc::new(AcceptAll {
            quota: 8,
            ..Default::default()
        });
        let (adapter, conductor) = conductor_with(SessionConfig::default(), handler);
        handshake(&adapter, &conductor).await;

        let mut seen = Vec::new();
        for mp_type in device_description_queries(version::OF13) {
            let request = next_of(&adapter, MessageType::MultipartRequest).await;
            assert!(matches!(
                &request.body,
                Message::MultipartRequest(r) if r.mp_type == mp_type
            ));
            seen.push(mp_type);
            adapter.take_written();
            dispatch(
                &*conductor,
                OfpMessage::new(
                    version::OF13,
                    request.xid,
                    Message::MultipartReply(MultipartReply {
                        mp_type,
                        flags: MultipartReplyFlags::empty(),
                        body: Bytes::new(),
                    }),
                ),
            )
            .await
            .expect("reply");
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(conductor.connection().outstanding_requests(), 0);
    }

    #[tokio::test]
    async fn later_hello_is_ignored() {
        let handler = Arc::new(AcceptAll {
            quota: 8,
            ..Default::default()
        });
        let (adapter, conductor) = conductor_with(SessionConfig::default(), handler);
        handshake(&adapter, &conductor).await;
        let before = adapter
            .written()
            .iter()
            .filter(|m| m.kind() == MessageType::FeaturesRequest)
            .count();
        dispatch(
            &*conductor,
            OfpMessage::new(version::OF10, 7, Message::Hello(Hello::default())),
        )
        .await
        .expect("hello");
        let after = adapter
            .written()
            .iter()
            .filter(|m| m.kind() == MessageType::FeaturesRequest)
            .count();
        assert_eq!(before, after);
        assert_eq!(conductor.connection().version(), Some(version::OF13));
        assert_eq!(
            conductor.connection().connection_state(),
            ConnectionState::Working
        );
    }

    #[tokio::test]
    async fn incompatible_hello_closes_without_notification() {
        let handler = Arc::new(AcceptAll::default());
        let config = SessionConfig::default()
            .with_supported_versions(vec![version::OF13])
            .with_version_bitmap(false);
        let (adapter, conductor) = conductor_with(config, handler.clone());
        conductor.on_connection_ready().await;
        dispatch(
            &*conductor,
            OfpMessage::new(version::OF10, 1, Message::Hello(Hello::default())),
        )
        .await
        .expect("hello");
        assert!(conductor.connection().is_closed());
        assert_eq!(adapter.disconnects(), 1);
        assert_eq!(handler.admitted.load(Ordering::SeqCst), 0);
        assert_eq!(
            conductor
                .connection()
                .instrumentation()
                .session
                .snapshot()
                .handshake_failures,
            1
        );
    }

    #[tokio::test]
    async fn rejected_connection_is_closed() {
        let (adapter, conductor) = conductor_with(SessionConfig::default(), Arc::new(RejectAll));
        conductor.on_connection_ready().await;
        dispatch(
            &*conductor,
            OfpMessage::new(version::OF13, 1, Message::Hello(Hello::default())),
        )
        .await
        .expect("hello");
        let request = next_of(&adapter, MessageType::FeaturesRequest).await;
        dispatch(&*conductor, features_reply(version::OF13, request.xid, 0))
            .await
            .expect("features");
        wait_for_state(conductor.connection(), ConnectionState::Rip).await;
    }

    #[tokio::test]
    async fn echo_request_is_answered_with_same_xid() {
        let (adapter, conductor) =
            conductor_with(SessionConfig::default(), Arc::new(AcceptAll::default()));
        dispatch(
            &*conductor,
            OfpMessage::new(
                version::OF13,
                77,
                Message::EchoRequest(Bytes::from_static(b"abc")),
            ),
        )
        .await
        .expect("echo");
        let reply = next_of(&adapter, MessageType::EchoReply).await;
        assert_eq!(reply.xid, 77);
        assert_eq!(reply.body, Message::EchoReply(Bytes::from_static(b"abc")));
    }

    #[tokio::test]
    async fn answered_echo_keepalive_returns_to_working() {
        let handler = Arc::new(AcceptAll {
            quota: 8,
            ..Default::default()
        });
        let (adapter, conductor) = conductor_with(SessionConfig::default(), handler);
        handshake(&adapter, &conductor).await;

        conductor.on_switch_idle().await;
        assert_eq!(
            conductor.connection().connection_state(),
            ConnectionState::Timeouting
        );
        let echo = next_of(&adapter, MessageType::EchoRequest).await;
        dispatch(
            &*conductor,
            OfpMessage::new(version::OF13, echo.xid, Message::EchoReply(Bytes::new())),
        )
        .await
        .expect("echo reply");
        wait_for_state(conductor.connection(), ConnectionState::Working).await;
    }

    #[tokio::test]
    async fn unanswered_echo_keepalive_closes_and_fails_requests() {
        let handler = Arc::new(AcceptAll {
            quota: 8,
            ..Default::default()
        });
        let config = SessionConfig::default().with_echo_reply_timeout(Duration::from_millis(50));
        let (adapter, conductor) = conductor_with(config, handler.clone());
        handshake(&adapter, &conductor).await;

        let device = handler.devices.lock().expect("devices")[0].clone();
        let pending = device.barrier().await.expect("admitted");

        conductor.on_switch_idle().await;
        wait_for_state(conductor.connection(), ConnectionState::Rip).await;
        assert_eq!(pending.await, Err(RequestError::EchoTimeout));
        let counters = conductor.connection().instrumentation().session.snapshot();
        assert_eq!(counters.echo_timeouts, 1);
    }

    #[tokio::test]
    async fn idle_while_handshaking_disconnects() {
        let (adapter, conductor) =
            conductor_with(SessionConfig::default(), Arc::new(AcceptAll::default()));
        conductor.on_connection_ready().await;
        conductor.on_switch_idle().await;
        assert!(conductor.connection().is_closed());
        assert_eq!(adapter.disconnects(), 1);
    }

    #[tokio::test]
    async fn handshake_timeout_closes_connection() {
        let config = SessionConfig::default().with_handshake_timeout(Duration::from_millis(20));
        let (_, conductor) = conductor_with(config, Arc::new(AcceptAll::default()));
        conductor.on_connection_ready().await;
        wait_for_state(conductor.connection(), ConnectionState::Rip).await;
    }

    #[tokio::test]
    async fn multipart_fragments_reach_device_request() {
        let handler = Arc::new(AcceptAll {
            quota: 8,
            ..Default::default()
        });
        let (adapter, conductor) = conductor_with(SessionConfig::default(), handler.clone());
        handshake(&adapter, &conductor).await;
        adapter.take_written();

        let device = handler.devices.lock().expect("devices")[0].clone();
        let future = device
            .multipart_request(MultipartType::Flow, Bytes::new())
            .await
            .expect("admitted");
        let request = next_of(&adapter, MessageType::MultipartRequest).await;
        for (i, more) in [true, true, false].into_iter().enumerate() {
            dispatch(
                &*conductor,
                OfpMessage::new(
                    version::OF13,
                    request.xid,
                    Message::MultipartReply(MultipartReply {
                        mp_type: MultipartType::Flow,
                        flags: if more {
                            MultipartReplyFlags::REPLY_MORE
                        } else {
                            MultipartReplyFlags::empty()
                        },
                        body: Bytes::from(vec![i as u8]),
                    }),
                ),
            )
            .await
            .expect("fragment");
        }
        let fragments = future.await.expect("reply");
        let bodies: Vec<u8> = fragments.iter().map(|f| f.body[0]).collect();
        assert_eq!(bodies, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn port_status_is_published() {
        let (events, mut rx) = broadcast::channel(8);
        let adapter = Arc::new(MemoryAdapter::new());
        let connection = Arc::new(ConnectionContext::new(
            adapter,
            1,
            Arc::new(Instrumentation::new()),
        ));
        let conductor = ConnectionConductor::new(
            connection,
            SessionConfig::default(),
            Arc::new(AcceptAll::default()),
        )
        .with_events(events);
        let status = PortStatus {
            reason: 2,
            port_no: 3,
            desc: Bytes::new(),
        };
        dispatch(
            &conductor,
            OfpMessage::new(version::OF13, 0, Message::PortStatus(status.clone())),
        )
        .await
        .expect("port status");
        assert_eq!(
            rx.recv().await.expect("event"),
            DeviceEvent::PortStatus { node: None, status }
        );
    }
}
