//! Device-level context spanning the primary and auxiliary connections of
//! one switch.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use ofp_wire::{
    Experimenter, FeaturesReply, Message, MultipartReply, MultipartRequest,
    MultipartRequestFlags, MultipartType, OfpMessage, PortStatus,
};
use tracing::{info, trace};

use crate::connection::{ConnectionContext, ConnectionState, SessionError};
use crate::request::{Reply, RequestContext, RequestContextStack, RequestError, RequestFuture};
use crate::stats::{Instrumentation, StatisticsGroup};
use crate::xid::{Xid, XidGenerator};

/// Inventory identifier of a switch: `openflow:<datapath id in decimal>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NodeId(String);

impl NodeId {
    pub fn from_datapath_id(datapath_id: u64) -> Self {
        NodeId(format!("openflow:{datapath_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of offering a handshaken connection to the device layer.
#[derive(Debug)]
pub enum DeviceAdmission {
    /// A new device was created around this primary connection.
    Primary(Arc<DeviceContext>),
    /// The connection was attached to an existing device.
    Auxiliary(Arc<DeviceContext>),
    /// The connection must be closed without further notification.
    Rejected(&'static str),
}

/// Receives connections whose handshake completed.
pub trait DeviceConnectedHandler: Send + Sync {
    fn on_device_connected(self: Arc<Self>, connection: Arc<ConnectionContext>) -> DeviceAdmission;
}

/// Told when an admitted connection reaches `RIP`.
pub trait DeviceDisconnectedHandler: Send + Sync {
    fn on_device_disconnected(&self, connection: &ConnectionContext);
}

/// Asynchronous notification from a switch, or a device lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(NodeId),
    Disconnected(NodeId),
    PortStatus { node: Option<NodeId>, status: PortStatus },
    PacketIn { node: Option<NodeId>, data: Bytes },
    FlowRemoved { node: Option<NodeId>, data: Bytes },
    Experimenter { node: Option<NodeId>, message: Experimenter },
}

/// Static facts about a connected device plus its xid source.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    node_id: NodeId,
    datapath_id: u64,
    version: u8,
    remote: Option<SocketAddr>,
    xids: Arc<XidGenerator>,
}

impl DeviceInfo {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn datapath_id(&self) -> u64 {
        self.datapath_id
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Reserve a fresh xid for a message to this device.
    pub fn reserve_xid_for_device_message(&self) -> Xid {
        self.xids.generate()
    }
}

/// Features and timestamps captured when the device came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub features: FeaturesReply,
    pub connected_at: SystemTime,
}

/// Everything the session layer knows about one switch.
#[derive(Debug)]
pub struct DeviceContext {
    info: DeviceInfo,
    state: DeviceState,
    primary: Arc<ConnectionContext>,
    auxiliary: DashMap<u8, Arc<ConnectionContext>>,
    requests: RequestContextStack,
    instrumentation: Arc<Instrumentation>,
}

impl DeviceContext {
    /// Build the device around a primary connection that finished its handshake.
    pub fn new(
        primary: Arc<ConnectionContext>,
        request_quota: usize,
        instrumentation: Arc<Instrumentation>,
    ) -> Result<Self, SessionError> {
        let version = primary
            .version()
            .ok_or(SessionError::NotReady("version not negotiated"))?;
        let features = primary
            .features()
            .ok_or(SessionError::NotReady("features not received"))?;
        let info = DeviceInfo {
            node_id: NodeId::from_datapath_id(features.datapath_id),
            datapath_id: features.datapath_id,
            version,
            remote: primary.remote_addr(),
            xids: Arc::clone(primary.xid_generator()),
        };
        Ok(Self {
            info,
            state: DeviceState {
                features,
                connected_at: SystemTime::now(),
            },
            primary,
            auxiliary: DashMap::new(),
            requests: RequestContextStack::new(request_quota),
            instrumentation,
        })
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn device_state(&self) -> &DeviceState {
        &self.state
    }

    pub fn primary_connection(&self) -> &Arc<ConnectionContext> {
        &self.primary
    }

    /// Attach an auxiliary connection. Fails if its id is already taken.
    pub fn add_auxiliary_connection(&self, connection: Arc<ConnectionContext>) -> bool {
        let Some(aux_id) = connection.auxiliary_id() else {
            return false;
        };
        if aux_id == 0 {
            return false;
        }
        match self.auxiliary.entry(aux_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(connection);
                info!(node = %self.info.node_id, aux_id, "auxiliary connection attached");
                true
            }
        }
    }

    pub fn remove_auxiliary_connection(&self, aux_id: u8) -> Option<Arc<ConnectionContext>> {
        let removed = self.auxiliary.remove(&aux_id).map(|(_, c)| c);
        if removed.is_some() {
            info!(node = %self.info.node_id, aux_id, "auxiliary connection detached");
        }
        removed
    }

    pub fn auxiliary_connection(&self, aux_id: u8) -> Option<Arc<ConnectionContext>> {
        self.auxiliary.get(&aux_id).map(|c| Arc::clone(c.value()))
    }

    pub fn auxiliary_count(&self) -> usize {
        self.auxiliary.len()
    }

    /// Detach and return every auxiliary connection.
    pub fn take_auxiliary_connections(&self) -> Vec<Arc<ConnectionContext>> {
        let ids: Vec<u8> = self.auxiliary.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.auxiliary.remove(&id).map(|(_, c)| c))
            .collect()
    }

    /// Connection a request should use: the auxiliary selected by `cookie`
    /// if one is attached and alive, the primary otherwise.
    pub fn connection_for(&self, cookie: Option<u8>) -> Arc<ConnectionContext> {
        cookie
            .filter(|&id| id != 0)
            .and_then(|id| self.auxiliary_connection(id))
            .filter(|c| c.connection_state() != ConnectionState::Rip)
            .unwrap_or_else(|| Arc::clone(&self.primary))
    }

    pub fn request_context_stack(&self) -> &RequestContextStack {
        &self.requests
    }

    /// Reserve a request slot, counting the attempt. `None` if the quota is
    /// exhausted.
    pub fn create_request_context<T>(&self) -> Option<RequestContext<T>> {
        let ctx = self.requests.create_request_context();
        if ctx.is_none() {
            self.instrumentation.session.record_quota_rejection();
            self.instrumentation
                .messages
                .spy_named(StatisticsGroup::ToSwitchReservationRejected, "REQUEST");
        }
        ctx
    }

    pub fn reserve_xid_for_device_message(&self) -> Xid {
        self.info.reserve_xid_for_device_message()
    }

    /// The primary connection has not reached `RIP`.
    pub fn is_valid(&self) -> bool {
        self.primary.connection_state() != ConnectionState::Rip
    }

    /// Send a request on the primary connection and return the future of its
    /// mapped reply.
    ///
    /// Fails immediately with [`RequestError::QuotaExceeded`] when the
    /// device has no free request slot.
    pub async fn send_request<T, F>(
        &self,
        body: Message,
        map: F,
    ) -> Result<RequestFuture<T>, RequestError>
    where
        T: Send + 'static,
        F: FnOnce(Reply) -> Result<T, RequestError> + Send + 'static,
    {
        self.send_request_via(None, body, map).await
    }

    /// Like [`DeviceContext::send_request`], on the connection chosen by
    /// [`DeviceContext::connection_for`].
    ///
    /// The reply is correlated on the connection the request went out on;
    /// the quota slot is still taken from the device.
    pub async fn send_request_via<T, F>(
        &self,
        cookie: Option<u8>,
        body: Message,
        map: F,
    ) -> Result<RequestFuture<T>, RequestError>
    where
        T: Send + 'static,
        F: FnOnce(Reply) -> Result<T, RequestError> + Send + 'static,
    {
        let mut ctx = self
            .create_request_context::<T>()
            .ok_or(RequestError::QuotaExceeded)?;
        let xid = self.reserve_xid_for_device_message();
        let future = ctx.future().ok_or(RequestError::Cancelled)?;
        let message = OfpMessage::new(self.info.version, xid.0, body);
        let connection = self.connection_for(cookie);
        trace!(
            node = %self.info.node_id,
            %xid,
            auxiliary_id = connection.auxiliary_id().unwrap_or(0),
            "routing request"
        );
        connection.submit(ctx, message, map).await;
        Ok(future)
    }

    /// Send a multipart request and return the future of every reply fragment.
    pub async fn multipart_request(
        &self,
        mp_type: MultipartType,
        body: Bytes,
    ) -> Result<RequestFuture<Vec<MultipartReply>>, RequestError> {
        self.multipart_request_via(None, mp_type, body).await
    }

    pub async fn multipart_request_via(
        &self,
        cookie: Option<u8>,
        mp_type: MultipartType,
        body: Bytes,
    ) -> Result<RequestFuture<Vec<MultipartReply>>, RequestError> {
        let request = MultipartRequest {
            mp_type,
            flags: MultipartRequestFlags::empty(),
            body,
        };
        self.send_request_via(cookie, Message::MultipartRequest(request), |reply| {
            match reply {
                Reply::Multipart(fragments) => Ok(fragments),
                Reply::Single(_) => {
                    Err(RequestError::UnexpectedReply("expected multipart reply"))
                }
            }
        })
        .await
    }

    /// Send a barrier request and wait for nothing but its completion.
    pub async fn barrier(&self) -> Result<RequestFuture<()>, RequestError> {
        self.send_request(Message::BarrierRequest, |reply| match reply {
            Reply::Single(OfpMessage {
                body: Message::BarrierReply,
                ..
            }) => Ok(()),
            _ => Err(RequestError::UnexpectedReply("expected barrier reply")),
        })
        .await
    }

    /// Close every connection of the device without notifying the device layer.
    pub async fn shutdown(&self) {
        for connection in self.take_auxiliary_connections() {
            connection.close_connection(false).await;
        }
        self.primary.close_connection(false).await;
    }
}
