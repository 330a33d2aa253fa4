//! OpenFlow session layer: per-connection handshake and state machine,
//! xid correlation, per-device request quotas and echo supervision.

pub mod adapter;
pub mod conductor;
pub mod config;
pub mod connection;
pub mod device;
pub mod handshake;
pub mod listener;
pub mod multipart;
mod outstanding;
pub mod request;
pub mod stats;
pub mod tcp;
pub mod xid;

pub use adapter::{ConnectionAdapter, MemoryAdapter};
pub use conductor::ConnectionConductor;
pub use config::{ConfigError, SessionConfig};
pub use connection::{ConnectionContext, ConnectionState, SessionError};
pub use device::{
    DeviceAdmission, DeviceConnectedHandler, DeviceContext, DeviceDisconnectedHandler,
    DeviceEvent, DeviceInfo, DeviceState, NodeId,
};
pub use handshake::{negotiate_hello, negotiate_version, HandshakeError, HandshakeManager};
pub use listener::{dispatch, Header, OpenflowProtocolListener, SystemListener};
pub use request::{Reply, RequestContext, RequestContextStack, RequestError, RequestFuture};
pub use stats::{Instrumentation, InstrumentationSnapshot, StatisticsGroup};
pub use tcp::{run_reader, SwitchConnectionProvider, TcpConnectionAdapter, TcpReader};
pub use xid::{Xid, XidGenerator};
