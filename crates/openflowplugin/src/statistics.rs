//! Statistics queries on a connected device.
//!
//! Every query is a multipart request; the returned fragments carry the
//! raw reply bodies in arrival order.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use ofp_session::{DeviceContext, RequestFuture};
use ofp_wire::{version, MultipartReply, MultipartType};
use tracing::debug;

use crate::ControllerError;

/// Wildcard table id.
pub const TABLE_ALL: u8 = 0xff;
/// Wildcard port for OpenFlow 1.1 and later.
pub const PORT_ANY: u32 = 0xffff_ffff;
/// Wildcard port for OpenFlow 1.0.
pub const PORT_NONE_OF10: u16 = 0xffff;
/// Wildcard queue id.
pub const QUEUE_ALL: u32 = 0xffff_ffff;
pub const GROUP_ALL: u32 = 0xffff_fffc;
pub const GROUP_ANY: u32 = 0xffff_ffff;
pub const METER_ALL: u32 = 0xffff_ffff;

const OF10_WILDCARD_ALL: u32 = 0x003f_ffff;
const OF10_MATCH_LEN: usize = 40;

/// Issues statistics requests to one device.
#[derive(Debug, Clone)]
pub struct StatisticsService {
    device: Arc<DeviceContext>,
}

impl StatisticsService {
    pub fn new(device: Arc<DeviceContext>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    fn version(&self) -> u8 {
        self.device.device_info().version()
    }

    fn require(&self, minimum: u8, what: &'static str) -> Result<(), ControllerError> {
        let negotiated = self.version();
        if negotiated < minimum {
            return Err(ControllerError::Unsupported {
                version: version::name(negotiated),
                what,
            });
        }
        Ok(())
    }

    /// Send a raw multipart request without waiting for the reply.
    pub async fn request(
        &self,
        mp_type: MultipartType,
        body: Bytes,
    ) -> Result<RequestFuture<Vec<MultipartReply>>, ControllerError> {
        debug!(
            node = %self.device.device_info().node_id(),
            ?mp_type,
            bytes = body.len(),
            "statistics request"
        );
        Ok(self.device.multipart_request(mp_type, body).await?)
    }

    async fn query(
        &self,
        mp_type: MultipartType,
        body: Bytes,
    ) -> Result<Vec<MultipartReply>, ControllerError> {
        Ok(self.request(mp_type, body).await?.await?)
    }

    /// Switch manufacturer, hardware and software description.
    pub async fn desc(&self) -> Result<Vec<MultipartReply>, ControllerError> {
        self.query(MultipartType::Desc, Bytes::new()).await
    }

    /// Individual flow statistics of `table_id` ([`TABLE_ALL`] for every table).
    pub async fn flow_stats(&self, table_id: u8) -> Result<Vec<MultipartReply>, ControllerError> {
        self.query(MultipartType::Flow, flow_request_body(self.version(), table_id))
            .await
    }

    pub async fn aggregate_flow_stats(
        &self,
        table_id: u8,
    ) -> Result<Vec<MultipartReply>, ControllerError> {
        self.query(
            MultipartType::Aggregate,
            flow_request_body(self.version(), table_id),
        )
        .await
    }

    pub async fn table_stats(&self) -> Result<Vec<MultipartReply>, ControllerError> {
        self.query(MultipartType::Table, Bytes::new()).await
    }

    /// Port counters of `port_no` ([`PORT_ANY`] for every port).
    pub async fn port_stats(&self, port_no: u32) -> Result<Vec<MultipartReply>, ControllerError> {
        self.query(
            MultipartType::PortStats,
            port_request_body(self.version(), port_no),
        )
        .await
    }

    pub async fn queue_stats(
        &self,
        port_no: u32,
        queue_id: u32,
    ) -> Result<Vec<MultipartReply>, ControllerError> {
        self.query(
            MultipartType::Queue,
            queue_request_body(self.version(), port_no, queue_id),
        )
        .await
    }

    pub async fn group_stats(&self, group_id: u32) -> Result<Vec<MultipartReply>, ControllerError> {
        self.require(version::OF11, "group statistics")?;
        self.query(MultipartType::Group, id_request_body(group_id))
            .await
    }

    pub async fn group_desc(&self) -> Result<Vec<MultipartReply>, ControllerError> {
        self.require(version::OF11, "group description")?;
        self.query(MultipartType::GroupDesc, Bytes::new()).await
    }

    pub async fn meter_stats(&self, meter_id: u32) -> Result<Vec<MultipartReply>, ControllerError> {
        self.require(version::OF13, "meter statistics")?;
        self.query(MultipartType::Meter, id_request_body(meter_id))
            .await
    }

    pub async fn meter_config(&self, meter_id: u32) -> Result<Vec<MultipartReply>, ControllerError> {
        self.require(version::OF13, "meter configuration")?;
        self.query(MultipartType::MeterConfig, id_request_body(meter_id))
            .await
    }

    pub async fn port_desc(&self) -> Result<Vec<MultipartReply>, ControllerError> {
        self.require(version::OF13, "port description")?;
        self.query(MultipartType::PortDesc, Bytes::new()).await
    }

    pub async fn group_features(&self) -> Result<Vec<MultipartReply>, ControllerError> {
        self.require(version::OF12, "group features")?;
        self.query(MultipartType::GroupFeatures, Bytes::new()).await
    }

    pub async fn meter_features(&self) -> Result<Vec<MultipartReply>, ControllerError> {
        self.require(version::OF13, "meter features")?;
        self.query(MultipartType::MeterFeatures, Bytes::new()).await
    }

    /// Table capabilities. An empty body queries without modifying them.
    pub async fn table_features(&self) -> Result<Vec<MultipartReply>, ControllerError> {
        self.require(version::OF13, "table features")?;
        self.query(MultipartType::TableFeatures, Bytes::new()).await
    }

    /// One round of the counters that change while the device runs: flow,
    /// table, port and queue statistics, then group and meter statistics
    /// where the negotiated version has them.
    ///
    /// Stops at the first failed query. Returns the number of reply
    /// fragments received.
    pub async fn gather_dynamic(&self) -> Result<usize, ControllerError> {
        let negotiated = self.version();
        let mut fragments = self.flow_stats(TABLE_ALL).await?.len();
        fragments += self.table_stats().await?.len();
        fragments += self.port_stats(PORT_ANY).await?.len();
        fragments += self.queue_stats(PORT_ANY, QUEUE_ALL).await?.len();
        if negotiated >= version::OF11 {
            fragments += self.group_stats(GROUP_ALL).await?.len();
            fragments += self.group_desc().await?.len();
        }
        if negotiated >= version::OF13 {
            fragments += self.meter_stats(METER_ALL).await?.len();
            fragments += self.meter_config(METER_ALL).await?.len();
        }
        Ok(fragments)
    }
}

/// Flow and aggregate request body matching every flow of `table_id`.
pub fn flow_request_body(of_version: u8, table_id: u8) -> Bytes {
    if of_version == version::OF10 {
        let mut buf = BytesMut::with_capacity(OF10_MATCH_LEN + 4);
        buf.put_u32(OF10_WILDCARD_ALL);
        buf.put_bytes(0, OF10_MATCH_LEN - 4);
        buf.put_u8(table_id);
        buf.put_u8(0);
        buf.put_u16(PORT_NONE_OF10);
        return buf.freeze();
    }
    let mut buf = BytesMut::with_capacity(40);
    buf.put_u8(table_id);
    buf.put_bytes(0, 3);
    buf.put_u32(PORT_ANY);
    buf.put_u32(GROUP_ANY);
    buf.put_bytes(0, 4);
    buf.put_u64(0); // cookie
    buf.put_u64(0); // cookie mask
    // Empty OXM match padded to 8 bytes.
    buf.put_u16(1);
    buf.put_u16(4);
    buf.put_u32(0);
    buf.freeze()
}

pub fn port_request_body(of_version: u8, port_no: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    if of_version == version::OF10 {
        buf.put_u16(of10_port(port_no));
        buf.put_bytes(0, 6);
    } else {
        buf.put_u32(port_no);
        buf.put_bytes(0, 4);
    }
    buf.freeze()
}

pub fn queue_request_body(of_version: u8, port_no: u32, queue_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    if of_version == version::OF10 {
        buf.put_u16(of10_port(port_no));
        buf.put_bytes(0, 2);
    } else {
        buf.put_u32(port_no);
    }
    buf.put_u32(queue_id);
    buf.freeze()
}

/// Group and meter requests: a 32-bit id followed by padding.
fn id_request_body(id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32(id);
    buf.put_bytes(0, 4);
    buf.freeze()
}

/// OpenFlow 1.0 ports are 16 bits wide; reserved values map to the
/// 1.0 reserved range.
fn of10_port(port_no: u32) -> u16 {
    if port_no >= 0xffff_ff00 {
        (port_no & 0xffff) as u16
    } else {
        port_no as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of13_flow_body_wildcards_everything() {
        let body = flow_request_body(version::OF13, TABLE_ALL);
        assert_eq!(body.len(), 40);
        assert_eq!(body[0], 0xff);
        assert_eq!(&body[4..8], &[0xff; 4]);
        assert_eq!(&body[8..12], &[0xff; 4]);
        assert_eq!(&body[32..], &[0, 1, 0, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn of10_flow_body_uses_legacy_match() {
        let body = flow_request_body(version::OF10, 3);
        assert_eq!(body.len(), 44);
        assert_eq!(&body[..4], &[0x00, 0x3f, 0xff, 0xff]);
        assert_eq!(body[40], 3);
        assert_eq!(&body[42..], &[0xff, 0xff]);
    }

    #[test]
    fn port_body_width_follows_version() {
        assert_eq!(
            port_request_body(version::OF13, 7).as_ref(),
            &[0, 0, 0, 7, 0, 0, 0, 0]
        );
        assert_eq!(
            port_request_body(version::OF10, PORT_ANY).as_ref(),
            &[0xff, 0xff, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn queue_body_carries_queue_id() {
        assert_eq!(
            queue_request_body(version::OF13, 2, 9).as_ref(),
            &[0, 0, 0, 2, 0, 0, 0, 9]
        );
        assert_eq!(
            queue_request_body(version::OF10, 2, 9).as_ref(),
            &[0, 2, 0, 0, 0, 0, 0, 9]
        );
    }
}
