//! OpenFlow framing: header, message encode/decode (transport-agnostic).

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the OpenFlow header (in bytes).
pub const HEADER_SIZE: usize = 8;
/// Element type of the HELLO version bitmap element (OpenFlow 1.3.1+).
pub const HELLO_ELEMENT_VERSION_BITMAP: u16 = 1;

/// Wire protocol version numbers.
pub mod version {
    pub const OF10: u8 = 0x01;
    pub const OF11: u8 = 0x02;
    pub const OF12: u8 = 0x03;
    pub const OF13: u8 = 0x04;
    pub const OF14: u8 = 0x05;
    pub const OF15: u8 = 0x06;

    /// Human readable name such as `1.3`.
    pub fn name(version: u8) -> String {
        match version {
            OF10 => "1.0".into(),
            OF11 => "1.1".into(),
            OF12 => "1.2".into(),
            OF13 => "1.3".into(),
            OF14 => "1.4".into(),
            OF15 => "1.5".into(),
            other => format!("0x{other:02x}"),
        }
    }
}

bitflags! {
    /// Flags carried by a multipart (statistics) request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MultipartRequestFlags: u16 {
        /// More requests follow.
        const REQ_MORE = 0x0001;
    }
}

bitflags! {
    /// Flags carried by a multipart (statistics) reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MultipartReplyFlags: u16 {
        /// More replies follow for the same xid.
        const REPLY_MORE = 0x0001;
    }
}

/// Errors that can occur when dealing with OpenFlow frames.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
    #[error("length mismatch: header declares {declared} bytes, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Message kinds understood by this crate.
///
/// Raw type codes differ between OpenFlow 1.0 and 1.1+, see [`MessageType::to_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    Error,
    EchoRequest,
    EchoReply,
    Experimenter,
    FeaturesRequest,
    FeaturesReply,
    PacketIn,
    FlowRemoved,
    PortStatus,
    MultipartRequest,
    MultipartReply,
    BarrierRequest,
    BarrierReply,
    /// A type code without a dedicated variant.
    Other(u8),
}

impl MessageType {
    /// Raw type code for the given protocol version.
    pub const fn to_raw(self, version: u8) -> u8 {
        let legacy = version == version::OF10;
        match self {
            MessageType::Hello => 0,
            MessageType::Error => 1,
            MessageType::EchoRequest => 2,
            MessageType::EchoReply => 3,
            MessageType::Experimenter => 4,
            MessageType::FeaturesRequest => 5,
            MessageType::FeaturesReply => 6,
            MessageType::PacketIn => 10,
            MessageType::FlowRemoved => 11,
            MessageType::PortStatus => 12,
            MessageType::MultipartRequest => {
                if legacy {
                    16
                } else {
                    18
                }
            }
            MessageType::MultipartReply => {
                if legacy {
                    17
                } else {
                    19
                }
            }
            MessageType::BarrierRequest => {
                if legacy {
                    18
                } else {
                    20
                }
            }
            MessageType::BarrierReply => {
                if legacy {
                    19
                } else {
                    21
                }
            }
            MessageType::Other(code) => code,
        }
    }

    /// Convert from the raw type field for the given protocol version.
    pub fn from_raw(version: u8, raw: u8) -> Self {
        let legacy = version == version::OF10;
        match (raw, legacy) {
            (0, _) => MessageType::Hello,
            (1, _) => MessageType::Error,
            (2, _) => MessageType::EchoRequest,
            (3, _) => MessageType::EchoReply,
            (4, _) => MessageType::Experimenter,
            (5, _) => MessageType::FeaturesRequest,
            (6, _) => MessageType::FeaturesReply,
            (10, _) => MessageType::PacketIn,
            (11, _) => MessageType::FlowRemoved,
            (12, _) => MessageType::PortStatus,
            (16, true) | (18, false) => MessageType::MultipartRequest,
            (17, true) | (19, false) => MessageType::MultipartReply,
            (18, true) | (20, false) => MessageType::BarrierRequest,
            (19, true) | (21, false) => MessageType::BarrierReply,
            (other, _) => MessageType::Other(other),
        }
    }

    /// Stable name used for logging and counters.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Hello => "HELLO",
            MessageType::Error => "ERROR",
            MessageType::EchoRequest => "ECHO_REQUEST",
            MessageType::EchoReply => "ECHO_REPLY",
            MessageType::Experimenter => "EXPERIMENTER",
            MessageType::FeaturesRequest => "FEATURES_REQUEST",
            MessageType::FeaturesReply => "FEATURES_REPLY",
            MessageType::PacketIn => "PACKET_IN",
            MessageType::FlowRemoved => "FLOW_REMOVED",
            MessageType::PortStatus => "PORT_STATUS",
            MessageType::MultipartRequest => "MULTIPART_REQUEST",
            MessageType::MultipartReply => "MULTIPART_REPLY",
            MessageType::BarrierRequest => "BARRIER_REQUEST",
            MessageType::BarrierReply => "BARRIER_REPLY",
            MessageType::Other(_) => "OTHER",
        }
    }
}

/// Multipart (statistics) body kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultipartType {
    Desc,
    Flow,
    Aggregate,
    Table,
    PortStats,
    Queue,
    Group,
    GroupDesc,
    GroupFeatures,
    Meter,
    MeterConfig,
    MeterFeatures,
    TableFeatures,
    PortDesc,
    Experimenter,
    Unknown(u16),
}

impl MultipartType {
    /// Convert from the raw multipart type field.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => MultipartType::Desc,
            1 => MultipartType::Flow,
            2 => MultipartType::Aggregate,
            3 => MultipartType::Table,
            4 => MultipartType::PortStats,
            5 => MultipartType::Queue,
            6 => MultipartType::Group,
            7 => MultipartType::GroupDesc,
            8 => MultipartType::GroupFeatures,
            9 => MultipartType::Meter,
            10 => MultipartType::MeterConfig,
            11 => MultipartType::MeterFeatures,
            12 => MultipartType::TableFeatures,
            13 => MultipartType::PortDesc,
            0xFFFF => MultipartType::Experimenter,
            other => MultipartType::Unknown(other),
        }
    }

    /// Raw value stored in the multipart header.
    pub const fn to_raw(self) -> u16 {
        match self {
            MultipartType::Desc => 0,
            MultipartType::Flow => 1,
            MultipartType::Aggregate => 2,
            MultipartType::Table => 3,
            MultipartType::PortStats => 4,
            MultipartType::Queue => 5,
            MultipartType::Group => 6,
            MultipartType::GroupDesc => 7,
            MultipartType::GroupFeatures => 8,
            MultipartType::Meter => 9,
            MultipartType::MeterConfig => 10,
            MultipartType::MeterFeatures => 11,
            MultipartType::TableFeatures => 12,
            MultipartType::PortDesc => 13,
            MultipartType::Experimenter => 0xFFFF,
            MultipartType::Unknown(code) => code,
        }
    }
}

/// Set of protocol versions advertised in a HELLO version-bitmap element.
///
/// Bit `n` of word `n / 32` is set when wire version `n` is supported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionBitmap {
    words: Vec<u32>,
}

impl VersionBitmap {
    /// Build a bitmap from raw 32-bit words as found on the wire.
    pub fn from_words(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Build a bitmap advertising the given versions.
    pub fn from_versions(versions: &[u8]) -> Self {
        let highest = versions.iter().copied().max().unwrap_or(0) as usize;
        let mut words = vec![0u32; highest / 32 + 1];
        for &v in versions {
            words[v as usize / 32] |= 1u32 << (v % 32);
        }
        Self { words }
    }

    /// Raw words in wire order.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Whether the bitmap advertises `version`.
    pub fn contains(&self, version: u8) -> bool {
        self.words
            .get(version as usize / 32)
            .is_some_and(|word| *word & (1u32 << (version % 32)) != 0)
    }

    /// Advertised versions in ascending order.
    pub fn versions(&self) -> Vec<u8> {
        (0..=u8::MAX).filter(|&v| self.contains(v)).collect()
    }

    /// Highest version advertised by both bitmaps.
    pub fn highest_common(&self, other: &VersionBitmap) -> Option<u8> {
        (0..=u8::MAX).rev().find(|&v| self.contains(v) && other.contains(v))
    }
}

/// One element of a HELLO message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloElement {
    VersionBitmap(VersionBitmap),
    Unknown { element_type: u16, data: Bytes },
}

/// HELLO message body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hello {
    pub elements: Vec<HelloElement>,
}

impl Hello {
    /// HELLO carrying a version bitmap for the given versions.
    pub fn with_versions(versions: &[u8]) -> Self {
        Self {
            elements: vec![HelloElement::VersionBitmap(VersionBitmap::from_versions(
                versions,
            ))],
        }
    }

    /// The first version bitmap element, if any.
    pub fn bitmap(&self) -> Option<&VersionBitmap> {
        self.elements.iter().find_map(|element| match element {
            HelloElement::VersionBitmap(bitmap) => Some(bitmap),
            HelloElement::Unknown { .. } => None,
        })
    }
}

/// ERROR message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub err_type: u16,
    pub code: u16,
    pub data: Bytes,
}

/// EXPERIMENTER (vendor) message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experimenter {
    pub experimenter: u32,
    /// Always zero for OpenFlow 1.0 vendor messages.
    pub exp_type: u32,
    pub data: Bytes,
}

/// FEATURES_REPLY body (port list of 1.0 replies is not retained).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeaturesReply {
    pub datapath_id: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    /// Auxiliary connection id; always zero before OpenFlow 1.3.
    pub auxiliary_id: u8,
    pub capabilities: u32,
}

/// PORT_STATUS body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: u8,
    pub port_no: u32,
    /// Port description including the port number.
    pub desc: Bytes,
}

/// Multipart (statistics) request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartRequest {
    pub mp_type: MultipartType,
    pub flags: MultipartRequestFlags,
    pub body: Bytes,
}

/// Multipart (statistics) reply fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartReply {
    pub mp_type: MultipartType,
    pub flags: MultipartReplyFlags,
    pub body: Bytes,
}

impl MultipartReply {
    /// Whether more fragments follow for the same xid.
    pub fn has_more(&self) -> bool {
        self.flags.contains(MultipartReplyFlags::REPLY_MORE)
    }
}

/// Decoded message body, one variant per message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Error(ErrorMsg),
    EchoRequest(Bytes),
    EchoReply(Bytes),
    Experimenter(Experimenter),
    FeaturesRequest,
    FeaturesReply(FeaturesReply),
    PacketIn(Bytes),
    FlowRemoved(Bytes),
    PortStatus(PortStatus),
    MultipartRequest(MultipartRequest),
    MultipartReply(MultipartReply),
    BarrierRequest,
    BarrierReply,
    /// Message kinds this crate forwards without interpreting.
    Other { type_code: u8, body: Bytes },
}

impl Message {
    /// Kind of this message.
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Hello(_) => MessageType::Hello,
            Message::Error(_) => MessageType::Error,
            Message::EchoRequest(_) => MessageType::EchoRequest,
            Message::EchoReply(_) => MessageType::EchoReply,
            Message::Experimenter(_) => MessageType::Experimenter,
            Message::FeaturesRequest => MessageType::FeaturesRequest,
            Message::FeaturesReply(_) => MessageType::FeaturesReply,
            Message::PacketIn(_) => MessageType::PacketIn,
            Message::FlowRemoved(_) => MessageType::FlowRemoved,
            Message::PortStatus(_) => MessageType::PortStatus,
            Message::MultipartRequest(_) => MessageType::MultipartRequest,
            Message::MultipartReply(_) => MessageType::MultipartReply,
            Message::BarrierRequest => MessageType::BarrierRequest,
            Message::BarrierReply => MessageType::BarrierReply,
            Message::Other { type_code, .. } => MessageType::Other(*type_code),
        }
    }
}

/// A complete OpenFlow message: header fields plus decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfpMessage {
    pub version: u8,
    pub xid: u32,
    pub body: Message,
}

impl OfpMessage {
    pub fn new(version: u8, xid: u32, body: Message) -> Self {
        Self { version, xid, body }
    }

    /// Kind of the carried body.
    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }
}

/// Return the total frame length declared by the header at the start of `buf`.
///
/// `None` until a full header is available.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    Some(u16::from_be_bytes([buf[2], buf[3]]) as usize)
}

/// Encode a message into the on-the-wire representation.
pub fn encode(msg: &OfpMessage) -> Result<Bytes, WireError> {
    let mut body = BytesMut::new();
    encode_body(msg.version, &msg.body, &mut body);
    let total = HEADER_SIZE + body.len();
    if total > u16::MAX as usize {
        return Err(WireError::FrameTooLarge(total));
    }
    let mut buffer = BytesMut::with_capacity(total);
    buffer.put_u8(msg.version);
    buffer.put_u8(msg.kind().to_raw(msg.version));
    buffer.put_u16(total as u16);
    buffer.put_u32(msg.xid);
    buffer.extend_from_slice(&body);
    Ok(buffer.freeze())
}

fn encode_body(version: u8, body: &Message, buf: &mut BytesMut) {
    let legacy = version == version::OF10;
    match body {
        Message::Hello(hello) => {
            for element in &hello.elements {
                let start = buf.len();
                match element {
                    HelloElement::VersionBitmap(bitmap) => {
                        buf.put_u16(HELLO_ELEMENT_VERSION_BITMAP);
                        buf.put_u16((4 + bitmap.words().len() * 4) as u16);
                        for word in bitmap.words() {
                            buf.put_u32(*word);
                        }
                    }
                    HelloElement::Unknown { element_type, data } => {
                        buf.put_u16(*element_type);
                        buf.put_u16((4 + data.len()) as u16);
                        buf.extend_from_slice(data);
                    }
                }
                let written = buf.len() - start;
                buf.put_bytes(0, padding(written));
            }
        }
        Message::Error(err) => {
            buf.put_u16(err.err_type);
            buf.put_u16(err.code);
            buf.extend_from_slice(&err.data);
        }
        Message::EchoRequest(data) | Message::EchoReply(data) => buf.extend_from_slice(data),
        Message::Experimenter(exp) => {
            buf.put_u32(exp.experimenter);
            if !legacy {
                buf.put_u32(exp.exp_type);
            }
            buf.extend_from_slice(&exp.data);
        }
        Message::FeaturesRequest | Message::BarrierRequest | Message::BarrierReply => {}
        Message::FeaturesReply(features) => {
            buf.put_u64(features.datapath_id);
            buf.put_u32(features.n_buffers);
            buf.put_u8(features.n_tables);
            if legacy {
                buf.put_bytes(0, 3);
                buf.put_u32(features.capabilities);
                buf.put_u32(0); // actions
            } else {
                buf.put_u8(features.auxiliary_id);
                buf.put_u16(0);
                buf.put_u32(features.capabilities);
                buf.put_u32(0); // reserved
            }
        }
        Message::PacketIn(data) | Message::FlowRemoved(data) => buf.extend_from_slice(data),
        Message::PortStatus(status) => {
            buf.put_u8(status.reason);
            buf.put_bytes(0, 7);
            buf.extend_from_slice(&status.desc);
        }
        Message::MultipartRequest(req) => {
            buf.put_u16(req.mp_type.to_raw());
            buf.put_u16(req.flags.bits());
            if !legacy {
                buf.put_u32(0);
            }
            buf.extend_from_slice(&req.body);
        }
        Message::MultipartReply(reply) => {
            buf.put_u16(reply.mp_type.to_raw());
            buf.put_u16(reply.flags.bits());
            if !legacy {
                buf.put_u32(0);
            }
            buf.extend_from_slice(&reply.body);
        }
        Message::Other { body, .. } => buf.extend_from_slice(body),
    }
}

fn padding(len: usize) -> usize {
    (8 - len % 8) % 8
}

/// Decode one complete frame.
///
/// `buf` must hold exactly the number of bytes declared by the header.
pub fn decode(buf: &[u8]) -> Result<OfpMessage, WireError> {
    if buf.len() < HEADER_SIZE {
        return Err(WireError::InvalidPacket("too short"));
    }
    let mut cursor = buf;
    let version = cursor.get_u8();
    let type_code = cursor.get_u8();
    let length = cursor.get_u16() as usize;
    let xid = cursor.get_u32();
    if length != buf.len() {
        return Err(WireError::LengthMismatch {
            declared: length,
            actual: buf.len(),
        });
    }
    let kind = MessageType::from_raw(version, type_code);
    let body = decode_body(version, kind, cursor)?;
    Ok(OfpMessage { version, xid, body })
}

fn decode_body(version: u8, kind: MessageType, mut cursor: &[u8]) -> Result<Message, WireError> {
    let legacy = version == version::OF10;
    let message = match kind {
        MessageType::Hello => Message::Hello(decode_hello(cursor)?),
        MessageType::Error => {
            ensure(cursor, 4, "error body too short")?;
            let err_type = cursor.get_u16();
            let code = cursor.get_u16();
            Message::Error(ErrorMsg {
                err_type,
                code,
                data: Bytes::copy_from_slice(cursor),
            })
        }
        MessageType::EchoRequest => Message::EchoRequest(Bytes::copy_from_slice(cursor)),
        MessageType::EchoReply => Message::EchoReply(Bytes::copy_from_slice(cursor)),
        MessageType::Experimenter => {
            let header = if legacy { 4 } else { 8 };
            ensure(cursor, header, "experimenter body too short")?;
            let experimenter = cursor.get_u32();
            let exp_type = if legacy { 0 } else { cursor.get_u32() };
            Message::Experimenter(Experimenter {
                experimenter,
                exp_type,
                data: Bytes::copy_from_slice(cursor),
            })
        }
        MessageType::FeaturesRequest => Message::FeaturesRequest,
        MessageType::FeaturesReply => {
            ensure(cursor, 24, "features reply too short")?;
            let datapath_id = cursor.get_u64();
            let n_buffers = cursor.get_u32();
            let n_tables = cursor.get_u8();
            let auxiliary_id = if legacy {
                cursor.advance(3);
                0
            } else {
                let aux = cursor.get_u8();
                cursor.advance(2);
                aux
            };
            let capabilities = cursor.get_u32();
            Message::FeaturesReply(FeaturesReply {
                datapath_id,
                n_buffers,
                n_tables,
                auxiliary_id,
                capabilities,
            })
        }
        MessageType::PacketIn => Message::PacketIn(Bytes::copy_from_slice(cursor)),
        MessageType::FlowRemoved => Message::FlowRemoved(Bytes::copy_from_slice(cursor)),
        MessageType::PortStatus => {
            let port_len = if legacy { 2 } else { 4 };
            ensure(cursor, 8 + port_len, "port status too short")?;
            let reason = cursor.get_u8();
            cursor.advance(7);
            let desc = Bytes::copy_from_slice(cursor);
            let port_no = if legacy {
                cursor.get_u16() as u32
            } else {
                cursor.get_u32()
            };
            Message::PortStatus(PortStatus {
                reason,
                port_no,
                desc,
            })
        }
        MessageType::MultipartRequest | MessageType::MultipartReply => {
            let header = if legacy { 4 } else { 8 };
            ensure(cursor, header, "multipart header too short")?;
            let mp_type = MultipartType::from_raw(cursor.get_u16());
            let flags = cursor.get_u16();
            if !legacy {
                cursor.advance(4);
            }
            let body = Bytes::copy_from_slice(cursor);
            if kind == MessageType::MultipartRequest {
                Message::MultipartRequest(MultipartRequest {
                    mp_type,
                    flags: MultipartRequestFlags::from_bits_retain(flags),
                    body,
                })
            } else {
                Message::MultipartReply(MultipartReply {
                    mp_type,
                    flags: MultipartReplyFlags::from_bits_retain(flags),
                    body,
                })
            }
        }
        MessageType::BarrierRequest => Message::BarrierRequest,
        MessageType::BarrierReply => Message::BarrierReply,
        MessageType::Other(type_code) => Message::Other {
            type_code,
            body: Bytes::copy_from_slice(cursor),
        },
    };
    Ok(message)
}

fn decode_hello(mut cursor: &[u8]) -> Result<Hello, WireError> {
    let mut elements = Vec::new();
    while cursor.remaining() >= 4 {
        let element_type = cursor.get_u16();
        let length = cursor.get_u16() as usize;
        if length < 4 {
            return Err(WireError::InvalidPacket("hello element length below header size"));
        }
        let payload_len = length - 4;
        ensure(cursor, payload_len, "hello element truncated")?;
        let mut payload = &cursor[..payload_len];
        cursor.advance(payload_len);
        // Trailing padding may be absent on the last element.
        cursor.advance(padding(length).min(cursor.remaining()));
        if element_type == HELLO_ELEMENT_VERSION_BITMAP {
            let mut words = Vec::with_capacity(payload_len / 4);
            while payload.remaining() >= 4 {
                words.push(payload.get_u32());
            }
            elements.push(HelloElement::VersionBitmap(VersionBitmap::from_words(words)));
        } else {
            elements.push(HelloElement::Unknown {
                element_type,
                data: Bytes::copy_from_slice(payload),
            });
        }
    }
    Ok(Hello { elements })
}

fn ensure(cursor: &[u8], len: usize, what: &'static str) -> Result<(), WireError> {
    if cursor.len() < len {
        Err(WireError::InvalidPacket(what))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_hello_with_bitmap() {
        let msg = OfpMessage::new(
            version::OF13,
            0x15,
            Message::Hello(Hello::with_versions(&[version::OF10, version::OF13])),
        );
        let encoded = encode(&msg).expect("encode");
        // header + element header + one bitmap word, padded to 8 bytes
        assert_eq!(encoded.len(), HEADER_SIZE + 8);
        assert_eq!(encoded[0], version::OF13);
        assert_eq!(encoded[1], 0);
        assert_eq!(&encoded[2..4], &16u16.to_be_bytes());
        assert_eq!(&encoded[4..8], &0x15u32.to_be_bytes());
        assert_eq!(&encoded[8..10], &HELLO_ELEMENT_VERSION_BITMAP.to_be_bytes());
        assert_eq!(&encoded[10..12], &8u16.to_be_bytes());
        assert_eq!(&encoded[12..16], &0x0000_0012u32.to_be_bytes());

        let decoded = decode(&encoded).expect("decode");
        let bitmap = match &decoded.body {
            Message::Hello(hello) => hello.bitmap().expect("bitmap").clone(),
            other => panic!("unexpected body {other:?}"),
        };
        assert_eq!(bitmap.versions(), vec![version::OF10, version::OF13]);
    }

    #[test]
    fn decode_plain_hello_has_no_bitmap() {
        let buf = [version::OF10, 0, 0, 8, 0, 0, 0, 1];
        let msg = decode(&buf).expect("decode");
        assert_eq!(msg.xid, 1);
        match msg.body {
            Message::Hello(hello) => assert!(hello.bitmap().is_none()),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn multipart_type_codes_depend_on_version() {
        assert_eq!(MessageType::MultipartReply.to_raw(version::OF10), 17);
        assert_eq!(MessageType::MultipartReply.to_raw(version::OF13), 19);
        assert_eq!(
            MessageType::from_raw(version::OF10, 18),
            MessageType::BarrierRequest
        );
        assert_eq!(
            MessageType::from_raw(version::OF13, 18),
            MessageType::MultipartRequest
        );
    }

    #[test]
    fn decode_multipart_reply_more_flag() {
        let mut buf = BytesMut::new();
        buf.put_u8(version::OF13);
        buf.put_u8(19);
        buf.put_u16(20);
        buf.put_u32(7);
        buf.put_u16(MultipartType::Flow.to_raw());
        buf.put_u16(MultipartReplyFlags::REPLY_MORE.bits());
        buf.put_u32(0);
        buf.put_u32(0xDEAD_BEEF);
        let msg = decode(&buf).expect("decode");
        assert_eq!(msg.xid, 7);
        match msg.body {
            Message::MultipartReply(reply) => {
                assert_eq!(reply.mp_type, MultipartType::Flow);
                assert!(reply.has_more());
                assert_eq!(&reply.body[..], &0xDEAD_BEEFu32.to_be_bytes());
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn decode_features_reply_v13() {
        let features = FeaturesReply {
            datapath_id: 0x0000_0000_0000_00AB,
            n_buffers: 256,
            n_tables: 254,
            auxiliary_id: 2,
            capabilities: 0x4F,
        };
        let msg = OfpMessage::new(version::OF13, 3, Message::FeaturesReply(features));
        let encoded = encode(&msg).expect("encode");
        assert_eq!(encoded.len(), HEADER_SIZE + 24);
        assert_eq!(decode(&encoded).expect("decode").body, Message::FeaturesReply(features));
    }

    #[test]
    fn reject_length_mismatch() {
        let buf = [version::OF13, 2, 0, 12, 0, 0, 0, 1];
        let err = decode(&buf).unwrap_err();
        assert!(matches!(
            err,
            WireError::LengthMismatch {
                declared: 12,
                actual: 8
            }
        ));
    }

    #[test]
    fn frame_len_needs_full_header() {
        assert_eq!(frame_len(&[4, 0, 0]), None);
        assert_eq!(frame_len(&[4, 0, 0, 16, 0, 0, 0, 0]), Some(16));
    }

    #[test]
    fn bitmap_intersection() {
        let a = VersionBitmap::from_versions(&[version::OF10, version::OF13]);
        let b = VersionBitmap::from_versions(&[version::OF13]);
        let c = VersionBitmap::from_versions(&[version::OF10]);
        assert_eq!(a.highest_common(&b), Some(version::OF13));
        assert_eq!(b.highest_common(&c), None);
    }
}
