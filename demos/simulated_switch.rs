//! Run a controller on loopback and connect a scripted switch to it.
//!
//! The switch answers HELLO, FEATURES, echo and barrier requests and splits
//! its flow statistics over three multipart fragments.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ofp_session::DeviceEvent;
use ofp_wire::{
    decode, encode, frame_len, version, FeaturesReply, Hello, Message, MultipartReply,
    MultipartReplyFlags, MultipartType, OfpMessage,
};
use openflowplugin::statistics::TABLE_ALL;
use openflowplugin::{Controller, ControllerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info;

const DATAPATH_ID: u64 = 0x00_00_00_00_00_00_ca_fe;

fn answer(request: &OfpMessage) -> Vec<OfpMessage> {
    let reply = |body| OfpMessage::new(request.version, request.xid, body);
    match &request.body {
        Message::Hello(_) => vec![reply(Message::Hello(Hello::with_versions(&[
            version::OF10,
            version::OF13,
        ])))],
        Message::FeaturesRequest => vec![reply(Message::FeaturesReply(FeaturesReply {
            datapath_id: DATAPATH_ID,
            n_buffers: 256,
            n_tables: 4,
            auxiliary_id: 0,
            capabilities: 0x4f,
        }))],
        Message::EchoRequest(data) => vec![reply(Message::EchoReply(data.clone()))],
        Message::BarrierRequest => vec![reply(Message::BarrierReply)],
        Message::MultipartRequest(mp) if mp.mp_type == MultipartType::Flow => (0..3u8)
            .map(|i| {
                let flags = if i < 2 {
                    MultipartReplyFlags::REPLY_MORE
                } else {
                    MultipartReplyFlags::empty()
                };
                reply(Message::MultipartReply(MultipartReply {
                    mp_type: MultipartType::Flow,
                    flags,
                    body: Bytes::from(vec![i; 56]),
                }))
            })
            .collect(),
        Message::MultipartRequest(mp) => vec![reply(Message::MultipartReply(MultipartReply {
            mp_type: mp.mp_type,
            flags: MultipartReplyFlags::empty(),
            body: Bytes::new(),
        }))],
        _ => Vec::new(),
    }
}

async fn run_switch(addr: std::net::SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        while let Some(len) = frame_len(&buf) {
            if buf.len() < len {
                break;
            }
            let frame = buf.split_to(len);
            let request = decode(&frame)?;
            info!(kind = request.kind().name(), xid = request.xid, "switch received");
            for reply in answer(&request) {
                stream.write_all(&encode(&reply)?).await?;
            }
        }
        if stream.read_buf(&mut buf).await? == 0 {
            info!("controller closed the connection");
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = ControllerConfig::default().with_listen("127.0.0.1:0".parse()?);
    let controller = Arc::new(Controller::new(config)?);
    let mut events = controller.subscribe();
    let provider = controller.bind().await?;
    let addr = provider.local_addr()?;
    let server = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.serve(provider).await })
    };
    let switch = tokio::spawn(run_switch(addr));

    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await?? {
            DeviceEvent::Connected(node) => {
                info!(%node, "device connected");
                break;
            }
            other => info!(?other, "event"),
        }
    }

    let stats = controller
        .statistics(DATAPATH_ID)
        .ok_or("device vanished before the query")?;
    let fragments = stats.flow_stats(TABLE_ALL).await?;
    let bytes: usize = fragments.iter().map(|f| f.body.len()).sum();
    println!("flow stats: {} fragments, {bytes} bytes", fragments.len());

    let device = stats.device();
    device.barrier().await?.await?;
    println!("barrier acknowledged");
    println!("{:#?}", controller.instrumentation().snapshot().session);

    controller.shutdown().await;
    server.await?;
    switch.await??;
    Ok(())
}
