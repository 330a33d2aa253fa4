//! TCP transport: listening socket, framed reader loop and the writing
//! half wrapped as a [`ConnectionAdapter`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use ofp_wire::{decode, encode, frame_len, OfpMessage, HEADER_SIZE};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::time;
use tracing::{debug, info, trace, warn};

use crate::adapter::ConnectionAdapter;
use crate::config::consts;
use crate::connection::SessionError;
use crate::listener::{dispatch, OpenflowProtocolListener, SystemListener};
use crate::stats::{Instrumentation, StatisticsGroup};

const LISTEN_BACKLOG: i32 = 1024;

/// Accepts switch connections on the controller port.
pub struct SwitchConnectionProvider {
    listener: TcpListener,
}

impl SwitchConnectionProvider {
    /// Bind the listening socket with address reuse enabled.
    pub async fn bind(addr: SocketAddr) -> Result<Self, SessionError> {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        let listener = TcpListener::from_std(socket.into())?;
        info!(local = %listener.local_addr()?, "listening for switch connections");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next switch to connect.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), SessionError> {
        let (stream, remote) = self.listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(%remote, ?err, "failed to disable Nagle on switch connection");
        }
        debug!(%remote, "switch connected");
        Ok((stream, remote))
    }
}

/// Writing half of a switch TCP connection.
pub struct TcpConnectionAdapter {
    writer: Mutex<Option<OwnedWriteHalf>>,
    remote: SocketAddr,
    alive: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Reading half of a connection plus the signal raised by
/// [`TcpConnectionAdapter::disconnect`].
pub struct TcpReader {
    pub reader: OwnedReadHalf,
    pub shutdown: watch::Receiver<bool>,
}

impl TcpConnectionAdapter {
    /// Split an accepted stream into the adapter and its reader.
    pub fn from_stream(stream: TcpStream) -> Result<(Arc<Self>, TcpReader), SessionError> {
        let remote = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let adapter = Arc::new(Self {
            writer: Mutex::new(Some(writer)),
            remote,
            alive: AtomicBool::new(true),
            shutdown: shutdown_tx,
        });
        Ok((
            adapter,
            TcpReader {
                reader,
                shutdown: shutdown_rx,
            },
        ))
    }
}

#[async_trait]
impl ConnectionAdapter for TcpConnectionAdapter {
    async fn write(&self, message: OfpMessage) -> Result<(), SessionError> {
        let frame = encode(&message)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Closed)?;
        trace!(remote = %self.remote, xid = message.xid, bytes = frame.len(), "writing message");
        if let Err(err) = writer.write_all(&frame).await {
            self.alive.store(false, Ordering::Relaxed);
            return Err(err.into());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.alive.store(false, Ordering::Relaxed);
        let _ = self.shutdown.send(true);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

/// Read framed messages and feed them to `listener` until the stream ends,
/// fails, or the adapter is disconnected.
///
/// `idle_timeout` of read silence raises [`SystemListener::on_switch_idle`];
/// malformed frames are logged and skipped.
pub async fn run_reader<R, L>(
    mut reader: R,
    mut shutdown: watch::Receiver<bool>,
    listener: Arc<L>,
    idle_timeout: Duration,
    instrumentation: Arc<Instrumentation>,
) where
    R: AsyncRead + Unpin + Send,
    L: OpenflowProtocolListener + SystemListener + ?Sized,
{
    let mut buf = BytesMut::with_capacity(consts::READ_BUFFER);
    loop {
        while let Some(len) = frame_len(&buf) {
            if len < HEADER_SIZE {
                warn!(len, "frame shorter than header; closing connection");
                listener.on_disconnect().await;
                return;
            }
            if buf.len() < len {
                break;
            }
            let frame = buf.split_to(len);
            match decode(&frame) {
                Ok(message) => {
                    instrumentation
                        .messages
                        .spy_message(StatisticsGroup::FromSwitch, message.kind());
                    trace!(xid = message.xid, kind = message.kind().name(), "received message");
                    if let Err(err) = dispatch(&*listener, message).await {
                        warn!(%err, "message handler failed");
                    }
                }
                Err(err) => {
                    instrumentation.session.record_malformed_frame();
                    warn!(%err, bytes = len, "discarding malformed frame");
                }
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("reader stopped by disconnect");
                    listener.on_disconnect().await;
                    return;
                }
            }
            read = time::timeout(idle_timeout, reader.read_buf(&mut buf)) => match read {
                Ok(Ok(0)) => {
                    info!("switch closed the connection");
                    listener.on_disconnect().await;
                    return;
                }
                Ok(Ok(bytes)) => trace!(bytes, "read from switch"),
                Ok(Err(err)) => {
                    warn!(%err, "read from switch failed");
                    listener.on_disconnect().await;
                    return;
                }
                Err(_) => listener.on_switch_idle().await,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ofp_wire::{version, Message};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        echoes: StdMutex<Vec<u32>>,
        idles: AtomicUsize,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl OpenflowProtocolListener for Recorder {
        async fn on_echo_request(
            &self,
            header: crate::listener::Header,
            _data: Bytes,
        ) -> Result<(), SessionError> {
            self.echoes.lock().expect("recorder mutex").push(header.xid.0);
            Ok(())
        }
    }

    #[async_trait]
    impl SystemListener for Recorder {
        async fn on_connection_ready(&self) {}

        async fn on_switch_idle(&self) {
            self.idles.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn echo_frame(xid: u32) -> Bytes {
        encode(&OfpMessage::new(
            version::OF13,
            xid,
            Message::EchoRequest(Bytes::new()),
        ))
        .expect("encode")
    }

    #[tokio::test]
    async fn reader_reassembles_split_frames() {
        let (mut client, server) = tokio::io::duplex(64);
        let (_tx, shutdown) = watch::channel(false);
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(run_reader(
            server,
            shutdown,
            Arc::clone(&recorder),
            Duration::from_secs(30),
            Arc::new(Instrumentation::new()),
        ));

        let good: Vec<u8> = [echo_frame(1).to_vec(), echo_frame(2).to_vec()].concat();
        client.write_all(&good[..5]).await.expect("write");
        client.write_all(&good[5..]).await.expect("write");
        drop(client);
        task.await.expect("reader task");

        assert_eq!(*recorder.echoes.lock().expect("recorder mutex"), vec![1, 2]);
        assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (mut client, server) = tokio::io::duplex(256);
        let (_tx, shutdown) = watch::channel(false);
        let recorder = Arc::new(Recorder::default());
        let instrumentation = Arc::new(Instrumentation::new());
        let task = tokio::spawn(run_reader(
            server,
            shutdown,
            Arc::clone(&recorder),
            Duration::from_secs(30),
            Arc::clone(&instrumentation),
        ));

        // HELLO whose element claims more bytes than the frame holds.
        let bad = [version::OF13, 0, 0, 16, 0, 0, 0, 9, 0, 1, 0, 40, 0, 0, 0, 0];
        client.write_all(&bad).await.expect("write");
        client.write_all(&echo_frame(3)).await.expect("write");
        drop(client);
        task.await.expect("reader task");

        assert_eq!(*recorder.echoes.lock().expect("recorder mutex"), vec![3]);
        assert_eq!(instrumentation.session.snapshot().malformed_frames, 1);
    }

    #[tokio::test]
    async fn silence_raises_idle() {
        let (_client, server) = tokio::io::duplex(64);
        let (tx, shutdown) = watch::channel(false);
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(run_reader(
            server,
            shutdown,
            Arc::clone(&recorder),
            Duration::from_millis(20),
            Arc::new(Instrumentation::new()),
        ));
        time::sleep(Duration::from_millis(70)).await;
        tx.send(true).expect("signal shutdown");
        task.await.expect("reader task");
        assert!(recorder.idles.load(Ordering::SeqCst) >= 1);
        assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn adapter_writes_framed_messages() {
        let provider = SwitchConnectionProvider::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
        ))
        .await
        .expect("bind");
        let addr = provider.local_addr().expect("local addr");
        let mut switch = TcpStream::connect(addr).await.expect("connect");
        let (stream, _) = provider.accept().await.expect("accept");
        let (adapter, _reader) = TcpConnectionAdapter::from_stream(stream).expect("split");

        adapter
            .write(OfpMessage::new(version::OF13, 5, Message::BarrierRequest))
            .await
            .expect("write");
        let mut frame = [0u8; HEADER_SIZE];
        switch.read_exact(&mut frame).await.expect("read");
        let message = decode(&frame).expect("decode");
        assert_eq!(message.xid, 5);
        assert_eq!(message.body, Message::BarrierRequest);

        adapter.disconnect().await.expect("disconnect");
        assert!(!adapter.is_alive());
        assert!(adapter
            .write(OfpMessage::new(version::OF13, 6, Message::BarrierRequest))
            .await
            .is_err());
    }
}
