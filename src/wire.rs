//! Byte transport for one client connection.
//!
//! A [`Wire`] buffers reads and writes on top of any async stream. When the
//! first bytes of a connection are an HTTP upgrade request, the sniffed bytes
//! are replayed into a WebSocket handshake and from then on the wire carries
//! its bytes in binary messages.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::Decoder;

use crate::bolt::{BoltCodec, Structure};
use crate::error::{StubError, StubResult};

/// Fewest bytes a WebSocket upgrade request can have.
const HTTP_HEADER_MIN_SIZE: usize = 26;

/// How much the wire reads when sniffing for an upgrade request.
const SNIFF_SIZE: usize = 1024;

/// Anything a wire can run on.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> Stream for T {}

/// A stream that hands out already sniffed bytes before reading on.
struct Replay {
    prefix: Bytes,
    inner: Box<dyn Stream>,
}

impl AsyncRead for Replay {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Replay {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

enum Transport {
    Raw(Box<dyn Stream>),
    WebSocket(Box<WebSocketStream<Replay>>),
    /// The stream was lost during negotiation.
    Detached,
}

/// Buffered connection to one client.
pub struct Wire {
    transport: Transport,
    /// Application bytes received and not yet consumed
    input: BytesMut,
    /// Bytes written and not yet sent
    output: BytesMut,
    closed: bool,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl Wire {
    /// Wrap a stream.
    pub fn new(stream: impl Stream + 'static) -> Self {
        Self {
            transport: Transport::Raw(Box::new(stream)),
            input: BytesMut::with_capacity(8192),
            output: BytesMut::with_capacity(8192),
            closed: false,
            local_addr: None,
            peer_addr: None,
        }
    }

    /// Wrap an accepted TCP connection.
    pub fn tcp(stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        Self {
            local_addr,
            peer_addr,
            ..Self::new(stream)
        }
    }

    /// Local address of the connection, if known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Address of the client, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether the connection was upgraded to WebSocket.
    pub fn is_websocket(&self) -> bool {
        matches!(self.transport, Transport::WebSocket(_))
    }

    /// Sniff the first bytes of the connection and accept a WebSocket
    /// upgrade if they ask for one. Anything else is kept as input.
    pub async fn negotiate(&mut self) -> StubResult<()> {
        let Transport::Raw(stream) = &mut self.transport else {
            return Ok(());
        };
        let mut buffer = [0u8; SNIFF_SIZE];
        let n = stream
            .read(&mut buffer)
            .await
            .map_err(|_| StubError::broken_wire("Broken"))?;
        let buffer = &buffer[..n];
        if !is_upgrade_request(buffer) {
            self.input.extend_from_slice(buffer);
            return Ok(());
        }

        let Transport::Raw(inner) = std::mem::replace(&mut self.transport, Transport::Detached)
        else {
            return Ok(());
        };
        let replay = Replay {
            prefix: Bytes::copy_from_slice(buffer),
            inner,
        };
        let ws = tokio_tungstenite::accept_async(replay)
            .await
            .map_err(|e| StubError::broken_wire(format!("WebSocket handshake failed: {}", e)))?;
        self.transport = Transport::WebSocket(Box::new(ws));
        Ok(())
    }

    /// Receive more bytes into the input buffer. Returns 0 at end of stream.
    ///
    /// Cancel safe: received bytes are kept in the wire's buffers.
    async fn fill(&mut self) -> StubResult<usize> {
        match &mut self.transport {
            Transport::Raw(stream) => stream
                .read_buf(&mut self.input)
                .await
                .map_err(|_| StubError::broken_wire("Broken")),
            Transport::WebSocket(ws) => loop {
                match ws.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        if data.is_empty() {
                            continue;
                        }
                        self.input.extend_from_slice(&data);
                        return Ok(data.len());
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(0),
                    // pings are answered by the websocket layer
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Text(_))) => {
                        return Err(StubError::broken_wire("Unexpected WebSocket text message"))
                    }
                    Some(Err(e)) => return Err(StubError::broken_wire(e.to_string())),
                }
            },
            Transport::Detached => Ok(0),
        }
    }

    /// Read exactly `n` bytes.
    pub async fn read(&mut self, n: usize) -> StubResult<Bytes> {
        while self.input.len() < n {
            if self.fill().await? == 0 {
                return Err(incomplete(self.input.len(), n));
            }
        }
        Ok(self.input.split_to(n).freeze())
    }

    /// Read the next message.
    pub async fn read_message(&mut self, codec: &mut BoltCodec) -> StubResult<Structure> {
        loop {
            if let Some(message) = codec.decode(&mut self.input)? {
                return Ok(message);
            }
            if self.fill().await? == 0 {
                return Err(incomplete(self.input.len(), codec.wanted(&self.input)));
            }
        }
    }

    /// Queue bytes for the next [`send`](Self::send).
    pub fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    /// Send everything written so far.
    pub async fn send(&mut self) -> StubResult<()> {
        if self.closed {
            return Err(StubError::broken_wire("Closed"));
        }
        let data = self.output.split();
        match &mut self.transport {
            Transport::Raw(stream) => {
                stream.write_all(&data).await?;
                stream.flush().await?;
            }
            Transport::WebSocket(ws) => {
                ws.send(Message::Binary(data.to_vec().into()))
                    .await
                    .map_err(|e| StubError::broken_wire(e.to_string()))?;
            }
            Transport::Detached => return Err(StubError::broken_wire("Closed")),
        }
        Ok(())
    }

    /// Whether nothing has been received that wasn't consumed yet.
    ///
    /// Never waits: only bytes that are already available count. A closed
    /// connection has no input; the next read reports it.
    pub fn check_no_input(&mut self) -> bool {
        if !self.input.is_empty() {
            return false;
        }
        !matches!(self.fill().now_or_never(), Some(Ok(n)) if n > 0)
    }

    /// Shut the connection down.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match &mut self.transport {
            Transport::Raw(stream) => {
                let _ = stream.shutdown().await;
            }
            Transport::WebSocket(ws) => {
                let _ = (**ws).close(None).await;
            }
            Transport::Detached => {}
        }
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("peer_addr", &self.peer_addr)
            .field("websocket", &self.is_websocket())
            .field("closed", &self.closed)
            .finish()
    }
}

fn incomplete(received: usize, wanted: usize) -> StubError {
    StubError::broken_wire(format!(
        "Network read incomplete (received {} of {} bytes)",
        received, wanted
    ))
}

/// Whether the first bytes of a connection are an HTTP request asking to
/// switch to WebSocket.
fn is_upgrade_request(head: &[u8]) -> bool {
    if head.len() < HTTP_HEADER_MIN_SIZE {
        return false;
    }
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    text.split("\r\n")
        .any(|line| line.trim().eq_ignore_ascii_case("upgrade: websocket"))
}
