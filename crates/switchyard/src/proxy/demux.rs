//! Protocol demultiplexing.
//!
//! Every port carries both plaintext HTTP/1.x and TLS. The first bytes of a
//! connection decide where it goes: an HTTP/1.x request line sends it to the
//! HTTP listener, anything else to the catch-all listener. The bytes read
//! while deciding are replayed to whoever serves the connection.

use super::fan_in::{Accepted, ListenerFanIn};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Upper bound on bytes read before a connection that has not shown an
/// HTTP/1.x request start is sent to the catch-all listener.
pub const SNIFF_LIMIT: usize = 4096;
const MAX_METHOD_LEN: usize = 24;
const MAX_SCHEME_LEN: usize = 32;
const SCHEME_SEPARATOR: &[u8] = b"://";
const HTTP2_PREFACE_METHOD: &[u8] = b"PRI";
const SNIFF_TIMEOUT: Duration = Duration::from_secs(5);
const VIRTUAL_QUEUE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plaintext HTTP/1.x
    Http,
    /// Anything else, TLS included
    Other,
}

/// Classify a connection prefix. `None` means more bytes are needed.
pub fn classify(buf: &[u8]) -> Option<Protocol> {
    let method_end = buf.iter().position(|&b| b == b' ');
    let method = &buf[..method_end.unwrap_or(buf.len())];
    if method.len() > MAX_METHOD_LEN || !method.iter().all(|&b| is_token_char(b)) {
        return Some(Protocol::Other);
    }
    let Some(method_end) = method_end else {
        return None;
    };
    if method_end == 0 {
        return Some(Protocol::Other);
    }

    // The HTTP/2 preface `PRI * HTTP/2.0` needs its version checked.
    if method != HTTP2_PREFACE_METHOD {
        match starts_like_request_target(&buf[method_end + 1..]) {
            Some(true) => return Some(Protocol::Http),
            Some(false) => {}
            None => return None,
        }
    }

    // Authority-form targets (`CONNECT host:port`) need the whole line.
    let Some(line_end) = buf.iter().position(|&b| b == b'\n') else {
        return (buf.len() >= SNIFF_LIMIT).then_some(Protocol::Other);
    };

    let line = buf[..line_end].strip_suffix(b"\r").unwrap_or(&buf[..line_end]);
    let mut parts = line.split(|&b| b == b' ');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None)
            if !method.is_empty() && !target.is_empty() && version.starts_with(b"HTTP/1.") =>
        {
            Some(Protocol::Http)
        }
        _ => Some(Protocol::Other),
    }
}

/// Whether `target` begins an origin-form (`/`), asterisk-form (`*`) or
/// absolute-form (`scheme://`) request target. `None` means more bytes are
/// needed.
fn starts_like_request_target(target: &[u8]) -> Option<bool> {
    let first = *target.first()?;
    if first == b'/' || first == b'*' {
        return Some(true);
    }
    if !first.is_ascii_alphabetic() {
        return Some(false);
    }

    let Some(scheme_end) = target.iter().position(|&b| !is_scheme_char(b)) else {
        return if target.len() > MAX_SCHEME_LEN { Some(false) } else { None };
    };
    let rest = &target[scheme_end..];
    if rest.len() < SCHEME_SEPARATOR.len() {
        return if SCHEME_SEPARATOR.starts_with(rest) { None } else { Some(false) };
    }
    Some(rest.starts_with(SCHEME_SEPARATOR))
}

fn is_scheme_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.')
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Read from `stream` until its protocol is known. Returns `None` if the
/// peer closed the connection without sending anything.
pub async fn sniff<S>(stream: &mut S) -> io::Result<Option<(Protocol, Bytes)>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let room = SNIFF_LIMIT - buf.len();
        let read = (&mut *stream).take(room as u64).read_buf(&mut buf).await?;
        if read == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Ok(Some((Protocol::Other, buf.freeze())));
        }
        if let Some(protocol) = classify(&buf) {
            return Ok(Some((protocol, buf.freeze())));
        }
    }
}

/// A stream whose first bytes were already read; they are replayed before
/// reading from the inner stream again.
#[derive(Debug)]
pub struct PeekedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PeekedStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekedStream<S> {
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

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

/// A classified connection handed to a virtual listener.
#[derive(Debug)]
pub struct Classified {
    pub stream: PeekedStream<TcpStream>,
    pub peer: SocketAddr,
}

/// Receiving end of one demultiplexed connection class.
#[derive(Debug)]
pub struct VirtualListener {
    receiver: mpsc::Receiver<Classified>,
}

impl VirtualListener {
    /// Returns `None` once the demultiplexer has stopped.
    pub async fn accept(&mut self) -> Option<Classified> {
        self.receiver.recv().await
    }
}

/// Splits a [`ListenerFanIn`] into an HTTP and a catch-all listener.
pub struct Demultiplexer {
    http: mpsc::Sender<Classified>,
    other: mpsc::Sender<Classified>,
}

impl Demultiplexer {
    /// Start classifying connections from `fan_in` until `shutdown` fires.
    /// The returned task closes the fan-in when it ends.
    pub fn spawn(
        fan_in: ListenerFanIn,
        shutdown: CancellationToken,
    ) -> (VirtualListener, VirtualListener, JoinHandle<()>) {
        let (http_tx, http_rx) = mpsc::channel(VIRTUAL_QUEUE);
        let (other_tx, other_rx) = mpsc::channel(VIRTUAL_QUEUE);
        let demux = Demultiplexer {
            http: http_tx,
            other: other_tx,
        };

        let task = tokio::spawn(demux.run(fan_in, shutdown));
        (
            VirtualListener { receiver: http_rx },
            VirtualListener { receiver: other_rx },
            task,
        )
    }

    async fn run(self, mut fan_in: ListenerFanIn, shutdown: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = fan_in.accept() => next,
            };

            match next {
                Some(Ok(accepted)) => {
                    let http = self.http.clone();
                    let other = self.other.clone();
                    tokio::spawn(route(accepted, http, other));
                }
                Some(Err(e)) => debug!("Skipping failed accept: {}", e),
                None => break,
            }
        }

        if let Err(e) = fan_in.close().await {
            error!("Error closing listeners: {}", e);
        }
    }
}

async fn route(
    accepted: Accepted,
    http: mpsc::Sender<Classified>,
    other: mpsc::Sender<Classified>,
) {
    let Accepted {
        mut stream, peer, ..
    } = accepted;

    let sniffed = match tokio::time::timeout(SNIFF_TIMEOUT, sniff(&mut stream)).await {
        Ok(Ok(Some(sniffed))) => sniffed,
        Ok(Ok(None)) => {
            debug!("Connection from {} closed before sending data", peer);
            return;
        }
        Ok(Err(e)) => {
            debug!("Failed to read from {}: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("Connection from {} sent no request within {:?}", peer, SNIFF_TIMEOUT);
            return;
        }
    };

    let (protocol, prefix) = sniffed;
    debug!("Connection from {} classified as {:?}", peer, protocol);
    let classified = Classified {
        stream: PeekedStream::new(prefix, stream),
        peer,
    };
    let target = match protocol {
        Protocol::Http => http,
        Protocol::Other => other,
    };
    if target.send(classified).await.is_err() {
        debug!("Dropping connection from {}: listener closed", peer);
    }
}
