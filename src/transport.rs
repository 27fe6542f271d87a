// ABOUTME: Framed TCP transport for HTSP messages
// ABOUTME: Buffered incremental parse-or-read-more loop over one socket, flush-per-frame writes

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Duration};

use crate::config::IpFamily;
use crate::htsmsg::{self, Value};
use crate::{Error, Result};

const LENGTH_PREFIX_LEN: usize = 4;

/// Tries to carve one complete HTSMSG frame out of `buffer`, advancing past
/// it on success. Shared by [`Connection`] and [`FrameReader`] so the two
/// read paths (combined socket vs. split reader half) can't drift.
fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<Value>> {
    if buffer.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let declared = u32::from_be_bytes(buffer[0..LENGTH_PREFIX_LEN].try_into().unwrap()) as usize;
    let total = LENGTH_PREFIX_LEN + declared;
    if buffer.len() < total {
        return Ok(None);
    }

    let frame = &buffer[..total];
    let message = htsmsg::decode(frame)?;
    buffer.advance(total);
    Ok(Some(message))
}

async fn read_message_from<R: AsyncRead + Unpin>(
    stream: &mut R,
    buffer: &mut BytesMut,
) -> Result<Option<Value>> {
    loop {
        if let Some(message) = try_parse_message(buffer)? {
            return Ok(Some(message));
        }

        if 0 == stream.read_buf(buffer).await? {
            return if buffer.is_empty() {
                Ok(None)
            } else {
                Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset mid-frame",
                )))
            };
        }
    }
}

async fn write_message_to<W: AsyncWrite + Unpin>(stream: &mut W, message: &Value) -> Result<()> {
    let encoded = htsmsg::encode(message)?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    Ok(())
}

/// One HTSP connection's read/write halves: a `BufWriter` for outbound
/// coalescing and a growable `BytesMut` that `read_message` tops up only
/// when a full frame isn't already sitting in it.
///
/// Used where a socket is read and written from the same task. The RPC
/// client instead needs a reader task and writer callers running
/// concurrently; for that, call [`split`] to get independent halves.
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Connects to `addr`, bounding the TCP handshake by `connect_timeout`
    /// and the socket to `family`'s address family.
    pub async fn connect(addr: &str, family: IpFamily, connect_timeout: Duration) -> Result<Connection> {
        let socket = dial(addr, family, connect_timeout).await?;
        Ok(Connection::new(socket))
    }

    /// Reads a single HTSMSG message from the stream.
    ///
    /// Returns `Ok(None)` only when the peer closed the connection cleanly
    /// between frames. An EOF in the middle of a frame is reported as a
    /// transport error, not a clean close, since the peer has left a
    /// half-written message.
    pub async fn read_message(&mut self) -> Result<Option<Value>> {
        read_message_from(&mut self.stream, &mut self.buffer).await
    }

    /// Encodes and writes one message, flushing immediately. HTSP has no
    /// pipelining discipline that benefits from coalescing writes across
    /// messages, so every call ends with the bytes on the wire.
    pub async fn write_message(&mut self, message: &Value) -> Result<()> {
        write_message_to(&mut self.stream, message).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Splits into an independent reader and writer, each owning half of
    /// the underlying socket. The RPC client's reader task reads
    /// continuously from `FrameReader` while caller tasks write through a
    /// mutex-guarded `FrameWriter`.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read_half, write_half) = self.stream.into_inner().into_split();
        (
            FrameReader {
                stream: read_half,
                buffer: self.buffer,
            },
            FrameWriter {
                stream: BufWriter::new(write_half),
            },
        )
    }
}

/// Resolves `addr`, keeps only the addresses matching `family`, and
/// connects to the first one that accepts, bounding the whole attempt by
/// `connect_timeout`.
async fn dial(addr: &str, family: IpFamily, connect_timeout: Duration) -> Result<TcpStream> {
    let candidates: Vec<_> = lookup_host(addr)
        .await?
        .filter(|candidate| match family {
            IpFamily::V4 => candidate.is_ipv4(),
            IpFamily::V6 => candidate.is_ipv6(),
        })
        .collect();

    if candidates.is_empty() {
        return Err(Error::Config(format!(
            "'{addr}' resolved to no {family:?} address"
        )));
    }

    let mut last_err = None;
    for candidate in &candidates {
        match timeout(connect_timeout, TcpStream::connect(candidate)).await {
            Ok(Ok(socket)) => {
                socket.set_nodelay(true)?;
                return Ok(socket);
            }
            Ok(Err(err)) => last_err = Some(Error::Transport(err)),
            Err(_) => return Err(Error::Timeout),
        }
    }

    Err(last_err.expect("candidates is non-empty"))
}

#[derive(Debug)]
pub struct FrameReader {
    stream: OwnedReadHalf,
    buffer: BytesMut,
}

impl FrameReader {
    pub async fn read_message(&mut self) -> Result<Option<Value>> {
        read_message_from(&mut self.stream, &mut self.buffer).await
    }
}

#[derive(Debug)]
pub struct FrameWriter {
    stream: BufWriter<OwnedWriteHalf>,
}

impl FrameWriter {
    pub async fn write_message(&mut self, message: &Value) -> Result<()> {
        write_message_to(&mut self.stream, message).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Connects directly to split halves, for callers (the RPC client) that
/// never need the combined form.
pub async fn connect_split(
    addr: &str,
    family: IpFamily,
    connect_timeout: Duration,
) -> Result<(FrameReader, FrameWriter)> {
    let socket = dial(addr, family, connect_timeout).await?;
    Ok(Connection::new(socket).into_split())
}
