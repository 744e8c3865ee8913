//! Bot transport — dialling endpoints and line-level I/O on a live connection.
//!
//! A [`Dialer`] turns an [`Endpoint`] into a type-erased byte stream; the
//! production [`TcpDialer`] uses plain TCP with a connect deadline. The
//! stream is then split into a [`LineReader`] (newline framing with a
//! per-read deadline) and a framed writer, both owned by a [`Connection`].

use std::future::Future;
use std::io;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use super::codec::{CodecError, LineCodec};
use super::message::Outbound;
use crate::config::Endpoint;

/// Combined async read+write trait for type-erased transport streams.
pub trait BotTransport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> BotTransport for T {}

/// A connected stream suitable for framing with [`LineCodec`].
///
/// Boxed so the supervisor doesn't care whether it is talking to a real
/// `TcpStream` or an in-memory pipe.
pub type BotStream = Box<dyn BotTransport>;

/// Opens byte streams to endpoints.
pub trait Dialer {
    fn dial(&self, endpoint: &Endpoint) -> impl Future<Output = io::Result<BotStream>> + Send;
}

/// Plain TCP dialer.
#[derive(Debug, Clone, Copy)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Dialer for TcpDialer {
    fn dial(&self, endpoint: &Endpoint) -> impl Future<Output = io::Result<BotStream>> + Send {
        let addr = endpoint.to_string();
        let connect_timeout = self.connect_timeout;
        async move {
            let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr.as_str()))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%addr, "failed to set TCP_NODELAY: {e}");
            }
            Ok(Box::new(stream) as BotStream)
        }
    }
}

/// Why a line could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("no data within {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    Closed,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Lazy line source for one connection.
///
/// Once the underlying stream ends or fails, every later read reports
/// [`ReadError::Closed`]; a new connection needs a new reader.
pub struct LineReader<R> {
    frames: FramedRead<R, LineCodec>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            frames: FramedRead::new(inner, LineCodec),
            finished: false,
        }
    }

    /// Wait up to `deadline` for the next line.
    ///
    /// A timeout leaves the reader usable; end-of-stream and codec errors
    /// finish it.
    pub async fn next_line(&mut self, deadline: Duration) -> Result<String, ReadError> {
        if self.finished {
            return Err(ReadError::Closed);
        }
        match tokio::time::timeout(deadline, self.frames.next()).await {
            Err(_) => Err(ReadError::Timeout(deadline)),
            Ok(Some(Ok(line))) => Ok(line),
            Ok(Some(Err(e))) => {
                self.finished = true;
                Err(e.into())
            }
            Ok(None) => {
                self.finished = true;
                Err(ReadError::Closed)
            }
        }
    }
}

/// An open transport plus the endpoint it was dialled against.
pub struct Connection {
    endpoint: Endpoint,
    reader: LineReader<ReadHalf<BotStream>>,
    writer: FramedWrite<WriteHalf<BotStream>, LineCodec>,
    closed: bool,
}

impl Connection {
    pub fn new(endpoint: Endpoint, stream: BotStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            endpoint,
            reader: LineReader::new(read_half),
            writer: FramedWrite::new(write_half, LineCodec),
            closed: false,
        }
    }

    /// Dial `endpoint` and wrap the resulting stream.
    pub async fn open<D: Dialer>(dialer: &D, endpoint: &Endpoint) -> io::Result<Self> {
        let stream = dialer.dial(endpoint).await?;
        Ok(Self::new(endpoint.clone(), stream))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Write one line and flush it.
    pub async fn send(&mut self, msg: Outbound) -> Result<(), CodecError> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed").into());
        }
        debug!(endpoint = %self.endpoint, "sent: {msg}");
        self.writer.send(msg).await
    }

    /// Read the next line, waiting at most `deadline`.
    pub async fn read_line(&mut self, deadline: Duration) -> Result<String, ReadError> {
        self.reader.next_line(deadline).await
    }

    /// Shut down the write side. Calling this more than once is harmless.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = SinkExt::<Outbound>::close(&mut self.writer).await {
            warn!(endpoint = %self.endpoint, "close failed: {e}");
        }
    }
}
