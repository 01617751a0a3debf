//! Raw TCP transport.

use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::{Connection, FrameSink, FrameSource, Transport};
use crate::errors::TransportError;

const READ_CHUNK: usize = 4096;

/// Split an accepted stream into transport, source and sink halves.
///
/// The control handle keeps a duplicated socket descriptor so `close` can
/// shut the connection down synchronously from outside the I/O tasks.
pub fn split(stream: TcpStream) -> Result<Connection, TransportError> {
    let peer = stream.peer_addr()?;
    let std_stream = stream.into_std()?;
    let control = std_stream.try_clone()?;
    let stream = TcpStream::from_std(std_stream)?;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();

    Ok(Connection {
        transport: Arc::new(TcpTransport { peer, control }),
        source: Box::new(TcpSource { read }),
        sink: Box::new(TcpSink { write }),
    })
}

struct TcpTransport {
    peer: SocketAddr,
    control: std::net::TcpStream,
}

impl Transport for TcpTransport {
    fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    fn close(&self) -> Result<(), TransportError> {
        match self.control.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // peer already gone
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct TcpSource {
    read: OwnedReadHalf,
}

#[async_trait]
impl FrameSource for TcpSource {
    async fn read(&mut self) -> Result<Option<Bytes>, TransportError> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = self.read.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }
}

struct TcpSink {
    write: OwnedWriteHalf,
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.write.write_all(&frame).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.write.shutdown().await;
    }
}
