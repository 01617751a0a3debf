//! WebSocket transport over an axum upgrade.
//!
//! Each packet is written as one binary frame. Inbound binary and text
//! frames are both treated as raw packet bytes.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Connection, FrameSink, FrameSource, Transport};
use crate::errors::TransportError;

/// Split an upgraded socket into transport, source and sink halves.
pub fn split(socket: WebSocket, peer: SocketAddr) -> Connection {
    let (tx, rx) = socket.split();
    let closed = CancellationToken::new();

    Connection {
        transport: Arc::new(WsTransport {
            peer,
            closed: closed.clone(),
        }),
        source: Box::new(WsSource {
            rx,
            closed: closed.clone(),
        }),
        sink: Box::new(WsSink { tx, closed }),
    }
}

/// Close is signalled to both halves through a shared token. A read or a
/// write still in flight returns at once; the sink sends the close frame
/// when the writer tears down.
struct WsTransport {
    peer: SocketAddr,
    closed: CancellationToken,
}

impl Transport for WsTransport {
    fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }
}

struct WsSource {
    rx: SplitStream<WebSocket>,
    closed: CancellationToken,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn read(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let next = tokio::select! {
                () = self.closed.cancelled() => return Ok(None),
                next = self.rx.next() => next,
            };
            match next {
                None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::copy_from_slice(text.as_str().as_bytes())));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "client sent close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            }
        }
    }
}

struct WsSink {
    tx: SplitSink<WebSocket, Message>,
    closed: CancellationToken,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::WebSocket("connection closed".into())),
            sent = self.tx.send(Message::Binary(frame)) => {
                sent.map_err(|e| TransportError::WebSocket(e.to_string()))
            }
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.tx.send(Message::Close(None)).await;
        let _ = self.tx.close().await;
    }
}
