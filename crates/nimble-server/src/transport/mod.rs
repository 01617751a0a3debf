//! Physical transports behind an agent.
//!
//! An accepted connection is split three ways:
//!
//! - [`Transport`]: synchronous control handle (peer address, close). Held
//!   by the agent so `close` can be called from any thread.
//! - [`FrameSink`]: write half, owned exclusively by the writer loop.
//! - [`FrameSource`]: read half, owned by the read loop.

pub mod tcp;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::TransportError;

/// Control handle for an open connection.
pub trait Transport: Send + Sync {
    /// Peer address.
    fn remote_addr(&self) -> SocketAddr;

    /// Close the connection. Unblocks any pending read on the source half.
    fn close(&self) -> Result<(), TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one fully framed packet.
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Flush and release the write half. Errors are ignored.
    async fn shutdown(&mut self) {}
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next chunk of inbound bytes; `None` on orderly end of stream.
    ///
    /// Chunks carry no framing guarantee: a packet may span several chunks
    /// and one chunk may hold several packets.
    async fn read(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// An accepted connection, split into its three halves.
pub struct Connection {
    /// Shared handle used by the agent to close the connection.
    pub transport: Arc<dyn Transport>,
    /// Read half, owned by the reader task.
    pub source: Box<dyn FrameSource>,
    /// Write half, owned by the writer loop.
    pub sink: Box<dyn FrameSink>,
}
