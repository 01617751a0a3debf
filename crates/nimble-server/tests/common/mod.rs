//! Shared helpers for integration tests: a server fixture and a raw TCP
//! protocol client.

#![allow(dead_code, missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use nimble_core::codec::{Message, MessageType, Packet, PacketCodec, PacketType, packet};
use nimble_server::{Group, Handler, HandlerError, HandlerRegistry, NimbleServer, Pipeline, ServerConfig, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        shutdown_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

pub struct TestServer {
    pub server: NimbleServer,
    pub addr: SocketAddr,
    pub group: Arc<Group>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(config: ServerConfig, handlers: HandlerRegistry, group: Arc<Group>) -> Self {
        let server = NimbleServer::with_group(config, group.clone(), handlers, Pipeline::new()).unwrap();
        let (addr, handle) = server.listen().await.unwrap();
        Self {
            server,
            addr,
            group,
            handle,
        }
    }

    pub async fn stop(self) {
        self.server.stop(self.handle).await;
    }

    /// Poll until the group holds `n` sessions.
    pub async fn wait_for_sessions(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        while self.group.count() != n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {n} sessions, have {}",
                self.group.count()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Replies with the request payload.
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, session: Arc<Session>, payload: Bytes) -> Result<(), HandlerError> {
        session.response(payload)?;
        Ok(())
    }
}

/// Pushes two welcome messages, then responds.
pub struct Join;

#[async_trait]
impl Handler for Join {
    async fn handle(&self, session: Arc<Session>, _payload: Bytes) -> Result<(), HandlerError> {
        session.push("room.welcome", &b"1"[..])?;
        session.push("room.welcome", &b"2"[..])?;
        session.response(&b"joined"[..])?;
        Ok(())
    }
}

/// Binds the uid given as the payload.
pub struct Login;

#[async_trait]
impl Handler for Login {
    async fn handle(&self, session: Arc<Session>, payload: Bytes) -> Result<(), HandlerError> {
        let uid: u64 = std::str::from_utf8(&payload)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| HandlerError::InvalidRequest("uid expected".into()))?;
        session.bind(uid)?;
        session.response(&b"ok"[..])?;
        Ok(())
    }
}

/// Kicks the caller.
pub struct Kick;

#[async_trait]
impl Handler for Kick {
    async fn handle(&self, session: Arc<Session>, _payload: Bytes) -> Result<(), HandlerError> {
        session.kick(&b"bye"[..])?;
        Ok(())
    }
}

pub fn default_handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers.register("room.echo", Echo);
    handlers.register("room.join", Join);
    handlers.register("auth.login", Login);
    handlers.register("room.kick", Kick);
    handlers
}

/// Minimal protocol client over raw TCP.
pub struct TcpClient {
    stream: TcpStream,
    buf: BytesMut,
    codec: PacketCodec,
}

impl TcpClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::new(),
            codec: PacketCodec::new(),
        }
    }

    pub async fn send(&mut self, kind: PacketType, body: &[u8]) {
        let frame = packet::encode(kind, body).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn send_message(&mut self, msg: &Message) {
        self.send(PacketType::Data, &msg.encode().unwrap()).await;
    }

    /// Next packet, or `None` once the server closed the connection.
    pub async fn recv(&mut self) -> Option<Packet> {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                if let Some(packet) = self.codec.decode(&mut self.buf).unwrap() {
                    return Some(packet);
                }
                match self.stream.read_buf(&mut self.buf).await {
                    Ok(0) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
        })
        .await
        .expect("timed out waiting for packet")
    }

    /// Next data message, skipping heartbeats.
    pub async fn recv_message(&mut self) -> Message {
        loop {
            let packet = self.recv().await.expect("connection closed");
            match packet.kind {
                PacketType::Heartbeat => continue,
                PacketType::Data => return Message::decode(&packet.body).unwrap(),
                other => panic!("unexpected packet {other:?}"),
            }
        }
    }

    /// Perform the handshake and return the server's handshake body.
    pub async fn handshake(&mut self) -> serde_json::Value {
        self.send(PacketType::Handshake, br#"{"sys":{"type":"test"}}"#).await;
        let packet = self.recv().await.expect("no handshake response");
        assert_eq!(packet.kind, PacketType::Handshake);
        self.send(PacketType::HandshakeAck, b"").await;
        serde_json::from_slice(&packet.body).unwrap()
    }

    pub async fn request(&mut self, id: u64, route: &str, data: &[u8]) -> Message {
        self.send_message(&Message::request(id, route, Bytes::copy_from_slice(data)))
            .await;
        let reply = self.recv_message().await;
        assert_eq!(reply.kind, MessageType::Response);
        reply
    }

    /// Wait until the server closes the connection, skipping anything else.
    pub async fn expect_closed(&mut self) {
        while self.recv().await.is_some() {}
    }
}
