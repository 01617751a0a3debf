//! Per-connection read loop.
//!
//! Reassembles packets from transport chunks and reacts to each one:
//!
//! | Packet | Action |
//! |--------|--------|
//! | `Handshake` | queue the handshake response (control path) |
//! | `HandshakeAck` | mark the session ready |
//! | `Heartbeat` | refresh liveness |
//! | `Data` | refresh liveness, decode, run inbound pipeline, dispatch |
//! | `Kick` | protocol violation, close |
//!
//! The loop ends on end of stream, a read error, a malformed packet, or when
//! the agent closes. It always leaves the agent closed.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use nimble_core::codec::{Message, MessageType, Packet, PacketCodec, PacketType};
use serde::Serialize;
use tokio_util::codec::Decoder;
use tracing::{debug, instrument, warn};

use super::HandlerRegistry;
use crate::agent::Agent;
use crate::errors::{AgentError, HandlerError, ServerError};
use crate::pipeline::Pipeline;
use crate::transport::FrameSource;

/// Handshake response status for an accepted client.
const HANDSHAKE_OK: u16 = 200;

#[derive(Serialize)]
struct HandshakeSys {
    heartbeat: u64,
}

#[derive(Serialize)]
struct HandshakeResponse {
    code: u16,
    sys: HandshakeSys,
}

/// Encode the handshake response packet advertising `heartbeat_interval`.
pub fn handshake_packet(heartbeat_interval: Duration) -> Result<Bytes, ServerError> {
    let body = serde_json::to_vec(&HandshakeResponse {
        code: HANDSHAKE_OK,
        sys: HandshakeSys {
            heartbeat: heartbeat_interval.as_secs(),
        },
    })?;
    Ok(nimble_core::codec::packet::encode(PacketType::Handshake, &body)?)
}

/// Shared, immutable inputs for every read loop.
pub struct ReaderEnv {
    /// Route table for inbound requests and notifies.
    pub handlers: Arc<HandlerRegistry>,
    /// Inbound stages run before a handler sees the payload.
    pub pipeline: Arc<Pipeline>,
    /// Pre-encoded handshake response.
    pub handshake: Bytes,
    /// Largest packet body accepted from the peer.
    pub max_packet_size: usize,
    /// Upper bound on a single handler invocation.
    pub handler_timeout: Duration,
}

/// Read and dispatch inbound traffic for `agent` until the connection ends.
#[instrument(skip_all, fields(session_id = agent.session().id(), remote = %agent.remote_addr()))]
pub async fn run_reader(agent: Arc<Agent>, mut source: Box<dyn FrameSource>, env: Arc<ReaderEnv>) {
    let mut codec = PacketCodec::with_max_size(env.max_packet_size);
    let mut buf = BytesMut::new();

    'read: loop {
        let chunk = tokio::select! {
            () = agent.done().cancelled() => break,
            chunk = source.read() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => buf.extend_from_slice(&bytes),
            Ok(None) => {
                debug!("peer closed connection");
                break;
            }
            Err(e) => {
                debug!(error = %e, "read failed");
                break;
            }
        }

        loop {
            let packet = match codec.decode(&mut buf) {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "malformed packet, closing connection");
                    break 'read;
                }
            };
            if let Err(e) = process_packet(&agent, packet, &env).await {
                warn!(error = %e, "invalid inbound packet, closing connection");
                break 'read;
            }
        }
    }

    match agent.close() {
        Ok(()) | Err(AgentError::AlreadyClosed) => {}
        Err(e) => debug!(error = %e, "close after read loop failed"),
    }
}

async fn process_packet(agent: &Arc<Agent>, packet: Packet, env: &ReaderEnv) -> Result<(), HandlerError> {
    match packet.kind {
        PacketType::Handshake => {
            agent.touch_heartbeat();
            agent.send_control(env.handshake.clone())?;
        }
        PacketType::HandshakeAck => {
            agent.touch_heartbeat();
            debug!("handshake acknowledged");
        }
        PacketType::Heartbeat => agent.touch_heartbeat(),
        PacketType::Data => {
            agent.touch_heartbeat();
            let msg = Message::decode(&packet.body)?;
            process_message(agent, msg, env).await;
        }
        PacketType::Kick => {
            return Err(HandlerError::InvalidRequest("client sent kick packet".into()));
        }
    }
    Ok(())
}

async fn process_message(agent: &Arc<Agent>, msg: Message, env: &ReaderEnv) {
    match msg.kind {
        MessageType::Request => agent.set_last_mid(msg.id),
        MessageType::Notify => {}
        MessageType::Response | MessageType::Push => {
            warn!(kind = ?msg.kind, route = %msg.route, "unexpected message type from client");
            return;
        }
    }

    let session = agent.session().clone();
    session.touch();

    let payload = match env.pipeline.inbound().process(&session, msg.data) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(route = %msg.route, error = %e, "inbound pipeline rejected message");
            return;
        }
    };

    env.handlers
        .dispatch(&msg.route, session, payload, env.handler_timeout)
        .await;
}
