//! Writer loop: the only task that writes to a connection's transport.
//!
//! One loop runs per agent and multiplexes, in priority order:
//!
//! 1. agent close / server shutdown
//! 2. the next framed packet waiting to be written
//! 3. the heartbeat ticker
//! 4. the agent's outbound queue
//!
//! Outbound messages are run through the outbound pipeline, encoded, and
//! framed before being handed to the write slot, so packets reach the wire
//! in enqueue order. A kick message ends the loop right after it is written.
//! A pending write is abandoned as soon as the agent closes or the server
//! shuts down. On any exit the loop stops its ticker, closes the agent, and
//! releases the sink.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use nimble_core::codec::{Message, PacketType, packet};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{Agent, Outbound};
use crate::errors::AgentError;
use crate::metrics::{MESSAGES_DROPPED_TOTAL, PACKETS_WRITTEN_TOTAL, WRITER_EXITS_TOTAL};
use crate::pipeline::Pipeline;
use crate::session::Session;
use crate::transport::FrameSink;

/// Why a writer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// No inbound traffic for more than twice the heartbeat interval.
    HeartbeatTimeout,
    /// The transport rejected a write.
    WriteFailed,
    /// A kick message was written.
    Kicked,
    /// The agent was closed from elsewhere.
    Closed,
    /// The server is shutting down.
    Shutdown,
}

impl WriterExit {
    /// Label used in logs and the exit counter.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::WriteFailed => "write_failed",
            Self::Kicked => "kicked",
            Self::Closed => "closed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Shared, immutable inputs for every writer loop.
#[derive(Clone)]
pub struct WriterEnv {
    /// Tick period; silence beyond twice this ends the loop.
    pub heartbeat_interval: Duration,
    /// Outbound stages applied before encoding.
    pub pipeline: Arc<Pipeline>,
    /// Pre-encoded heartbeat packet.
    pub heartbeat_packet: Bytes,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl WriterEnv {
    /// Environment with the standard heartbeat packet.
    pub fn new(heartbeat_interval: Duration, pipeline: Arc<Pipeline>, shutdown: CancellationToken) -> Self {
        Self {
            heartbeat_interval,
            pipeline,
            heartbeat_packet: Bytes::from_static(&[PacketType::Heartbeat as u8, 0, 0, 0]),
            shutdown,
        }
    }
}

/// How long the sink may spend flushing its goodbye before it is dropped.
const SINK_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

struct WritePacket {
    frame: Bytes,
    kick: bool,
}

/// Run the writer loop for `agent` until it exits, then tear down.
pub async fn run_writer(
    agent: Arc<Agent>,
    mut queue: mpsc::Receiver<Outbound>,
    mut sink: Box<dyn FrameSink>,
    env: WriterEnv,
) -> WriterExit {
    let exit = write_loop(&agent, &mut queue, sink.as_mut(), &env).await;

    match agent.close() {
        Ok(()) | Err(AgentError::AlreadyClosed) => {}
        Err(e) => warn!(session_id = agent.session().id(), error = %e, "failed to close agent"),
    }
    if time::timeout(SINK_SHUTDOWN_GRACE, sink.shutdown()).await.is_err() {
        debug!(session_id = agent.session().id(), "sink shutdown abandoned, peer not draining");
    }

    counter!(WRITER_EXITS_TOTAL, "reason" => exit.as_str()).increment(1);
    debug!(
        session_id = agent.session().id(),
        uid = agent.session().uid(),
        remote = %agent.remote_addr(),
        reason = exit.as_str(),
        "session write task exit"
    );
    exit
}

async fn write_loop(
    agent: &Agent,
    queue: &mut mpsc::Receiver<Outbound>,
    sink: &mut dyn FrameSink,
    env: &WriterEnv,
) -> WriterExit {
    let interval = env.heartbeat_interval;
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WritePacket>();
    let session = agent.session();

    loop {
        tokio::select! {
            biased;

            () = agent.done().cancelled() => return WriterExit::Closed,
            () = env.shutdown.cancelled() => return WriterExit::Shutdown,

            Some(packet) = write_rx.recv() => {
                // a peer that stops reading can park the write indefinitely
                let written = tokio::select! {
                    biased;
                    () = agent.done().cancelled() => return WriterExit::Closed,
                    () = env.shutdown.cancelled() => return WriterExit::Shutdown,
                    written = sink.write(packet.frame) => written,
                };
                if let Err(e) = written {
                    warn!(session_id = session.id(), uid = session.uid(), error = %e, "write failed");
                    return WriterExit::WriteFailed;
                }
                counter!(PACKETS_WRITTEN_TOTAL).increment(1);
                if packet.kick {
                    return WriterExit::Kicked;
                }
            }

            _ = ticker.tick() => {
                let silent = Instant::now().saturating_duration_since(agent.last_heartbeat());
                if silent > interval * 2 {
                    warn!(
                        session_id = session.id(),
                        uid = session.uid(),
                        remote = %agent.remote_addr(),
                        silent_ms = silent.as_millis() as u64,
                        "session heartbeat timeout"
                    );
                    return WriterExit::HeartbeatTimeout;
                }
                let _ = write_tx.send(WritePacket {
                    frame: env.heartbeat_packet.clone(),
                    kick: false,
                });
            }

            item = queue.recv() => {
                let Some(item) = item else {
                    return WriterExit::Closed;
                };
                if let Some(packet) = frame_outbound(session, item, &env.pipeline) {
                    let _ = write_tx.send(packet);
                }
            }
        }
    }
}

/// Turn a queued item into wire bytes. `None` means the message was dropped.
fn frame_outbound(session: &Session, item: Outbound, pipeline: &Pipeline) -> Option<WritePacket> {
    let msg = match item {
        Outbound::Control(frame) => return Some(WritePacket { frame, kick: false }),
        Outbound::Message(msg) => msg,
    };

    let data = match pipeline.outbound().process(session, msg.payload) {
        Ok(data) => data,
        Err(e) => {
            warn!(session_id = session.id(), route = %msg.route, error = %e, "broken pipeline, message dropped");
            counter!(MESSAGES_DROPPED_TOTAL, "reason" => "pipeline").increment(1);
            return None;
        }
    };

    let envelope = Message {
        kind: msg.kind,
        id: msg.mid,
        route: msg.route,
        data,
    };
    let frame = match envelope.encode().and_then(|body| packet::encode(PacketType::Data, &body)) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(session_id = session.id(), route = %envelope.route, error = %e, "failed to encode message, dropped");
            counter!(MESSAGES_DROPPED_TOTAL, "reason" => "encode").increment(1);
            return None;
        }
    };

    Some(WritePacket {
        frame,
        kick: msg.kick,
    })
}
