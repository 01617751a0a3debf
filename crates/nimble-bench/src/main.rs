//! Load generator for the nimble server.
//!
//! Boots an in-process TCP server with a `bench.ping` handler, connects
//! `--clients` protocol clients that handshake and then loop on
//! request/response, and prints the completed requests per second.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use nimble_core::codec::{Message, MessageType, Packet, PacketCodec, PacketType};
use nimble_core::logging::{LogFormat, init_subscriber};
use nimble_server::{Handler, HandlerError, HandlerRegistry, NimbleServer, Pipeline, ServerConfig, Session};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const PING_ROUTE: &str = "bench.ping";

#[derive(Debug, Parser)]
#[command(name = "nimble-bench", about = "Request/response throughput benchmark")]
struct Args {
    /// Concurrent client connections.
    #[arg(long, default_value_t = 200)]
    clients: usize,

    /// Seconds to run before reporting totals.
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Pause between requests on each client, in milliseconds.
    #[arg(long, default_value_t = 2)]
    interval_ms: u64,

    /// Request payload size in bytes.
    #[arg(long, default_value_t = 16)]
    payload: usize,

    /// Log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

struct Ping;

#[async_trait]
impl Handler for Ping {
    async fn handle(&self, session: Arc<Session>, payload: Bytes) -> Result<(), HandlerError> {
        session.response(payload)?;
        Ok(())
    }
}

type Conn = Framed<TcpStream, PacketCodec>;

async fn connect(addr: SocketAddr) -> Result<Conn> {
    let stream = TcpStream::connect(addr).await.context("connect")?;
    stream.set_nodelay(true)?;
    let mut conn = Framed::new(stream, PacketCodec::new());

    conn.send(Packet::new(PacketType::Handshake, Bytes::from_static(b"{}")))
        .await?;
    match conn.next().await {
        Some(Ok(packet)) if packet.kind == PacketType::Handshake => {}
        other => bail!("handshake failed: {other:?}"),
    }
    conn.send(Packet::new(PacketType::HandshakeAck, Bytes::new()))
        .await?;
    Ok(conn)
}

/// Wait for the response to `id`, answering nothing else.
async fn await_response(conn: &mut Conn, id: u64) -> Result<()> {
    while let Some(packet) = conn.next().await {
        let packet = packet?;
        if packet.kind != PacketType::Data {
            continue;
        }
        let msg = Message::decode(&packet.body)?;
        if msg.kind == MessageType::Response && msg.id == id {
            return Ok(());
        }
    }
    bail!("connection closed")
}

async fn run_client(
    addr: SocketAddr,
    payload: Bytes,
    interval: Duration,
    completed: Arc<AtomicU64>,
    stop: CancellationToken,
) -> Result<()> {
    let mut conn = connect(addr).await?;
    let mut id = 0u64;

    while !stop.is_cancelled() {
        id += 1;
        let body = Message::request(id, PING_ROUTE, payload.clone()).encode()?;
        conn.send(Packet::new(PacketType::Data, body)).await?;

        tokio::select! {
            () = stop.cancelled() => break,
            res = await_response(&mut conn, id) => res?,
        }
        let _ = completed.fetch_add(1, Ordering::Relaxed);

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_subscriber(&args.log_level, LogFormat::Compact);

    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        send_backlog: 64,
        ..ServerConfig::default()
    };
    let mut handlers = HandlerRegistry::new();
    handlers.register(PING_ROUTE, Ping);
    let server = NimbleServer::new(config, handlers, Pipeline::new())?;
    let (addr, server_handle) = server.listen().await?;

    let completed = Arc::new(AtomicU64::new(0));
    let stop = CancellationToken::new();
    let payload = Bytes::from(vec![b'x'; args.payload]);
    let interval = Duration::from_millis(args.interval_ms);

    let clients: Vec<_> = (0..args.clients)
        .map(|_| {
            let completed = completed.clone();
            let stop = stop.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                if let Err(e) = run_client(addr, payload, interval, completed, stop).await {
                    warn!(error = %e, "client failed");
                }
            })
        })
        .collect();

    println!(
        "nimble-bench: {} clients against {addr} for {}s",
        args.clients, args.duration
    );
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );
    let mut previous = 0;
    for _ in 0..args.duration {
        let _ = ticker.tick().await;
        let total = completed.load(Ordering::Relaxed);
        println!("QPS {}", total - previous);
        previous = total;
    }

    stop.cancel();
    for client in clients {
        let _ = client.await;
    }
    server.stop(server_handle).await;

    let total = completed.load(Ordering::Relaxed);
    #[allow(clippy::cast_precision_loss)]
    let avg = total as f64 / args.duration.max(1) as f64;
    println!("total {total} requests, avg {avg:.0} QPS");
    Ok(())
}
