//! # nimble-server
//!
//! Per-connection delivery core of the nimble server.
//!
//! - [`agent`]: one actor per connection; non-blocking push/response/kick/close
//! - [`writer`]: the single task allowed to write a connection's transport
//! - [`pipeline`]: ordered payload transform stages
//! - [`group`] / [`sweeper`]: live session directory and inactivity eviction
//! - [`dispatch`]: inbound packet handling and route handlers
//! - [`server`]: TCP and WebSocket listener front, graceful shutdown
//!
//! ## Data Flow
//!
//! accept → `Agent` + writer task + read task → handler →
//! `Session::push`/`response` → bounded queue → writer → pipeline → codec → socket.

#![deny(unsafe_code)]

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod group;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod sweeper;
pub mod transport;
pub mod writer;

#[cfg(test)]
pub(crate) mod testutil;

pub use agent::Agent;
pub use config::ServerConfig;
pub use dispatch::{Handler, HandlerRegistry};
pub use errors::{AgentError, HandlerError, PipelineError, ServerError, TransportError};
pub use group::Group;
pub use pipeline::Pipeline;
pub use server::NimbleServer;
pub use session::{NetworkEntity, Session};
