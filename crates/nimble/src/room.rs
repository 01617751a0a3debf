//! Demo chat room: every connection shares one group.
//!
//! Routes:
//! - `room.echo` responds with the request payload
//! - `room.join` binds `{"uid": n}` to the session and announces it
//! - `room.say` broadcasts `{"content": ..}` to every member

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use nimble_server::{Group, Handler, HandlerError, HandlerRegistry, Session};
use serde::{Deserialize, Serialize};
use tracing::info;

const ON_JOIN: &str = "onJoin";
const ON_LEAVE: &str = "onLeave";
const ON_MESSAGE: &str = "onMessage";

#[derive(Debug, Deserialize)]
struct JoinRequest {
    uid: u64,
}

#[derive(Debug, Deserialize)]
struct SayRequest {
    content: String,
}

#[derive(Debug, Serialize)]
struct Ack {
    code: u16,
    members: usize,
}

#[derive(Debug, Serialize)]
struct MemberEvent {
    uid: u64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    from: u64,
    content: &'a str,
}

fn parse<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, HandlerError> {
    serde_json::from_slice(payload).map_err(|e| HandlerError::InvalidRequest(e.to_string()))
}

fn json(value: &impl Serialize) -> Result<Bytes, HandlerError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| HandlerError::Internal(e.to_string()))
}

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, session: Arc<Session>, payload: Bytes) -> Result<(), HandlerError> {
        session.response(payload)?;
        Ok(())
    }
}

struct Join {
    group: Arc<Group>,
}

#[async_trait]
impl Handler for Join {
    async fn handle(&self, session: Arc<Session>, payload: Bytes) -> Result<(), HandlerError> {
        let req: JoinRequest = parse(&payload)?;
        session.bind(req.uid)?;
        info!(session_id = session.id(), uid = req.uid, "joined room");

        session.response_json(&Ack {
            code: 0,
            members: self.group.count(),
        })?;
        let event = json(&MemberEvent { uid: req.uid })?;
        let _ = self
            .group
            .multicast(ON_JOIN, event, |member| member.id() != session.id());
        Ok(())
    }
}

struct Say {
    group: Arc<Group>,
}

#[async_trait]
impl Handler for Say {
    async fn handle(&self, session: Arc<Session>, payload: Bytes) -> Result<(), HandlerError> {
        let req: SayRequest = parse(&payload)?;
        let uid = session.uid();
        if uid == 0 {
            return Err(HandlerError::InvalidRequest("join the room first".into()));
        }
        let msg = json(&ChatMessage {
            from: uid,
            content: &req.content,
        })?;
        let delivered = self.group.broadcast(ON_MESSAGE, msg);
        session.response_json(&Ack {
            code: 0,
            members: delivered,
        })?;
        Ok(())
    }
}

/// Register the room routes and announce departures of bound sessions.
pub fn register(handlers: &mut HandlerRegistry, group: &Arc<Group>) {
    handlers.register("room.echo", Echo);
    handlers.register("room.join", Join { group: group.clone() });
    handlers.register("room.say", Say { group: group.clone() });

    let group = group.clone();
    handlers.on_session_closed(move |session| {
        info!(session_id = session.id(), uid = session.uid(), "left room");
        if let Ok(event) = json(&MemberEvent { uid: session.uid() }) {
            let _ = group.broadcast(ON_LEAVE, event);
        }
    });
}
