//! Wire format of server-to-client gateway frames.

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;

use crate::models::reply::ReplyView;

/// One serialized frame waiting in a connection's outbound queue. Cloning is
/// a reference-count bump, so a broadcast serializes once for all members.
pub type OutboundFrame = Utf8Bytes;

/// Dispatch event names.
pub struct EventName;

impl EventName {
    pub const REPLY_CREATE: &'static str = "REPLY_CREATE";
}

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage<T> {
    pub t: &'static str,
    pub d: T,
}

impl<T: Serialize> GatewayMessage<T> {
    pub fn encode(&self) -> Result<OutboundFrame, serde_json::Error> {
        serde_json::to_string(self).map(OutboundFrame::from)
    }
}

/// Frame announcing a newly persisted reply to its discussion room.
pub fn reply_created(reply: &ReplyView) -> Result<OutboundFrame, serde_json::Error> {
    GatewayMessage {
        t: EventName::REPLY_CREATE,
        d: reply,
    }
    .encode()
}
