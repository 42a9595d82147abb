//! The hub: a single task that owns every live connection and every room.
//!
//! Connections, REST handlers and the shutdown path talk to it only through
//! [`HubHandle`]. Commands are processed one at a time, so membership changes
//! and broadcasts are totally ordered and no shared map needs a lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::db::community::ReplyStore;
use crate::models::reply::{NewReply, ReplyView};
use crate::models::user::Author;

use super::events;
use super::registry::{Outbound, RoomRegistry};

/// Depth of each hub command queue. Senders wait when it is full; the hub
/// itself never waits on a connection.
const COMMAND_BUFFER: usize = 1024;

/// Identity of one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    /// The discussion this connection is bound to.
    pub room_id: String,
    pub author: Author,
}

/// A connection joining the hub together with its outbound queue.
#[derive(Debug)]
pub struct Member {
    pub info: SessionInfo,
    pub outbound: Outbound,
}

/// A text frame a client sent, tagged with who sent it and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub session_id: String,
    pub room_id: String,
    pub author: Author,
    pub body: String,
}

#[derive(Debug)]
enum Inbound {
    /// Persist, then fan out.
    Submit(InboundMessage),
    /// Already persisted elsewhere; fan out only.
    Deliver(ReplyView),
}

#[derive(Debug)]
enum Control {
    Snapshot(oneshot::Sender<HubSnapshot>),
    Shutdown(oneshot::Sender<usize>),
}

/// Point-in-time view of hub state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    pub connections: usize,
    pub rooms: BTreeMap<String, usize>,
}

/// The hub task has stopped and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubClosed;

impl std::fmt::Display for HubClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("gateway hub is not running")
    }
}

impl std::error::Error for HubClosed {}

impl<T> From<mpsc::error::SendError<T>> for HubClosed {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        HubClosed
    }
}

impl From<oneshot::error::RecvError> for HubClosed {
    fn from(_: oneshot::error::RecvError) -> Self {
        HubClosed
    }
}

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Member>,
    unregister_tx: mpsc::Sender<String>,
    inbound_tx: mpsc::Sender<Inbound>,
    control_tx: mpsc::Sender<Control>,
}

impl HubHandle {
    /// Add a connection to the live set and its room.
    pub async fn register(&self, member: Member) -> Result<(), HubClosed> {
        self.register_tx.send(member).await?;
        Ok(())
    }

    /// Remove a connection and close its outbound queue. Unknown or
    /// already-removed sessions are ignored, as is a stopped hub.
    pub async fn unregister(&self, session_id: &str) {
        if self.unregister_tx.send(session_id.to_string()).await.is_err() {
            tracing::debug!(%session_id, "hub stopped before unregister");
        }
    }

    /// Hand a client message to the hub for persistence and fan-out.
    pub async fn submit(&self, message: InboundMessage) -> Result<(), HubClosed> {
        self.inbound_tx.send(Inbound::Submit(message)).await?;
        Ok(())
    }

    /// Fan out a reply that was persisted outside the gateway.
    pub async fn deliver(&self, reply: ReplyView) -> Result<(), HubClosed> {
        self.inbound_tx.send(Inbound::Deliver(reply)).await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.control_tx.send(Control::Snapshot(tx)).await?;
        Ok(rx.await?)
    }

    /// Stop accepting commands and close every live connection. Returns how
    /// many connections were closed.
    pub async fn shutdown(&self) -> Result<usize, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.control_tx.send(Control::Shutdown(tx)).await?;
        Ok(rx.await?)
    }
}

pub struct Hub {
    /// session id -> room id
    live: HashMap<String, String>,
    rooms: RoomRegistry,
    store: Arc<dyn ReplyStore>,
    register_rx: mpsc::Receiver<Member>,
    unregister_rx: mpsc::Receiver<String>,
    inbound_rx: mpsc::Receiver<Inbound>,
    control_rx: mpsc::Receiver<Control>,
}

impl Hub {
    pub fn new(store: Arc<dyn ReplyStore>) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(COMMAND_BUFFER);
        let (unregister_tx, unregister_rx) = mpsc::channel(COMMAND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(COMMAND_BUFFER);
        let (control_tx, control_rx) = mpsc::channel(COMMAND_BUFFER);

        let hub = Self {
            live: HashMap::new(),
            rooms: RoomRegistry::new(),
            store,
            register_rx,
            unregister_rx,
            inbound_rx,
            control_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            inbound_tx,
            control_tx,
        };
        (hub, handle)
    }

    /// Create a hub and run it on its own task.
    pub fn spawn(store: Arc<dyn ReplyStore>) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(store);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process commands until shutdown or until every handle is dropped.
    ///
    /// Registrations are drained before unregistrations, and both before
    /// inbound messages, so a connection is always in its room before the
    /// hub sees anything it sent. Snapshot and shutdown requests go ahead of
    /// inbound messages so a persistence backlog cannot starve them.
    pub async fn run(mut self) {
        tracing::info!("gateway hub started");

        loop {
            tokio::select! {
                biased;

                Some(member) = self.register_rx.recv() => self.register(member),
                Some(session_id) = self.unregister_rx.recv() => self.unregister(&session_id),
                Some(control) = self.control_rx.recv() => match control {
                    Control::Snapshot(reply) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Control::Shutdown(reply) => {
                        let closed = self.close_all();
                        let _ = reply.send(closed);
                        return;
                    }
                },
                Some(inbound) = self.inbound_rx.recv() => self.handle_inbound(inbound).await,
                else => break,
            }
        }

        let closed = self.close_all();
        tracing::info!(closed, "gateway hub stopped: all handles dropped");
    }

    fn register(&mut self, member: Member) {
        let Member { info, outbound } = member;

        if self.live.contains_key(&info.session_id) {
            tracing::warn!(session_id = %info.session_id, "duplicate registration ignored");
            return;
        }

        self.rooms.join(&info.room_id, &info.session_id, outbound);
        self.live.insert(info.session_id.clone(), info.room_id.clone());

        tracing::info!(
            session_id = %info.session_id,
            room_id = %info.room_id,
            user_id = %info.author.user_id,
            room_members = self.rooms.member_count(&info.room_id),
            "gateway connection registered"
        );
    }

    fn unregister(&mut self, session_id: &str) {
        let Some(room_id) = self.live.remove(session_id) else {
            return;
        };
        self.rooms.leave(&room_id, session_id);

        tracing::info!(%session_id, %room_id, "gateway connection unregistered");
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Submit(message) => {
                let new = NewReply {
                    discussion_id: message.room_id.clone(),
                    user_id: message.author.user_id.clone(),
                    body: message.body,
                };

                match self.store.create_reply(&new).await {
                    Ok(reply) => self.broadcast(&ReplyView::new(reply, &message.author)),
                    Err(err) => {
                        tracing::warn!(
                            session_id = %message.session_id,
                            room_id = %message.room_id,
                            %err,
                            "reply not persisted; dropping message"
                        );
                    }
                }
            }
            Inbound::Deliver(reply) => self.broadcast(&reply),
        }
    }

    fn broadcast(&mut self, reply: &ReplyView) {
        let room_id = reply.reply.discussion_id.as_str();

        let frame = match events::reply_created(reply) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(?err, %room_id, "failed to encode reply event");
                return;
            }
        };

        let outcome = self.rooms.multicast(room_id, &frame);

        for session_id in &outcome.evicted {
            self.live.remove(session_id);
            tracing::warn!(%session_id, %room_id, "evicting slow consumer");
        }
        for session_id in &outcome.stale {
            self.live.remove(session_id);
            tracing::debug!(%session_id, %room_id, "removed member whose writer is gone");
        }

        tracing::debug!(
            %room_id,
            delivered = outcome.delivered,
            evicted = outcome.evicted.len(),
            "reply fanned out"
        );
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            connections: self.live.len(),
            rooms: self.rooms.counts(),
        }
    }

    /// Close the command queues, then unregister every live connection so
    /// each writer flushes, sends a close frame and exits.
    fn close_all(&mut self) -> usize {
        self.register_rx.close();
        self.unregister_rx.close();
        self.inbound_rx.close();
        self.control_rx.close();

        // Registrations already queued are refused by dropping their senders.
        while let Ok(member) = self.register_rx.try_recv() {
            tracing::debug!(session_id = %member.info.session_id, "registration refused during shutdown");
        }

        let live: Vec<(String, String)> = self.live.drain().collect();
        for (session_id, room_id) in &live {
            self.rooms.leave(room_id, session_id);
        }

        tracing::info!(closed = live.len(), "gateway hub shut down");
        live.len()
    }
}
