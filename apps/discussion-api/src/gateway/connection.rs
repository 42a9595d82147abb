//! One gateway connection: a reader that feeds the hub and a writer that
//! drains the outbound queue and keeps the peer alive with pings.

use std::fmt::Display;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use iqraa_common::id::{prefix, prefixed_ulid};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::models::user::Author;

use super::events::OutboundFrame;
use super::hub::{HubHandle, InboundMessage, Member, SessionInfo};
use super::policy::DeliveryPolicy;

/// Why a connection ended. Logged, never sent anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// A transport read or write failed.
    Transport,
    /// Nothing arrived within the read deadline.
    ReadTimeout,
    /// A write did not complete within the write deadline.
    WriteTimeout,
    /// The peer sent a frame larger than the policy allows.
    OversizeFrame,
    /// The hub closed our queue: eviction, unregistration or shutdown.
    QueueClosed,
    /// The hub stopped accepting commands.
    HubUnavailable,
}

impl CloseReason {
    fn close_frame(self) -> CloseFrame {
        let (code, reason) = match self {
            CloseReason::PeerClosed | CloseReason::Transport => (close_code::NORMAL, ""),
            CloseReason::ReadTimeout | CloseReason::WriteTimeout => (close_code::AWAY, "timeout"),
            CloseReason::OversizeFrame => (close_code::SIZE, "message too big"),
            CloseReason::QueueClosed => (close_code::AWAY, "going away"),
            CloseReason::HubUnavailable => (close_code::RESTART, "server shutting down"),
        };
        CloseFrame {
            code,
            reason: reason.to_string().into(),
        }
    }
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::Transport => "transport error",
            CloseReason::ReadTimeout => "read deadline exceeded",
            CloseReason::WriteTimeout => "write deadline exceeded",
            CloseReason::OversizeFrame => "oversize frame",
            CloseReason::QueueClosed => "outbound queue closed",
            CloseReason::HubUnavailable => "hub unavailable",
        };
        f.write_str(s)
    }
}

/// A bootstrapped, not yet registered connection.
pub struct Connection {
    info: SessionInfo,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    outbound_rx: mpsc::Receiver<OutboundFrame>,
}

impl Connection {
    pub fn new(room_id: &str, author: Author, outbound_capacity: usize) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity.max(1));
        Self {
            info: SessionInfo {
                session_id: prefixed_ulid(prefix::CONNECTION),
                room_id: room_id.to_string(),
                author,
            },
            outbound_tx,
            outbound_rx,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Register with the hub, then run the reader on this task and the writer
    /// on its own task until either ends.
    ///
    /// Whichever side finishes first, the connection is unregistered exactly
    /// here, the writer gets a chance to send a close frame, and the socket is
    /// dropped on return.
    pub async fn run<S, E>(self, socket: S, hub: HubHandle, policy: DeliveryPolicy)
    where
        S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
        <S as Sink<Message>>::Error: Display + Send,
        E: Display + Send,
    {
        let Connection {
            info,
            outbound_tx,
            outbound_rx,
        } = self;

        let (sink, stream) = socket.split::<Message>();

        let member = Member {
            info: info.clone(),
            outbound: outbound_tx,
        };
        if hub.register(member).await.is_err() {
            tracing::debug!(session_id = %info.session_id, "hub stopped before registration");
            let mut sink = sink;
            let _ = send_close(&mut sink, CloseReason::HubUnavailable.close_frame(), policy.write_wait).await;
            return;
        }

        let (close_tx, close_rx) = oneshot::channel();
        let writer_policy = policy.clone();
        let mut writer = tokio::spawn(async move {
            write_loop(sink, outbound_rx, close_rx, &writer_policy).await
        });
        let reader = read_loop(stream, &info, &hub, &policy);
        tokio::pin!(reader);

        let reason = tokio::select! {
            reason = &mut reader => {
                let _ = close_tx.send(reason.close_frame());
                hub.unregister(&info.session_id).await;
                if time::timeout(policy.write_wait, &mut writer).await.is_err() {
                    tracing::debug!(session_id = %info.session_id, "writer did not finish closing");
                    writer.abort();
                }
                reason
            }
            joined = &mut writer => {
                hub.unregister(&info.session_id).await;
                joined.unwrap_or_else(|err| {
                    tracing::error!(session_id = %info.session_id, %err, "writer task failed");
                    CloseReason::Transport
                })
            }
        };

        tracing::info!(
            session_id = %info.session_id,
            room_id = %info.room_id,
            user_id = %info.author.user_id,
            %reason,
            "gateway connection closed"
        );
    }
}

/// Read frames until the peer goes away, misbehaves, or stays silent past
/// the read deadline. Every received frame, pongs included, resets the
/// deadline.
pub async fn read_loop<St, E>(
    mut stream: St,
    info: &SessionInfo,
    hub: &HubHandle,
    policy: &DeliveryPolicy,
) -> CloseReason
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let message = match time::timeout(policy.pong_wait, stream.next()).await {
            Err(_) => return CloseReason::ReadTimeout,
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(err))) => {
                tracing::debug!(session_id = %info.session_id, %err, "ws read error");
                return CloseReason::Transport;
            }
            Ok(Some(Ok(message))) => message,
        };

        let body = match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::debug!(session_id = %info.session_id, "ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return CloseReason::PeerClosed,
        };

        if body.len() > policy.max_message_size {
            tracing::debug!(
                session_id = %info.session_id,
                size = body.len(),
                limit = policy.max_message_size,
                "inbound frame too large"
            );
            return CloseReason::OversizeFrame;
        }

        if body.trim().is_empty() {
            continue;
        }

        let message = InboundMessage {
            session_id: info.session_id.clone(),
            room_id: info.room_id.clone(),
            author: info.author.clone(),
            body,
        };
        if hub.submit(message).await.is_err() {
            return CloseReason::HubUnavailable;
        }
    }
}

/// Drain the outbound queue to the transport, coalescing whatever is already
/// queued into one flush, and ping when the connection has been write-idle
/// for a full ping period.
pub async fn write_loop<Si>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    mut close_rx: oneshot::Receiver<CloseFrame>,
    policy: &DeliveryPolicy,
) -> CloseReason
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut ping = time::interval_at(Instant::now() + policy.ping_period, policy.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = send_close(&mut sink, CloseReason::QueueClosed.close_frame(), policy.write_wait).await;
                    return CloseReason::QueueClosed;
                };

                let mut batch = vec![frame];
                while let Ok(next) = outbound.try_recv() {
                    batch.push(next);
                }

                if let Err(reason) = write_batch(&mut sink, batch, policy.write_wait).await {
                    return reason;
                }
                ping.reset();
            }
            frame = &mut close_rx => {
                if let Ok(frame) = frame {
                    let _ = send_close(&mut sink, frame, policy.write_wait).await;
                }
                return CloseReason::PeerClosed;
            }
            _ = ping.tick() => {
                match time::timeout(policy.write_wait, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::debug!(%err, "ws ping failed");
                        return CloseReason::Transport;
                    }
                    Err(_) => return CloseReason::WriteTimeout,
                }
            }
        }
    }
}

async fn write_batch<Si>(
    sink: &mut Si,
    batch: Vec<OutboundFrame>,
    write_wait: Duration,
) -> Result<(), CloseReason>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let write = async {
        for frame in batch {
            sink.feed(Message::Text(frame)).await?;
        }
        sink.flush().await
    };

    match time::timeout(write_wait, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            tracing::debug!(%err, "ws write error");
            Err(CloseReason::Transport)
        }
        Err(_) => Err(CloseReason::WriteTimeout),
    }
}

async fn send_close<Si>(sink: &mut Si, frame: CloseFrame, write_wait: Duration) -> Result<(), CloseReason>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    match time::timeout(write_wait, sink.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(CloseReason::Transport),
        Err(_) => Err(CloseReason::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Arc;

    use futures_util::stream;

    use super::*;
    use crate::db::community::{DiscussionStore, MemoryCommunityStore};
    use crate::db::users::MemoryUserDirectory;
    use crate::gateway::hub::Hub;
    use crate::models::discussion::DiscussionDraft;

    type TestSink = Pin<Box<dyn Sink<Message, Error = &'static str> + Send>>;

    fn capture_sink() -> (TestSink, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = futures_util::sink::unfold(tx, |tx, message: Message| async move {
            tx.send(message).map_err(|_| "receiver dropped")?;
            Ok::<_, &'static str>(tx)
        });
        (Box::pin(sink), rx)
    }

    fn author() -> Author {
        Author {
            user_id: "usr_a".to_string(),
            user_name: "Amina".to_string(),
            user_role: "student".to_string(),
        }
    }

    struct Room {
        store: Arc<MemoryCommunityStore>,
        hub: HubHandle,
        info: SessionInfo,
        observer: mpsc::Receiver<OutboundFrame>,
    }

    async fn room() -> Room {
        let store = Arc::new(MemoryCommunityStore::new(Arc::new(MemoryUserDirectory::new())));
        let discussion = store
            .create_discussion(&DiscussionDraft {
                user_id: "usr_a".to_string(),
                context_type: "lesson".to_string(),
                context_id: "l1".to_string(),
                title: None,
                body: "topic".to_string(),
            })
            .await
            .unwrap();
        let (hub, _task) = Hub::spawn(store.clone());

        let (outbound, observer) = mpsc::channel(16);
        hub.register(Member {
            info: SessionInfo {
                session_id: "ws_observer".to_string(),
                room_id: discussion.id.clone(),
                author: author(),
            },
            outbound,
        })
        .await
        .unwrap();

        let info = SessionInfo {
            session_id: "ws_reader".to_string(),
            room_id: discussion.id,
            author: author(),
        };
        Room {
            store,
            hub,
            info,
            observer,
        }
    }

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_secs(1),
            "elapsed {elapsed:?}, expected about {expected:?}"
        );
    }

    fn text(body: &str) -> Result<Message, &'static str> {
        Ok(Message::Text(body.to_string().into()))
    }

    #[tokio::test]
    async fn reader_submits_text_frames_until_peer_closes() {
        let mut room = room().await;
        let frames = stream::iter(vec![
            text("first"),
            Ok(Message::Ping(Bytes::new())),
            text("   "),
            text("second"),
            Ok(Message::Close(None)),
            text("never read"),
        ]);

        let reason = read_loop(frames, &room.info, &room.hub, &DeliveryPolicy::default()).await;
        assert_eq!(reason, CloseReason::PeerClosed);

        room.hub.snapshot().await.unwrap();
        assert_eq!(room.store.reply_count(&room.info.room_id), 2);
        for expected in ["first", "second"] {
            let frame = room.observer.try_recv().unwrap();
            let value: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
            assert_eq!(value["d"]["body"], expected);
        }
    }

    #[tokio::test]
    async fn reader_rejects_oversize_frames() {
        let room = room().await;
        let policy = DeliveryPolicy {
            max_message_size: 8,
            ..DeliveryPolicy::default()
        };
        let frames = stream::iter(vec![text("this is far too long"), text("ok")]);

        let reason = read_loop(frames, &room.info, &room.hub, &policy).await;
        assert_eq!(reason, CloseReason::OversizeFrame);

        room.hub.snapshot().await.unwrap();
        assert_eq!(room.store.reply_count(&room.info.room_id), 0);
    }

    #[tokio::test]
    async fn reader_reports_transport_errors() {
        let room = room().await;
        let frames = stream::iter(vec![Err::<Message, _>("connection reset")]);
        let reason = read_loop(frames, &room.info, &room.hub, &DeliveryPolicy::default()).await;
        assert_eq!(reason, CloseReason::Transport);
    }

    #[tokio::test(start_paused = true)]
    async fn reader_times_out_on_a_silent_peer() {
        let room = room().await;
        let start = Instant::now();

        let reason = read_loop(
            stream::pending::<Result<Message, &'static str>>(),
            &room.info,
            &room.hub,
            &DeliveryPolicy::default(),
        )
        .await;

        assert_eq!(reason, CloseReason::ReadTimeout);
        assert_elapsed(start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_extend_the_read_deadline() {
        let room = room().await;
        let start = Instant::now();

        let pongs = Box::pin(stream::unfold(0u32, |sent| async move {
            if sent == 3 {
                return std::future::pending().await;
            }
            time::sleep(Duration::from_secs(40)).await;
            Some((Ok::<_, &'static str>(Message::Pong(Bytes::new())), sent + 1))
        }));

        let reason = read_loop(pongs, &room.info, &room.hub, &DeliveryPolicy::default()).await;

        assert_eq!(reason, CloseReason::ReadTimeout);
        assert_elapsed(start, Duration::from_secs(3 * 40 + 60));
    }

    #[tokio::test]
    async fn writer_flushes_queued_frames_in_order_then_closes() {
        let (sink, mut written) = capture_sink();
        let (tx, rx) = mpsc::channel(8);
        let (_close_tx, close_rx) = oneshot::channel();

        for body in ["a", "b", "c"] {
            tx.send(OutboundFrame::from(body.to_string())).await.unwrap();
        }
        drop(tx);

        let reason = write_loop(sink, rx, close_rx, &DeliveryPolicy::default()).await;
        assert_eq!(reason, CloseReason::QueueClosed);

        for body in ["a", "b", "c"] {
            match written.recv().await {
                Some(Message::Text(t)) => assert_eq!(t.as_str(), body),
                other => panic!("expected text frame, got {other:?}"),
            }
        }
        match written.recv().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn writer_pings_when_idle() {
        let (sink, mut written) = capture_sink();
        let (_tx, rx) = mpsc::channel::<OutboundFrame>(8);
        let (_close_tx, close_rx) = oneshot::channel();
        let policy = DeliveryPolicy::default();

        let task = tokio::spawn(async move { write_loop(sink, rx, close_rx, &policy).await });

        let start = Instant::now();
        let first = written.recv().await;
        assert!(matches!(first, Some(Message::Ping(_))));
        assert_elapsed(start, Duration::from_secs(54));

        task.abort();
    }

    #[tokio::test]
    async fn writer_sends_the_requested_close_frame() {
        let (sink, mut written) = capture_sink();
        let (_tx, rx) = mpsc::channel::<OutboundFrame>(8);
        let (close_tx, close_rx) = oneshot::channel();

        close_tx
            .send(CloseReason::OversizeFrame.close_frame())
            .unwrap();
        write_loop(sink, rx, close_rx, &DeliveryPolicy::default()).await;

        match written.recv().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::SIZE),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn writer_stops_on_transport_error() {
        let (sink, written) = capture_sink();
        drop(written);
        let (tx, rx) = mpsc::channel(8);
        let (_close_tx, close_rx) = oneshot::channel();

        tx.send(OutboundFrame::from("lost".to_string())).await.unwrap();
        let reason = write_loop(sink, rx, close_rx, &DeliveryPolicy::default()).await;
        assert_eq!(reason, CloseReason::Transport);
    }

    #[test]
    fn connections_get_distinct_session_ids() {
        let a = Connection::new("dsc_1", author(), 4);
        let b = Connection::new("dsc_1", author(), 4);
        assert_ne!(a.info().session_id, b.info().session_id);
        assert!(a.info().session_id.starts_with("ws_"));
        assert_eq!(a.info().room_id, "dsc_1");
    }

    fn assert_send<T: Send>(_: T) {}

    // Compile-time check: axum runs upgraded connections on spawned tasks and
    // the writer is spawned from there.
    #[allow(dead_code)]
    fn connection_future_is_send(socket: axum::extract::ws::WebSocket, hub: HubHandle) {
        let connection = Connection::new("dsc_1", author(), 4);
        assert_send(connection.run(socket, hub, DeliveryPolicy::default()));
    }
}
