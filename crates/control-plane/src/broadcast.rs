//! SSE event fanout with room semantics.
//!
//! A single run task owns the room table; subscribers and publishers talk
//! to it over a command channel. Rooms are keyed `build:{id}` or
//! `project:{id}`, created on first subscribe and removed with their last
//! client. Per-client queues are bounded and overflow drops the event: log
//! streams prioritize liveness over completeness.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::response::sse::{Event as SseEvent, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use monitoring::metrics::{
    record_sse_event_dropped, sse_client_connected, sse_client_disconnected,
};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const COMMAND_CAPACITY: usize = 100;
const CLIENT_QUEUE_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    BuildLog,
    BuildUpdated,
    DeploymentUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BuildLog => "build_log",
            EventKind::BuildUpdated => "build_updated",
            EventKind::DeploymentUpdated => "deployment_updated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

struct Client {
    id: u64,
    tx: mpsc::Sender<Event>,
}

enum Command {
    Register {
        room: String,
        client: Client,
    },
    Unregister {
        room: String,
        client_id: u64,
    },
    Broadcast {
        room: String,
        event: Event,
    },
    ClientCount {
        room: String,
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the fanout task.
#[derive(Clone)]
pub struct Broadcaster {
    commands: mpsc::Sender<Command>,
    next_client_id: Arc<AtomicU64>,
}

impl Broadcaster {
    /// Spawn the room-owner task and return its handle.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        tokio::spawn(run(rx));

        Self {
            commands: tx,
            next_client_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn build_room(build_id: &str) -> String {
        format!("build:{build_id}")
    }

    pub fn project_room(project_id: &str) -> String {
        format!("project:{project_id}")
    }

    /// Join a room. The subscription unregisters itself when dropped.
    pub async fn subscribe(&self, room: String) -> Subscription {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);

        let _ = self
            .commands
            .send(Command::Register {
                room: room.clone(),
                client: Client { id: client_id, tx },
            })
            .await;

        sse_client_connected();
        debug!("Client {} joined room {}", client_id, room);

        Subscription {
            rx,
            room,
            client_id,
            commands: self.commands.clone(),
        }
    }

    /// Publish a raw log frame to the build room.
    pub async fn broadcast_build_log(&self, build_id: &str, data: &str, level: &str) {
        self.publish(
            Self::build_room(build_id),
            Event {
                kind: EventKind::BuildLog,
                payload: json!({ "data": data, "level": level }),
            },
        )
        .await;
    }

    /// Publish the updated build row to the project room.
    pub async fn broadcast_build_updated(&self, project_id: &str, build: serde_json::Value) {
        self.publish(
            Self::project_room(project_id),
            Event {
                kind: EventKind::BuildUpdated,
                payload: build,
            },
        )
        .await;
    }

    /// Nudge project subscribers to refetch deployment state.
    pub async fn broadcast_deployment_updated(&self, project_id: &str) {
        self.publish(
            Self::project_room(project_id),
            Event {
                kind: EventKind::DeploymentUpdated,
                payload: json!({ "status": "updated" }),
            },
        )
        .await;
    }

    pub async fn client_count(&self, room: &str) -> usize {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .commands
            .send(Command::ClientCount {
                room: room.to_string(),
                reply,
            })
            .await;

        if sent.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn publish(&self, room: String, event: Event) {
        if self
            .commands
            .send(Command::Broadcast { room, event })
            .await
            .is_err()
        {
            warn!("Broadcaster task is gone; event dropped");
        }
    }
}

/// A client's place in a room. Dropping it leaves the room.
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    room: String,
    client_id: u64,
    commands: mpsc::Sender<Command>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn room(&self) -> &str {
        &self.room
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        sse_client_disconnected();

        let command = Command::Unregister {
            room: self.room.clone(),
            client_id: self.client_id,
        };

        // Prefer the cheap path; fall back to a task when the command
        // channel is momentarily full.
        if let Err(mpsc::error::TrySendError::Full(command)) = self.commands.try_send(command) {
            let commands = self.commands.clone();
            tokio::spawn(async move {
                let _ = commands.send(command).await;
            });
        }
    }
}

/// Serve a subscription as a `text/event-stream` response: one `connected`
/// frame carrying the room id, then each event in FIFO order.
pub fn sse_response(
    subscription: Subscription,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let connected = SseEvent::default()
        .event("connected")
        .data(json!({ "room": subscription.room() }).to_string());

    let events = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let frame = SseEvent::default()
            .event(event.kind.as_str())
            .data(event.payload.to_string());
        Some((Ok::<_, Infallible>(frame), subscription))
    });

    let stream = futures::stream::once(async move { Ok::<_, Infallible>(connected) }).chain(events);
    Sse::new(stream)
}

async fn run(mut commands: mpsc::Receiver<Command>) {
    let mut rooms: HashMap<String, Vec<Client>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register { room, client } => {
                rooms.entry(room).or_default().push(client);
            }
            Command::Unregister { room, client_id } => {
                if let Some(clients) = rooms.get_mut(&room) {
                    clients.retain(|c| c.id != client_id);
                    if clients.is_empty() {
                        rooms.remove(&room);
                        debug!("Room {} is empty, removed", room);
                    }
                }
            }
            Command::Broadcast { room, event } => {
                if let Some(clients) = rooms.get(&room) {
                    for client in clients {
                        if client.tx.try_send(event.clone()).is_err() {
                            record_sse_event_dropped();
                        }
                    }
                }
            }
            Command::ClientCount { room, reply } => {
                let count = rooms.get(&room).map(|c| c.len()).unwrap_or(0);
                let _ = reply.send(count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn events_reach_only_their_room() {
        let broadcaster = Broadcaster::start();

        let mut sub_x = broadcaster.subscribe(Broadcaster::build_room("x")).await;
        let mut sub_y = broadcaster.subscribe(Broadcaster::build_room("y")).await;

        broadcaster.broadcast_build_log("x", "line 1\n", "info").await;

        let event = timeout(Duration::from_secs(1), sub_x.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(event.kind, EventKind::BuildLog);
        assert_eq!(event.payload["data"], "line 1\n");

        // Y must see nothing.
        let nothing = timeout(Duration::from_millis(100), sub_y.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn empty_rooms_are_removed_on_unsubscribe() {
        let broadcaster = Broadcaster::start();
        let room = Broadcaster::build_room("gone");

        let sub = broadcaster.subscribe(room.clone()).await;
        assert_eq!(broadcaster.client_count(&room).await, 1);

        drop(sub);

        // The unregister command is processed asynchronously.
        let mut count = 1;
        for _ in 0..50 {
            count = broadcaster.client_count(&room).await;
            if count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn slow_subscribers_drop_instead_of_blocking() {
        let broadcaster = Broadcaster::start();
        let room = Broadcaster::build_room("busy");
        let mut sub = broadcaster.subscribe(room.clone()).await;

        // Overflow the bounded client queue without draining it.
        for i in 0..(CLIENT_QUEUE_CAPACITY + 20) {
            broadcaster
                .broadcast_build_log("busy", &format!("line {i}\n"), "info")
                .await;
        }

        // The subscriber still gets the first CLIENT_QUEUE_CAPACITY events;
        // the overflow was dropped, not queued.
        let mut received = 0;
        while let Ok(Some(_)) = timeout(Duration::from_millis(100), sub.recv()).await {
            received += 1;
        }
        assert!(received <= CLIENT_QUEUE_CAPACITY);
        assert!(received > 0);
    }

    #[tokio::test]
    async fn project_room_events_carry_their_kind() {
        let broadcaster = Broadcaster::start();
        let mut sub = broadcaster
            .subscribe(Broadcaster::project_room("p1"))
            .await;

        broadcaster
            .broadcast_build_updated("p1", json!({ "id": "b1", "status": "building" }))
            .await;
        broadcaster.broadcast_deployment_updated("p1").await;

        let first = timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.kind, EventKind::BuildUpdated);
        assert_eq!(first.payload["status"], "building");

        let second = timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.kind, EventKind::DeploymentUpdated);
        assert_eq!(second.payload["status"], "updated");
    }
}
