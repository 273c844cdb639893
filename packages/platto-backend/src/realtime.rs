/// Change feed over the hosted realtime socket (Phoenix channel protocol).
///
/// One task per subscription: connect, join the channel with a
/// postgres_changes filter for the program table, heartbeat, and turn
/// change payloads into feed items. `subscribe` returns before the join
/// completes, so every successful join (the first one included) emits a
/// Resync: changes committed before the join was acknowledged were never
/// delivered. On a dropped connection it waits and reconnects. Dropping the
/// Subscription leaves the channel and closes the socket.
use futures_util::{Sink, SinkExt, StreamExt};
use platto_core::{ChangeEvent, FeedItem, Program, ProgramId, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

const FEED_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One Phoenix frame (serializer vsn 1.0.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    ws_url: String,
    access_token: String,
    table: String,
    topic: String,
    reconnect_delay: Duration,
}

enum ConnectionEnd {
    Shutdown,
    ConsumerGone,
    Closed,
}

impl RealtimeFeed {
    pub fn new(base_url: &str, anon_key: &str, access_token: &str, table: &str, channel: &str) -> Self {
        let ws_base = base_url
            .trim_end_matches('/')
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        Self {
            ws_url: format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", ws_base, anon_key),
            access_token: access_token.to_string(),
            table: table.to_string(),
            topic: format!("realtime:{}", channel),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let feed = self.clone();
        tokio::spawn(async move {
            feed.run(tx, shutdown_rx).await;
        });
        Subscription::new(rx, shutdown_tx)
    }

    fn join_frame(&self, reference: &str) -> PhoenixMessage {
        PhoenixMessage {
            topic: self.topic.clone(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [
                        { "event": "*", "schema": "public", "table": self.table }
                    ]
                },
                "access_token": self.access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    fn leave_frame(&self, reference: &str) -> PhoenixMessage {
        PhoenixMessage {
            topic: self.topic.clone(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// `None` unless `frame` answers our join. An accepted join yields the
    /// Resync that covers everything committed before it.
    fn join_outcome(&self, frame: &PhoenixMessage, join_ref: &str, attempt: u32) -> Option<Result<FeedItem, String>> {
        if frame.event != "phx_reply" || frame.reference.as_deref() != Some(join_ref) {
            return None;
        }
        if frame.payload["status"] != "ok" {
            return Some(Err(format!("Join rejected: {}", frame.payload["response"])));
        }
        log::info!(target: "platto.realtime", "Joined {}", self.topic);
        let reason = if attempt == 0 {
            "realtime joined"
        } else {
            "realtime reconnected"
        };
        Some(Ok(FeedItem::Resync {
            reason: reason.to_string(),
        }))
    }

    async fn run(self, tx: mpsc::Sender<FeedItem>, mut shutdown: oneshot::Receiver<()>) {
        let mut attempt = 0u32;
        loop {
            match self.run_connection(&tx, &mut shutdown, attempt).await {
                Ok(ConnectionEnd::Shutdown) | Ok(ConnectionEnd::ConsumerGone) => break,
                Ok(ConnectionEnd::Closed) => {
                    log::info!(target: "platto.realtime", "Socket closed by server");
                }
                Err(e) => {
                    log::warn!(target: "platto.realtime", "{}", e);
                }
            }
            attempt += 1;
            log::info!(
                target: "platto.realtime",
                "Reconnecting in {}s (attempt {})",
                self.reconnect_delay.as_secs(),
                attempt
            );
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        log::info!(target: "platto.realtime", "Left {}", self.topic);
    }

    async fn run_connection(
        &self,
        tx: &mpsc::Sender<FeedItem>,
        shutdown: &mut oneshot::Receiver<()>,
        attempt: u32,
    ) -> Result<ConnectionEnd, String> {
        let (ws_stream, _) = tokio::select! {
            _ = &mut *shutdown => return Ok(ConnectionEnd::Shutdown),
            result = tokio_tungstenite::connect_async(&self.ws_url) => {
                result.map_err(|e| format!("WS connect failed: {}", e))?
            }
        };
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let mut next_ref = 0u64;
        let mut reference = move || {
            next_ref += 1;
            next_ref.to_string()
        };

        let join_ref = reference();
        send_frame(&mut ws_tx, &self.join_frame(&join_ref)).await?;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    let _ = send_frame(&mut ws_tx, &self.leave_frame(&reference())).await;
                    let _ = ws_tx.close().await;
                    return Ok(ConnectionEnd::Shutdown);
                }
                _ = heartbeat.tick() => {
                    send_frame(&mut ws_tx, &heartbeat_frame(&reference())).await?;
                }
                msg = ws_rx.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => return Err(format!("WS read error: {}", e)),
                        None => return Ok(ConnectionEnd::Closed),
                    };
                    let text = match msg {
                        Message::Text(t) => t.to_string(),
                        Message::Ping(data) => {
                            let _ = ws_tx.send(Message::Pong(data)).await;
                            continue;
                        }
                        Message::Close(_) => return Ok(ConnectionEnd::Closed),
                        _ => continue,
                    };
                    let frame: PhoenixMessage = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!(target: "platto.realtime", "Unreadable frame: {}", e);
                            continue;
                        }
                    };

                    if let Some(joined) = self.join_outcome(&frame, &join_ref, attempt) {
                        if tx.send(joined?).await.is_err() {
                            return Ok(ConnectionEnd::ConsumerGone);
                        }
                        continue;
                    }

                    match frame.event.as_str() {
                        "phx_reply" => {}
                        "phx_error" | "phx_close" if frame.topic == self.topic => {
                            return Err(format!("Channel {} closed by server", self.topic));
                        }
                        "system" => {
                            if frame.payload["status"] == "error" {
                                return Err(format!("Realtime error: {}", frame.payload["message"]));
                            }
                            log::debug!(target: "platto.realtime", "System: {}", frame.payload);
                        }
                        _ => {
                            if let Some(item) = decode_change(&frame) {
                                if tx.send(item).await.is_err() {
                                    return Ok(ConnectionEnd::ConsumerGone);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn heartbeat_frame(reference: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

async fn send_frame<S>(sink: &mut S, frame: &PhoenixMessage) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("WS send failed: {}", e))
}

/// Turn a postgres_changes frame into a feed item. Anything the board
/// cannot apply incrementally becomes a Resync.
pub fn decode_change(frame: &PhoenixMessage) -> Option<FeedItem> {
    if frame.event != "postgres_changes" {
        return None;
    }
    let data = &frame.payload["data"];
    let kind = data["type"].as_str().unwrap_or_default();

    let record = |field: &str| -> Result<Program, String> {
        serde_json::from_value(data[field].clone()).map_err(|e| format!("bad {} in {}: {}", field, kind, e))
    };

    let decoded = match kind {
        "INSERT" => record("record").map(ChangeEvent::Created),
        "UPDATE" => record("record").map(ChangeEvent::Updated),
        "DELETE" => data["old_record"]["id"]
            .as_i64()
            .map(|id: ProgramId| ChangeEvent::Deleted(id))
            .ok_or_else(|| "DELETE without old_record.id".to_string()),
        other => Err(format!("unknown change type {:?}", other)),
    };

    Some(match decoded {
        Ok(event) => FeedItem::Change(event),
        Err(reason) => {
            log::warn!(target: "platto.realtime", "Falling back to refresh: {}", reason);
            FeedItem::Resync { reason }
        }
    })
}
