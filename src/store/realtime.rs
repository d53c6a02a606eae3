use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::{interval, timeout, MissedTickBehavior},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::{config::SupabaseConfig, domain::DomainRecord};

use super::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, FeedItem, RemoteError, Subscription};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_REF: &str = "1";
const HEARTBEAT_EVERY: Duration = Duration::from_secs(25);
const EVENT_BUFFER: usize = 256;

/// Change notifications over the hosted realtime websocket (Phoenix channel protocol).
#[derive(Clone)]
pub struct RealtimeFeed {
    endpoint: Url,
    anon_key: String,
    schema: String,
    table: String,
    channel: String,
    join_timeout: Duration,
}

impl RealtimeFeed {
    pub fn new(config: &SupabaseConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            endpoint: websocket_endpoint(&config.url, &config.anon_key)?,
            anon_key: config.anon_key.clone(),
            schema: config.schema.clone(),
            table: config.table.clone(),
            channel: config.channel.clone(),
            join_timeout: config.join_timeout,
        })
    }

    fn topic(&self) -> String {
        format!("realtime:{}", self.channel)
    }

    fn join_message(&self, filter: &ChangeFilter) -> Value {
        let mut change = json!({
            "event": filter.kind.as_str(),
            "schema": self.schema,
            "table": self.table,
        });
        if let Some(row_filter) = filter.row_filter() {
            change["filter"] = Value::String(row_filter);
        }
        json!({
            "topic": self.topic(),
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [change],
                    "private": false,
                },
                "access_token": self.anon_key,
            },
            "ref": JOIN_REF,
            "join_ref": JOIN_REF,
        })
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, RemoteError> {
        let topic = self.topic();
        let socket = timeout(self.join_timeout, self.join(&filter, &topic))
            .await
            .map_err(|_| RemoteError::JoinTimeout(self.join_timeout))??;
        tracing::info!(
            target: "realtime",
            topic = %topic,
            event = filter.kind.as_str(),
            filter = filter.row_filter().as_deref().unwrap_or("-"),
            "subscribed"
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (teardown_tx, teardown_rx) = oneshot::channel();
        let task = tokio::spawn(pump(socket, topic, events_tx, teardown_rx));
        Ok(Subscription::new(events_rx, teardown_tx, task))
    }
}

impl RealtimeFeed {
    /// Connects and joins the channel; resolves once the server acknowledged.
    async fn join(&self, filter: &ChangeFilter, topic: &str) -> Result<Socket, RemoteError> {
        let (mut socket, _) = connect_async(self.endpoint.as_str()).await?;
        socket
            .send(Message::Text(self.join_message(filter).to_string()))
            .await?;
        await_join(&mut socket, topic).await?;
        Ok(socket)
    }
}

async fn await_join(socket: &mut Socket, topic: &str) -> Result<(), RemoteError> {
    while let Some(message) = socket.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(RemoteError::Closed),
            _ => continue,
        };
        let frame: Frame = serde_json::from_str(&text)?;
        if frame.topic != topic {
            continue;
        }
        if frame.event == "phx_reply" && frame.reference.as_deref() == Some(JOIN_REF) {
            return match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Ok(()),
                _ => Err(RemoteError::Rejected(frame.payload["response"].to_string())),
            };
        }
    }
    Err(RemoteError::Closed)
}

async fn pump(
    mut socket: Socket,
    topic: String,
    events: mpsc::Sender<FeedItem>,
    mut teardown: oneshot::Receiver<()>,
) {
    let mut heartbeat = interval(HEARTBEAT_EVERY);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            biased;
            _ = &mut teardown => {
                let leave = json!({
                    "topic": topic,
                    "event": "phx_leave",
                    "payload": {},
                    "ref": next_ref.to_string(),
                });
                if let Err(err) = socket.send(Message::Text(leave.to_string())).await {
                    tracing::debug!(target: "realtime", error = %err, "leave not delivered");
                }
                let _ = socket.close(None).await;
                break;
            }
            _ = heartbeat.tick() => {
                let beat = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": next_ref.to_string(),
                });
                next_ref += 1;
                if let Err(err) = socket.send(Message::Text(beat.to_string())).await {
                    let _ = events.try_send(Err(err.into()));
                    break;
                }
            }
            // Stop reading while the subscriber is behind; heartbeats keep going.
            permit = events.reserve(), if events.capacity() == 0 => {
                if permit.is_err() {
                    break;
                }
            }
            message = socket.next(), if events.capacity() > 0 => {
                let item = match message {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text, &topic) {
                        Ok(Some(event)) => Ok(event),
                        Ok(None) => continue,
                        Err(err) => Err(err),
                    },
                    Some(Ok(Message::Close(_))) | None => Err(RemoteError::Closed),
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => Err(err.into()),
                };
                let fatal = item.is_err();
                if let Err(err) = &item {
                    tracing::warn!(target: "realtime", error = %err, "change feed interrupted");
                }
                if events.try_send(item).is_err() || fatal {
                    break;
                }
            }
        }
    }
    tracing::debug!(target: "realtime", topic = %topic, "reader stopped");
}

#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Turns one websocket text frame into a change event; frames that carry no row
/// change yield `None`.
fn decode_frame(text: &str, topic: &str) -> Result<Option<ChangeEvent>, RemoteError> {
    let frame: Frame = serde_json::from_str(text)?;
    if frame.topic != topic {
        return Ok(None);
    }
    match frame.event.as_str() {
        "postgres_changes" => {
            let payload: ChangePayload = serde_json::from_value(frame.payload)?;
            let kind = ChangeKind::parse(&payload.data.kind).ok_or_else(|| {
                RemoteError::Rejected(format!("unknown change type {}", payload.data.kind))
            })?;
            let record = match payload.data.record {
                Some(value) if !is_empty_object(&value) => {
                    Some(serde_json::from_value::<DomainRecord>(value)?)
                }
                _ => None,
            };
            let old_id = payload
                .data
                .old_record
                .and_then(|old| old.get("id").cloned())
                .and_then(|id| serde_json::from_value(id).ok());
            Ok(Some(ChangeEvent {
                kind,
                record,
                old_id,
            }))
        }
        "phx_error" => Err(RemoteError::Rejected(frame.payload.to_string())),
        "phx_close" => Err(RemoteError::Closed),
        "system" if frame.payload.get("status").and_then(Value::as_str) == Some("error") => {
            let message = frame
                .payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("realtime reported an error");
            Err(RemoteError::Rejected(message.to_string()))
        }
        _ => Ok(None),
    }
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|map| map.is_empty())
}

fn websocket_endpoint(base: &str, anon_key: &str) -> Result<Url, RemoteError> {
    let mut url = Url::parse(base).map_err(|err| RemoteError::Endpoint(err.to_string()))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(RemoteError::Endpoint(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| RemoteError::Endpoint(format!("cannot switch {base} to {scheme}")))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}
