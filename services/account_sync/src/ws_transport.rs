//! Solana JSON-RPC websocket transport for account subscriptions
//!
//! One background task owns the socket. Callers talk to it through a command
//! channel; JSON-RPC responses are matched back to callers by request id and
//! `accountNotification`s are routed to sinks by subscription id.

use crate::connection::{AccountUpdate, PubSubTransport, SubscriptionId};
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use types::{Address, Slot};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_QUEUE: usize = 256;

enum Command {
    Subscribe {
        address: Address,
        sink: mpsc::UnboundedSender<AccountUpdate>,
        reply: oneshot::Sender<Result<SubscriptionId>>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<Result<()>>,
    },
    GetSlot {
        reply: oneshot::Sender<Result<Slot>>,
    },
}

enum Pending {
    Subscribe {
        address: Address,
        sink: mpsc::UnboundedSender<AccountUpdate>,
        reply: oneshot::Sender<Result<SubscriptionId>>,
    },
    Unsubscribe {
        reply: oneshot::Sender<Result<()>>,
    },
    GetSlot {
        reply: oneshot::Sender<Result<Slot>>,
    },
}

/// Parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        result: std::result::Result<Value, String>,
    },
    AccountNotification {
        subscription: SubscriptionId,
        slot: Slot,
        data: Vec<u8>,
    },
}

/// [`PubSubTransport`] over a Solana RPC websocket
pub struct WsPubSub {
    url: String,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl WsPubSub {
    /// Connect once, then keep the socket up for the life of the transport
    ///
    /// When the socket drops, every open sink is closed so subscribers can
    /// resubscribe, and the task reconnects with [`RetryPolicy`] backoff.
    /// Requests sent while reconnecting wait for the new socket.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_backoff(url, RetryPolicy::default()).await
    }

    pub async fn connect_with_backoff(url: &str, backoff: RetryPolicy) -> Result<Self> {
        let ws_stream = open_socket(url).await?;

        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        let task = tokio::spawn(supervise(url.to_string(), ws_stream, rx, backoff));

        Ok(Self {
            url: url.to_string(),
            commands,
            task,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SyncError::transport("socket task stopped"))?;
        response
            .await
            .map_err(|_| SyncError::transport("socket closed before reply"))?
    }
}

impl Drop for WsPubSub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl PubSubTransport for WsPubSub {
    async fn subscribe_account(
        &self,
        address: Address,
        sink: mpsc::UnboundedSender<AccountUpdate>,
    ) -> Result<SubscriptionId> {
        self.request(|reply| Command::Subscribe {
            address,
            sink,
            reply,
        })
        .await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.request(|reply| Command::Unsubscribe { id, reply }).await
    }

    async fn get_slot(&self) -> Result<Slot> {
        self.request(|reply| Command::GetSlot { reply }).await
    }
}

#[derive(Default)]
struct SocketState {
    next_request_id: u64,
    pending: HashMap<u64, Pending>,
    sinks: HashMap<SubscriptionId, (Address, mpsc::UnboundedSender<AccountUpdate>)>,
}

impl SocketState {
    /// Register a command as pending and return its JSON-RPC request
    fn request_for(&mut self, command: Command) -> (u64, Value) {
        self.next_request_id += 1;
        let id = self.next_request_id;

        let (method, params, pending) = match command {
            Command::Subscribe {
                address,
                sink,
                reply,
            } => (
                "accountSubscribe",
                json!([address.to_string(), {"encoding": "base64", "commitment": "processed"}]),
                Pending::Subscribe {
                    address,
                    sink,
                    reply,
                },
            ),
            Command::Unsubscribe { id: sub, reply } => {
                self.sinks.remove(&sub);
                ("accountUnsubscribe", json!([sub]), Pending::Unsubscribe { reply })
            }
            Command::GetSlot { reply } => ("getSlot", json!([]), Pending::GetSlot { reply }),
        };

        self.pending.insert(id, pending);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        (id, request)
    }

    fn handle_text(&mut self, text: &str) {
        match parse_message(text) {
            Some(Incoming::Response { id, result }) => self.complete(id, result),
            Some(Incoming::AccountNotification {
                subscription,
                slot,
                data,
            }) => {
                let Some((address, sink)) = self.sinks.get(&subscription) else {
                    debug!("Notification for unknown subscription {}", subscription);
                    return;
                };
                let update = AccountUpdate {
                    address: *address,
                    slot,
                    data,
                };
                if sink.send(update).is_err() {
                    debug!("Subscriber for {} went away", subscription);
                    self.sinks.remove(&subscription);
                }
            }
            None => debug!("Skipping unrecognised ws message"),
        }
    }

    fn complete(&mut self, id: u64, result: std::result::Result<Value, String>) {
        let Some(pending) = self.pending.remove(&id) else {
            debug!("Response for unknown request {}", id);
            return;
        };

        match pending {
            Pending::Subscribe {
                address,
                sink,
                reply,
            } => {
                let outcome = result.and_then(|v| {
                    v.as_u64()
                        .ok_or_else(|| format!("non-numeric subscription id {}", v))
                });
                match outcome {
                    Ok(sub) => {
                        self.sinks.insert(sub, (address, sink));
                        let _ = reply.send(Ok(sub));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(SyncError::transport(e)));
                    }
                }
            }
            Pending::Unsubscribe { reply } => {
                let _ = reply.send(result.map(|_| ()).map_err(SyncError::transport));
            }
            Pending::GetSlot { reply } => {
                let slot = result.and_then(|v| {
                    v.as_u64().ok_or_else(|| format!("non-numeric slot {}", v))
                });
                let _ = reply.send(slot.map_err(SyncError::transport));
            }
        }
    }

    /// Fail every caller still waiting for a reply
    fn fail_pending(&mut self, reason: &str) {
        for (_, pending) in self.pending.drain() {
            let err = || SyncError::transport(reason.to_string());
            match pending {
                Pending::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(err()));
                }
                Pending::Unsubscribe { reply } => {
                    let _ = reply.send(Err(err()));
                }
                Pending::GetSlot { reply } => {
                    let _ = reply.send(Err(err()));
                }
            }
        }
        self.sinks.clear();
    }
}

async fn open_socket(url: &str) -> Result<WsStream> {
    info!("Connecting to RPC websocket {}", url);

    let (ws_stream, response) = timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| {
            SyncError::transport(format!("connection timeout after {:?}", CONNECT_TIMEOUT))
        })??;

    info!("Connected to {} with response: {:?}", url, response.status());
    Ok(ws_stream)
}

async fn supervise(
    url: String,
    mut ws_stream: WsStream,
    mut commands: mpsc::Receiver<Command>,
    backoff: RetryPolicy,
) {
    loop {
        let Some(reason) = run_socket(ws_stream, &mut commands).await else {
            info!("RPC websocket task exiting: transport dropped");
            return;
        };
        warn!("RPC websocket to {} lost: {}, reconnecting", url, reason);

        let mut attempt = 0u32;
        ws_stream = loop {
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(backoff.backoff(attempt)).await;
            match open_socket(&url).await {
                Ok(stream) => break stream,
                Err(e) => warn!("Reconnect attempt {} to {} failed: {}", attempt, url, e),
            }
        };
    }
}

/// Drive one socket until it fails; `None` once the transport itself is dropped
async fn run_socket(ws_stream: WsStream, commands: &mut mpsc::Receiver<Command>) -> Option<String> {
    let (mut write, mut read) = ws_stream.split();
    let mut state = SocketState::default();

    let reason = loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    state.fail_pending("transport dropped");
                    return None;
                };
                let (id, request) = state.request_for(command);
                if let Err(e) = write.send(Message::Text(request.to_string())).await {
                    warn!("Failed to send request {}: {}", id, e);
                    break e.to_string();
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => state.handle_text(&text),
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        warn!("Failed to send ws pong: {}", e);
                        break e.to_string();
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!("RPC websocket closed: {:?}", frame);
                    break "socket closed by server".to_string();
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("RPC websocket error: {}", e);
                    break e.to_string();
                }
                None => {
                    warn!("RPC websocket stream ended");
                    break "stream ended".to_string();
                }
            }
        }
    };

    state.fail_pending(&reason);
    Some(reason)
}

/// Parse one JSON-RPC frame into a response or an account notification
pub(crate) fn parse_message(text: &str) -> Option<Incoming> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!("Skipping invalid ws message json: {}", e);
            return None;
        }
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        if let Some(result) = value.get("result") {
            return Some(Incoming::Response {
                id,
                result: Ok(result.clone()),
            });
        }
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Some(Incoming::Response {
                id,
                result: Err(message),
            });
        }
        return None;
    }

    if value.get("method").and_then(Value::as_str) != Some("accountNotification") {
        return None;
    }

    let params = value.get("params")?;
    let subscription = params.get("subscription")?.as_u64()?;
    let result = params.get("result")?;
    let slot = result.get("context")?.get("slot")?.as_u64()?;
    let encoded = result.get("value")?.get("data")?.get(0)?.as_str()?;
    let data = match STANDARD.decode(encoded) {
        Ok(data) => data,
        Err(e) => {
            warn!("Undecodable account data on subscription {}: {}", subscription, e);
            return None;
        }
    };

    Some(Incoming::AccountNotification {
        subscription,
        slot,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe_response() {
        let parsed = parse_message(r#"{"jsonrpc":"2.0","result":23784,"id":1}"#);
        assert_eq!(
            parsed,
            Some(Incoming::Response {
                id: 1,
                result: Ok(json!(23784))
            })
        );
    }

    #[test]
    fn test_parse_error_response() {
        let parsed = parse_message(
            r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid param"},"id":4}"#,
        );
        assert_eq!(
            parsed,
            Some(Incoming::Response {
                id: 4,
                result: Err("Invalid param".into())
            })
        );
    }

    #[test]
    fn test_parse_account_notification() {
        let data = STANDARD.encode([7u8, 8, 9]);
        let text = json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {
                "result": {
                    "context": {"slot": 5199307},
                    "value": {
                        "data": [data, "base64"],
                        "executable": false,
                        "lamports": 33594,
                        "owner": "11111111111111111111111111111111",
                        "rentEpoch": 635
                    }
                },
                "subscription": 23784
            }
        })
        .to_string();

        assert_eq!(
            parse_message(&text),
            Some(Incoming::AccountNotification {
                subscription: 23784,
                slot: 5199307,
                data: vec![7, 8, 9],
            })
        );
    }

    #[test]
    fn test_parse_ignores_other_methods_and_garbage() {
        assert_eq!(parse_message("not json"), None);
        assert_eq!(
            parse_message(r#"{"jsonrpc":"2.0","method":"slotNotification","params":{}}"#),
            None
        );
    }

    #[tokio::test]
    async fn test_state_routes_notifications_after_subscribe() {
        let mut state = SocketState::default();
        let (sink, mut updates) = mpsc::unbounded_channel();
        let (reply, response) = oneshot::channel();
        let address = Address::from_seed(3);

        let (id, request) = state.request_for(Command::Subscribe {
            address,
            sink,
            reply,
        });
        assert_eq!(request["method"], "accountSubscribe");
        assert_eq!(request["params"][0], address.to_string());

        state.handle_text(&json!({"jsonrpc": "2.0", "result": 42, "id": id}).to_string());
        assert_eq!(response.await.unwrap().unwrap(), 42);

        let text = json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {
                "result": {
                    "context": {"slot": 11},
                    "value": {"data": [STANDARD.encode([1u8]), "base64"]}
                },
                "subscription": 42
            }
        })
        .to_string();
        state.handle_text(&text);

        let update = updates.recv().await.unwrap();
        assert_eq!(update.address, address);
        assert_eq!(update.slot, 11);
    }

    #[tokio::test]
    async fn test_fail_pending_wakes_waiters() {
        let mut state = SocketState::default();
        let (reply, response) = oneshot::channel();
        state.request_for(Command::GetSlot { reply });

        state.fail_pending("stream ended");
        assert!(response.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_reconnects_after_server_drop() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        // First socket answers one request and hangs up, the second stays open
        let server = tokio::spawn(async move {
            for subscription in [11u64, 12] {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(Message::Text(text))) = ws.next().await {
                    let request: Value = serde_json::from_str(&text).unwrap();
                    let reply = json!({
                        "jsonrpc": "2.0",
                        "result": subscription,
                        "id": request["id"],
                    });
                    ws.send(Message::Text(reply.to_string())).await.unwrap();
                    if subscription == 11 {
                        break;
                    }
                }
            }
        });

        let backoff = RetryPolicy {
            max_attempts: 1,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        let transport = WsPubSub::connect_with_backoff(&url, backoff).await.unwrap();
        let address = Address::from_seed(3);

        let (tx, mut first) = mpsc::unbounded_channel();
        assert_eq!(transport.subscribe_account(address, tx).await.unwrap(), 11);
        let closed = timeout(Duration::from_secs(5), first.recv()).await.unwrap();
        assert!(closed.is_none());

        let (tx, _second) = mpsc::unbounded_channel();
        let id = timeout(Duration::from_secs(5), transport.subscribe_account(address, tx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, 12);

        drop(transport);
        server.abort();
    }
}
