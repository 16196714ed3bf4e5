//! WebSocket bridge to the protocol host process.
//!
//! The cryptographic web-client protocol runs in a separate host process;
//! this engine speaks newline-less JSON frames to it over a single WebSocket
//! and fans events out per account. Send results carry the post-send frame
//! so resend callbacks can be answered from the gateway's message cache.

use std::{
    collections::HashMap,
    future::Future,
    path::Path,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    serde::{Deserialize, Serialize},
    tokio::sync::{Mutex, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::{
    socket::{Presence, ProtocolEngine, ProtocolSocket, SocketSession},
    types::{ClientFingerprint, DisconnectCause, InboundFrame, SocketEvent, WireMessage},
};

pub const DEFAULT_HOST_URL: &str = "ws://127.0.0.1:3012";

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY: Duration = Duration::from_millis(500);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;

/// Looks up a stored wire-message body for a resend request.
pub type ResendLookup = Arc<
    dyn Fn(String, String) -> Pin<Box<dyn Future<Output = Option<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

// ── Wire shapes ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostCommand {
    Login {
        account_id: String,
        auth_dir: String,
        device_label: String,
        browser: String,
        version: String,
    },
    Logout {
        account_id: String,
    },
    Close {
        account_id: String,
    },
    SendText {
        request_id: String,
        account_id: String,
        to: String,
        body: String,
    },
    Presence {
        account_id: String,
        to: Option<String>,
        state: String,
    },
    PresenceSubscribe {
        account_id: String,
        peer: String,
    },
    ResendResponse {
        request_id: String,
        found: bool,
        frame: Option<serde_json::Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostMessage {
    Qr {
        account_id: String,
        qr: String,
    },
    Connected {
        account_id: String,
        me_id: String,
        phone_number: String,
    },
    Disconnected {
        account_id: String,
        cause: String,
        #[serde(default)]
        code: Option<u16>,
    },
    InboundMessage {
        account_id: String,
        frame: InboundFrame,
    },
    Ack {
        account_id: String,
        message_id: String,
        peer: String,
        level: u8,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        frame: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
    CredsUpdated {
        account_id: String,
    },
    ContactUpdate {
        account_id: String,
        lid: String,
        phone: String,
    },
    ResendRequest {
        request_id: String,
        account_id: String,
        message_id: String,
    },
    Error {
        #[serde(default)]
        account_id: Option<String>,
        error: String,
    },
}

fn map_cause(cause: &str, code: Option<u16>) -> DisconnectCause {
    match cause {
        "logged_out" => DisconnectCause::LoggedOut,
        "connection_replaced" => DisconnectCause::ConnectionReplaced,
        "restart_required" => DisconnectCause::RestartRequired,
        "connection_closed" => DisconnectCause::ConnectionClosed,
        _ => DisconnectCause::Other(code.unwrap_or(0)),
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

struct SendOutcome {
    message_id: String,
    frame: serde_json::Value,
}

struct Shared {
    writer: Mutex<Option<mpsc::Sender<HostCommand>>>,
    accounts: Mutex<HashMap<String, mpsc::Sender<SocketEvent>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<SendOutcome>>>>,
    resend_lookup: Mutex<Option<ResendLookup>>,
    next_request: AtomicU64,
}

/// Engine backed by an already-running protocol host.
pub struct SidecarEngine {
    url: String,
    shared: Arc<Shared>,
}

impl SidecarEngine {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shared: Arc::new(Shared {
                writer: Mutex::new(None),
                accounts: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                resend_lookup: Mutex::new(None),
                next_request: AtomicU64::new(1),
            }),
        }
    }

    /// Install the store-backed lookup that answers the host's resend
    /// requests. A missing entry is reported as not-found, never as an
    /// empty body.
    pub async fn set_resend_lookup(&self, lookup: ResendLookup) {
        *self.shared.resend_lookup.lock().await = Some(lookup);
    }

    async fn ensure_connected(&self) -> Result<()> {
        {
            let writer = self.shared.writer.lock().await;
            if writer.as_ref().is_some_and(|w| !w.is_closed()) {
                return Ok(());
            }
        }

        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!(url = %self.url, attempt, "connected to protocol host");
                    let (mut sink, mut source) = stream.split();

                    let (tx, mut rx) = mpsc::channel::<HostCommand>(EVENT_BUFFER);
                    tokio::spawn(async move {
                        while let Some(command) = rx.recv().await {
                            let Ok(text) = serde_json::to_string(&command) else {
                                continue;
                            };
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    });

                    let shared = Arc::clone(&self.shared);
                    let writer = tx.clone();
                    tokio::spawn(async move {
                        while let Some(message) = source.next().await {
                            match message {
                                Ok(Message::Text(text)) => {
                                    match serde_json::from_str::<HostMessage>(&text) {
                                        Ok(msg) => dispatch(&shared, &writer, msg).await,
                                        Err(err) => {
                                            warn!(error = %err, "unparseable host message")
                                        },
                                    }
                                },
                                Ok(Message::Close(_)) | Err(_) => break,
                                Ok(_) => {},
                            }
                        }
                        host_connection_lost(&shared).await;
                    });

                    *self.shared.writer.lock().await = Some(tx);
                    return Ok(());
                },
                Err(err) => {
                    debug!(url = %self.url, attempt, error = %err, "host connect failed");
                    last_error = Some(err);
                    tokio::time::sleep(CONNECT_RETRY).await;
                },
            }
        }
        bail!(
            "protocol host unreachable at {} after {CONNECT_ATTEMPTS} attempts: {:?}",
            self.url,
            last_error
        );
    }

    async fn command(&self, command: HostCommand) -> Result<()> {
        let writer = self.shared.writer.lock().await;
        let Some(writer) = writer.as_ref() else {
            bail!("protocol host connection is down");
        };
        writer
            .send(command)
            .await
            .context("protocol host writer is gone")?;
        Ok(())
    }
}

#[async_trait]
impl ProtocolEngine for SidecarEngine {
    async fn connect(
        &self,
        account_id: &str,
        auth_dir: &Path,
        fingerprint: &ClientFingerprint,
    ) -> Result<SocketSession> {
        self.ensure_connected().await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        self.shared
            .accounts
            .lock()
            .await
            .insert(account_id.to_string(), events_tx);

        self.command(HostCommand::Login {
            account_id: account_id.to_string(),
            auth_dir: auth_dir.to_string_lossy().into_owned(),
            device_label: fingerprint.device_label.clone(),
            browser: fingerprint.browser.clone(),
            version: fingerprint.version.clone(),
        })
        .await?;

        let socket = SidecarSocket {
            shared: Arc::clone(&self.shared),
            account_id: account_id.to_string(),
        };
        Ok(SocketSession {
            socket: Arc::new(socket),
            events: events_rx,
        })
    }
}

async fn dispatch(shared: &Arc<Shared>, writer: &mpsc::Sender<HostCommand>, msg: HostMessage) {
    match msg {
        HostMessage::Qr { account_id, qr } => {
            forward(shared, &account_id, SocketEvent::Qr(qr)).await;
        },
        HostMessage::Connected {
            account_id,
            me_id,
            phone_number,
        } => {
            forward(
                shared,
                &account_id,
                SocketEvent::Open {
                    me_id,
                    me_phone: phone_number,
                },
            )
            .await;
        },
        HostMessage::Disconnected {
            account_id,
            cause,
            code,
        } => {
            forward(
                shared,
                &account_id,
                SocketEvent::Closed(map_cause(&cause, code)),
            )
            .await;
        },
        HostMessage::InboundMessage { account_id, frame } => {
            forward(shared, &account_id, SocketEvent::Message(frame)).await;
        },
        HostMessage::Ack {
            account_id,
            message_id,
            peer,
            level,
        } => {
            forward(
                shared,
                &account_id,
                SocketEvent::Ack {
                    message_id,
                    peer,
                    level,
                },
            )
            .await;
        },
        HostMessage::SendResult {
            request_id,
            success,
            message_id,
            frame,
            error,
        } => {
            let Some(waiter) = shared.pending.lock().await.remove(&request_id) else {
                return;
            };
            let outcome = if success {
                match (message_id, frame) {
                    (Some(id), Some(frame)) => Ok(SendOutcome {
                        message_id: id,
                        frame,
                    }),
                    _ => Err(anyhow::anyhow!("send result missing message id or frame")),
                }
            } else {
                Err(anyhow::anyhow!(
                    error.unwrap_or_else(|| "send failed".to_string())
                ))
            };
            let _ = waiter.send(outcome);
        },
        HostMessage::CredsUpdated { account_id } => {
            forward(shared, &account_id, SocketEvent::CredsRotated).await;
        },
        HostMessage::ContactUpdate {
            account_id,
            lid,
            phone,
        } => {
            forward(shared, &account_id, SocketEvent::ContactUpdate { lid, phone }).await;
        },
        HostMessage::ResendRequest {
            request_id,
            account_id,
            message_id,
        } => {
            let lookup = shared.resend_lookup.lock().await.clone();
            let found = match lookup {
                Some(lookup) => lookup(account_id, message_id).await,
                None => None,
            };
            let _ = writer
                .send(HostCommand::ResendResponse {
                    request_id,
                    found: found.is_some(),
                    frame: found,
                })
                .await;
        },
        HostMessage::Error { account_id, error } => {
            warn!(?account_id, error, "protocol host error");
        },
    }
}

async fn forward(shared: &Arc<Shared>, account_id: &str, event: SocketEvent) {
    let sender = {
        let accounts = shared.accounts.lock().await;
        accounts.get(account_id).cloned()
    };
    match sender {
        Some(sender) => {
            if sender.send(event).await.is_err() {
                shared.accounts.lock().await.remove(account_id);
            }
        },
        None => debug!(account_id, "event for unknown account dropped"),
    }
}

/// The host went away: every account's transport is effectively closed.
async fn host_connection_lost(shared: &Arc<Shared>) {
    warn!("protocol host connection lost");
    *shared.writer.lock().await = None;

    let senders: Vec<_> = shared.accounts.lock().await.drain().collect();
    for (_, sender) in senders {
        let _ = sender
            .send(SocketEvent::Closed(DisconnectCause::ConnectionClosed))
            .await;
    }

    let pending: Vec<_> = shared.pending.lock().await.drain().collect();
    for (_, waiter) in pending {
        let _ = waiter.send(Err(anyhow::anyhow!("protocol host connection lost")));
    }
}

// ── Socket ──────────────────────────────────────────────────────────────────

struct SidecarSocket {
    shared: Arc<Shared>,
    account_id: String,
}

impl SidecarSocket {
    async fn command(&self, command: HostCommand) -> Result<()> {
        let writer = self.shared.writer.lock().await;
        let Some(writer) = writer.as_ref() else {
            bail!("protocol host connection is down");
        };
        writer
            .send(command)
            .await
            .context("protocol host writer is gone")?;
        Ok(())
    }
}

#[async_trait]
impl ProtocolSocket for SidecarSocket {
    async fn send_text(&self, to: &str, body: &str) -> Result<WireMessage> {
        let request_id = format!(
            "req-{}",
            self.shared.next_request.fetch_add(1, Ordering::SeqCst)
        );
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .await
            .insert(request_id.clone(), tx);

        self.command(HostCommand::SendText {
            request_id: request_id.clone(),
            account_id: self.account_id.clone(),
            to: to.to_string(),
            body: body.to_string(),
        })
        .await?;

        let outcome = match tokio::time::timeout(SEND_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(_)) => bail!("send result channel dropped"),
            Err(_) => {
                self.shared.pending.lock().await.remove(&request_id);
                bail!("send timed out after {}s", SEND_TIMEOUT.as_secs());
            },
        };
        Ok(WireMessage::new(outcome.message_id, outcome.frame))
    }

    async fn send_presence(&self, to: Option<&str>, presence: Presence) -> Result<()> {
        self.command(HostCommand::Presence {
            account_id: self.account_id.clone(),
            to: to.map(str::to_string),
            state: presence.as_str().to_string(),
        })
        .await
    }

    async fn subscribe_presence(&self, peer: &str) -> Result<()> {
        self.command(HostCommand::PresenceSubscribe {
            account_id: self.account_id.clone(),
            peer: peer.to_string(),
        })
        .await
    }

    async fn logout(&self) -> Result<()> {
        self.command(HostCommand::Logout {
            account_id: self.account_id.clone(),
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.command(HostCommand::Close {
            account_id: self.account_id.clone(),
        })
        .await
    }
}
