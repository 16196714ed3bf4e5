//! Scripted in-memory protocol engine.
//!
//! Each `connect` pops the next programmed event sequence and replays it on
//! the session's event channel. Sends, presence updates, and connects are
//! recorded for assertions. Tests across the workspace drive runtimes,
//! routers, and supervisors through this engine.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    tokio::sync::{Mutex, mpsc},
};

use crate::{
    socket::{Presence, ProtocolEngine, ProtocolSocket, SocketSession},
    types::{ClientFingerprint, SocketEvent, WireMessage},
};

/// One recorded `connect` call.
#[derive(Debug, Clone)]
pub struct ConnectRecord {
    pub account_id: String,
    pub auth_dir: PathBuf,
    pub fingerprint: ClientFingerprint,
}

/// One recorded outbound text.
#[derive(Debug, Clone)]
pub struct SentText {
    pub to: String,
    pub body: String,
    pub message_id: String,
}

#[derive(Default)]
struct Recordings {
    connects: Vec<ConnectRecord>,
    sent: Vec<SentText>,
    presence: Vec<(Option<String>, Presence)>,
    logouts: u64,
}

/// Engine replaying programmed scripts, one per successive connect.
pub struct ScriptedEngine {
    scripts: Mutex<VecDeque<Vec<SocketEvent>>>,
    recordings: Arc<Mutex<Recordings>>,
    senders: Mutex<Vec<mpsc::Sender<SocketEvent>>>,
    fail_sends: Arc<AtomicBool>,
    next_msg: Arc<AtomicU64>,
}

impl ScriptedEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            recordings: Arc::new(Mutex::new(Recordings::default())),
            senders: Mutex::new(Vec::new()),
            fail_sends: Arc::new(AtomicBool::new(false)),
            next_msg: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Queue the event sequence the next `connect` will replay.
    pub async fn script_connect(&self, events: Vec<SocketEvent>) {
        self.scripts.lock().await.push_back(events);
    }

    /// Make subsequent `send_text` calls fail at the transport.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Push a live event into the `n`th connection's stream (0-based).
    pub async fn push_event(&self, connect_index: usize, event: SocketEvent) -> Result<()> {
        let senders = self.senders.lock().await;
        let Some(sender) = senders.get(connect_index) else {
            bail!("no connection at index {connect_index}");
        };
        sender.send(event).await?;
        Ok(())
    }

    pub async fn connects(&self) -> Vec<ConnectRecord> {
        self.recordings.lock().await.connects.clone()
    }

    pub async fn sent(&self) -> Vec<SentText> {
        self.recordings.lock().await.sent.clone()
    }

    pub async fn presence_log(&self) -> Vec<(Option<String>, Presence)> {
        self.recordings.lock().await.presence.clone()
    }

    pub async fn logout_count(&self) -> u64 {
        self.recordings.lock().await.logouts
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolEngine for ScriptedEngine {
    async fn connect(
        &self,
        account_id: &str,
        auth_dir: &Path,
        fingerprint: &ClientFingerprint,
    ) -> Result<SocketSession> {
        self.recordings.lock().await.connects.push(ConnectRecord {
            account_id: account_id.to_string(),
            auth_dir: auth_dir.to_path_buf(),
            fingerprint: fingerprint.clone(),
        });

        let script = self.scripts.lock().await.pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(script.len().max(1) + 16);
        for event in script {
            // Capacity is sized above; a full channel is a test bug.
            tx.try_send(event)
                .map_err(|e| anyhow::anyhow!("scripted event overflow: {e}"))?;
        }
        self.senders.lock().await.push(tx);

        let socket = ScriptedSocket {
            recordings: Arc::clone(&self.recordings),
            fail_sends: Arc::clone(&self.fail_sends),
            next_msg: Arc::clone(&self.next_msg),
        };

        Ok(SocketSession {
            socket: Arc::new(socket),
            events: rx,
        })
    }
}

struct ScriptedSocket {
    recordings: Arc<Mutex<Recordings>>,
    fail_sends: Arc<AtomicBool>,
    next_msg: Arc<AtomicU64>,
}

#[async_trait]
impl ProtocolSocket for ScriptedSocket {
    async fn send_text(&self, to: &str, body: &str) -> Result<WireMessage> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("transport refused the frame");
        }

        let seq = self.next_msg.fetch_add(1, Ordering::SeqCst);
        let message_id = format!("3EB0{seq:016X}");
        self.recordings.lock().await.sent.push(SentText {
            to: to.to_string(),
            body: body.to_string(),
            message_id: message_id.clone(),
        });

        let frame = serde_json::json!({
            "key": { "remoteJid": to, "fromMe": true, "id": message_id },
            "ciphertext": format!("{seq:064x}"),
        });
        Ok(WireMessage::new(message_id, frame))
    }

    async fn send_presence(&self, to: Option<&str>, presence: Presence) -> Result<()> {
        self.recordings
            .lock()
            .await
            .presence
            .push((to.map(str::to_string), presence));
        Ok(())
    }

    async fn subscribe_presence(&self, _peer: &str) -> Result<()> {
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.recordings.lock().await.logouts += 1;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_and_records_sends() {
        let engine = ScriptedEngine::new();
        engine
            .script_connect(vec![
                SocketEvent::Qr("pairing-payload".into()),
                SocketEvent::Open {
                    me_id: "111:2@s".into(),
                    me_phone: "111".into(),
                },
            ])
            .await;

        let fingerprint = ClientFingerprint {
            device_label: "Desktop".into(),
            browser: "Chrome".into(),
            version: "120.0".into(),
        };
        let mut session = engine
            .connect("acc-1", Path::new("/tmp/a"), &fingerprint)
            .await
            .unwrap();

        assert!(matches!(
            session.events.recv().await,
            Some(SocketEvent::Qr(_))
        ));
        assert!(matches!(
            session.events.recv().await,
            Some(SocketEvent::Open { .. })
        ));

        let wire = session.socket.send_text("919", "hi").await.unwrap();
        assert!(wire.id().starts_with("3EB0"));

        let sent = engine.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "919");
        assert_eq!(engine.connects().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_sends_bail() {
        let engine = ScriptedEngine::new();
        engine.script_connect(vec![]).await;
        let fingerprint = ClientFingerprint {
            device_label: "d".into(),
            browser: "b".into(),
            version: "v".into(),
        };
        let session = engine
            .connect("acc", Path::new("/tmp/x"), &fingerprint)
            .await
            .unwrap();

        engine.fail_sends(true);
        assert!(session.socket.send_text("1", "x").await.is_err());
        assert!(engine.sent().await.is_empty());
    }
}
