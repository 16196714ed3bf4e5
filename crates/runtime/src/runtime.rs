//! One account's connection lifecycle and its outbound send path.

use std::sync::{Arc, RwLock as StdRwLock};

use {
    tokio::{
        sync::{Mutex, RwLock, broadcast, watch},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use {
    wiregate_common::{AccountStatus, GatewayError, Result},
    wiregate_pacer::{derive_fingerprint, typing_plan},
    wiregate_protocol::{
        DisconnectCause, Presence, ProtocolSocket, SocketEvent, SocketSession, WireMessage,
        direct_chat_address,
    },
    wiregate_store::Direction,
    wiregate_vault::{DebouncedSaver, RestoreOutcome, saver::SaveFn},
};

use crate::{
    events::RuntimeEvent,
    reconnect::{Plan, ReconnectPolicy},
    services::Services,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle manager for a single account.
pub struct AccountRuntime {
    account_id: String,
    services: Arc<Services>,
    status: StdRwLock<AccountStatus>,
    qr_url: StdRwLock<Option<String>>,
    me_phone: StdRwLock<Option<String>>,
    socket: RwLock<Option<Arc<dyn ProtocolSocket>>>,
    saver: DebouncedSaver,
    /// Outbound FIFO: one caller at a time per account, in call order.
    send_lock: Mutex<()>,
    shutdown: watch::Receiver<bool>,
    events_tx: broadcast::Sender<RuntimeEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
    presence_task: Mutex<Option<JoinHandle<()>>>,
}

impl AccountRuntime {
    #[must_use]
    pub fn new(
        account_id: String,
        services: Arc<Services>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let vault = services.vault.clone();
        let saver_account = account_id.clone();
        let save_fn: SaveFn = Arc::new(move || {
            let vault = vault.clone();
            let account_id = saver_account.clone();
            Box::pin(async move {
                vault.save(&account_id).await?;
                Ok(())
            })
        });
        let saver = DebouncedSaver::spawn(
            save_fn,
            std::time::Duration::from_secs(services.config.supervisor.debounce_quiet_secs),
            std::time::Duration::from_secs(services.config.supervisor.debounce_floor_secs),
        );

        Arc::new(Self {
            account_id,
            services,
            status: StdRwLock::new(AccountStatus::Initializing),
            qr_url: StdRwLock::new(None),
            me_phone: StdRwLock::new(None),
            socket: RwLock::new(None),
            saver,
            send_lock: Mutex::new(()),
            shutdown,
            events_tx,
            task: Mutex::new(None),
            presence_task: Mutex::new(None),
        })
    }

    // ── Observers ───────────────────────────────────────────────────────

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events_tx.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> AccountStatus {
        *self
            .status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The current pairing QR as a data URL, while one is on offer.
    #[must_use]
    pub fn qr_code(&self) -> Option<String> {
        self.qr_url
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    #[must_use]
    pub fn phone(&self) -> Option<String> {
        self.me_phone
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Restore auth state and start the connection loop.
    ///
    /// Refuses without opening a socket when another live instance owns the
    /// account.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let outcome = match self.services.vault.restore(&self.account_id).await {
            Ok(outcome) => outcome,
            Err(GatewayError::LockedByOtherInstance) => {
                self.set_status(AccountStatus::Error).await;
                return Err(GatewayError::LockedByOtherInstance);
            },
            Err(err) => {
                self.set_status(AccountStatus::Error).await;
                return Err(err);
            },
        };

        if outcome == RestoreOutcome::NeedsPairing {
            self.set_status(AccountStatus::NeedsQr).await;
        }

        let runtime = Arc::clone(self);
        let pairing = outcome == RestoreOutcome::NeedsPairing;
        let handle = tokio::spawn(async move {
            runtime.connection_loop(pairing).await;
        });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Force-flush the auth blob (shutdown, periodic sync).
    pub async fn flush_auth(&self) -> anyhow::Result<()> {
        self.saver.force_save().await
    }

    /// Queue a debounced auth save.
    pub fn request_auth_save(&self) {
        self.saver.request_save();
    }

    /// Log the account out remotely. The transport close that follows clears
    /// auth state through the normal lifecycle path.
    pub async fn logout(&self) -> Result<()> {
        let socket = self.socket.read().await.clone();
        let Some(socket) = socket else {
            return Err(GatewayError::protocol("account is not connected"));
        };
        socket
            .logout()
            .await
            .map_err(|e| GatewayError::protocol(format!("logout failed: {e}")))
    }

    /// Tear the runtime down without touching persisted auth.
    pub async fn stop(&self) {
        if let Some(handle) = self.presence_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        if let Some(socket) = self.socket.write().await.take() {
            let _ = socket.close().await;
        }
        self.saver.stop().await;
    }

    async fn connection_loop(self: Arc<Self>, mut pairing: bool) {
        let mut policy = ReconnectPolicy::new();
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let fingerprint = derive_fingerprint(&self.account_id);
            let auth_dir = self.services.vault.auth_dir(&self.account_id);
            let session = match self
                .services
                .engine
                .connect(&self.account_id, &auth_dir, &fingerprint)
                .await
            {
                Ok(session) => session,
                Err(err) => {
                    warn!(account_id = %self.account_id, error = %err, "socket open failed");
                    match policy.plan(DisconnectCause::ConnectionClosed, pairing) {
                        Plan::Retry { delay, .. } => {
                            if !self.sleep_or_shutdown(delay, &mut shutdown).await {
                                break;
                            }
                            continue;
                        },
                        _ => break,
                    }
                },
            };

            *self.socket.write().await = Some(Arc::clone(&session.socket));
            let cause = self
                .pump_events(session, &mut policy, &mut pairing, &mut shutdown)
                .await;
            let socket = self.socket.write().await.take();

            let Some(cause) = cause else {
                // Shutdown observed inside the pump.
                if let Some(socket) = socket {
                    let _ = socket.close().await;
                }
                break;
            };

            match policy.plan(cause, pairing) {
                Plan::Logout => {
                    info!(account_id = %self.account_id, "logged out, clearing auth state");
                    if let Err(err) = self.services.vault.clear(&self.account_id).await {
                        warn!(account_id = %self.account_id, error = %err, "auth clear failed");
                    }
                    self.set_status(AccountStatus::NeedsQr).await;
                    self.emit(RuntimeEvent::Disconnected {
                        reason: "logged_out".to_string(),
                    });
                    break;
                },
                Plan::GiveUp { reason } => {
                    warn!(account_id = %self.account_id, reason, "reconnect budget exhausted");
                    self.set_status(AccountStatus::Disconnected).await;
                    self.emit(RuntimeEvent::Disconnected { reason });
                    break;
                },
                Plan::Retry { delay, .. } => {
                    debug!(
                        account_id = %self.account_id,
                        delay_secs = delay.as_secs(),
                        ?cause,
                        "reconnecting after close"
                    );
                    if !pairing {
                        self.set_status(AccountStatus::Reconnecting).await;
                    }
                    if !self.sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                },
            }
        }
    }

    /// Drive one socket session. Returns the close cause, or `None` when the
    /// shutdown signal ended the session.
    async fn pump_events(
        self: &Arc<Self>,
        mut session: SocketSession,
        policy: &mut ReconnectPolicy,
        pairing: &mut bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<DisconnectCause> {
        loop {
            let event = tokio::select! {
                event = session.events.recv() => event,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                    continue;
                },
            };

            let Some(event) = event else {
                // Library dropped the stream without a close event.
                return Some(DisconnectCause::ConnectionClosed);
            };

            match event {
                SocketEvent::Qr(payload) => {
                    *pairing = true;
                    match crate::qr::to_data_url(&payload) {
                        Ok(data_url) => {
                            *self
                                .qr_url
                                .write()
                                .unwrap_or_else(|poisoned| poisoned.into_inner()) =
                                Some(data_url.clone());
                            self.set_status(AccountStatus::QrReady).await;
                            self.emit(RuntimeEvent::Qr { data_url });
                        },
                        Err(err) => warn!(account_id = %self.account_id, error = %err, "QR render failed"),
                    }
                },

                SocketEvent::Open { me_id, me_phone } => {
                    self.handle_ready(&me_id, &me_phone, policy, pairing).await;
                },

                SocketEvent::Closed(cause) => return Some(cause),

                SocketEvent::Message(frame) => {
                    self.handle_inbound(&frame).await;
                },

                SocketEvent::Ack {
                    message_id,
                    peer,
                    level,
                } => {
                    self.services
                        .router
                        .route_ack(&self.account_id, &message_id, &peer, level)
                        .await;
                    if let Some(ack) = wiregate_common::AckLevel::from_code(level) {
                        let event = wiregate_common::MessageAckEvent::new(
                            &self.account_id,
                            &message_id,
                            &peer,
                            ack,
                        );
                        self.emit(RuntimeEvent::MessageAck(event));
                    }
                },

                SocketEvent::CredsRotated => {
                    // Rate-key rotation invalidates the stored blob; persist
                    // the new material promptly.
                    if let Err(err) = self.saver.force_save().await {
                        warn!(account_id = %self.account_id, error = %err, "save after creds rotation failed");
                    }
                },

                SocketEvent::ContactUpdate { lid, phone } => {
                    self.services.router.observe_contact(&lid, &phone);
                },
            }
        }
    }

    async fn handle_ready(
        self: &Arc<Self>,
        me_id: &str,
        me_phone: &str,
        policy: &mut ReconnectPolicy,
        pairing: &mut bool,
    ) {
        if me_id.is_empty() {
            warn!(account_id = %self.account_id, "open event without an identity, ignoring");
            return;
        }

        info!(account_id = %self.account_id, phone = me_phone, "account ready");
        *pairing = false;
        policy.reset();

        *self
            .qr_url
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        *self
            .me_phone
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(me_phone.to_string());

        self.set_status(AccountStatus::Ready).await;
        if let Err(err) = self
            .services
            .accounts
            .set_phone_once(&self.account_id, me_phone)
            .await
        {
            warn!(account_id = %self.account_id, error = %err, "phone id persist failed");
        }

        // Stabilization save: local auth state becomes authoritative now,
        // and signal-key finalization depends on this snapshot existing.
        if let Err(err) = self.saver.force_save().await {
            error!(account_id = %self.account_id, error = %err, "stabilization save failed");
        }

        self.emit(RuntimeEvent::Ready {
            phone: me_phone.to_string(),
        });

        self.spawn_presence_task().await;
    }

    async fn handle_inbound(&self, frame: &wiregate_protocol::InboundFrame) {
        // Every inbound message is retained for resend callbacks, as the
        // library delivered it.
        match serde_json::to_value(frame) {
            Ok(body) => {
                let wire = WireMessage::new(frame.key.id.clone(), body);
                let peer = wiregate_router::normalize::phone_digits(&frame.key.chat_id);
                self.services
                    .msgcache
                    .insert(&self.account_id, Direction::In, &peer, &wire);
            },
            Err(err) => warn!(account_id = %self.account_id, error = %err, "inbound frame not serializable"),
        }

        let me = self.phone().unwrap_or_default();
        if let Some(event) = self
            .services
            .router
            .route_frame(&self.account_id, &me, frame)
            .await
        {
            self.emit(RuntimeEvent::MessageIn(event));
        }
    }

    /// First presence nudge 30–60s after Ready, then every 30–60 minutes,
    /// independently jittered. Never synchronized across accounts.
    async fn spawn_presence_task(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let mut shutdown = self.shutdown.clone();
        let initial = wiregate_pacer::stagger::reconnect_jitter(30, 60);
        let (min, max) = (
            self.services.config.supervisor.presence_refresh_min_secs,
            self.services.config.supervisor.presence_refresh_max_secs,
        );

        let handle = tokio::spawn(async move {
            let mut delay = initial;
            loop {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {},
                    _ = shutdown.changed() => return,
                }
                if *shutdown.borrow() {
                    return;
                }

                let socket = runtime.socket.read().await.clone();
                let Some(socket) = socket else { return };
                if let Err(err) = socket.send_presence(None, Presence::Available).await {
                    debug!(account_id = %runtime.account_id, error = %err, "presence refresh failed");
                }
                delay = wiregate_pacer::stagger::presence_refresh_delay(
                    std::time::Duration::from_secs(min),
                    std::time::Duration::from_secs(max),
                );
            }
        });

        let mut slot = self.presence_task.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(handle);
    }

    // ── Outbound ────────────────────────────────────────────────────────

    /// Send a text message. Suspends until the pacer admits it and the
    /// transport acknowledges the frame; rejections surface with their kind.
    pub async fn send_text(&self, to_digits: &str, body: &str) -> Result<String> {
        let _fifo = self.send_lock.lock().await;

        match self.status() {
            AccountStatus::Ready => {},
            AccountStatus::Initializing | AccountStatus::QrReady | AccountStatus::NeedsQr => {
                return Err(GatewayError::NeedsQr);
            },
            _ => return Err(GatewayError::protocol("account is not connected")),
        }
        let socket = self
            .socket
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::protocol("account is not connected"))?;

        self.services
            .duplicates
            .check_and_record(&self.account_id, to_digits, body)?;

        let mut shutdown = self.shutdown.clone();
        self.services
            .pacer
            .admit(&self.account_id, &mut shutdown)
            .await?;

        let address = direct_chat_address(to_digits);
        self.simulate_typing(&socket, &address, body.len(), &mut shutdown)
            .await?;

        let wire = socket
            .send_text(&address, body)
            .await
            .map_err(|e| GatewayError::protocol(format!("send failed: {e}")))?;

        // Store the post-send frame (the ciphertext the network will ask
        // for), not the caller's input.
        self.services
            .msgcache
            .insert(&self.account_id, Direction::Out, to_digits, &wire);
        self.services.pacer.record_send(&self.account_id);

        debug!(account_id = %self.account_id, message_id = wire.id(), "message sent");
        Ok(wire.id().to_string())
    }

    /// Presence errors are swallowed; only shutdown aborts the send.
    async fn simulate_typing(
        &self,
        socket: &Arc<dyn ProtocolSocket>,
        address: &str,
        body_len: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        if let Err(err) = socket.subscribe_presence(address).await {
            debug!(account_id = %self.account_id, error = %err, "presence subscribe failed");
        }
        if let Err(err) = socket.send_presence(Some(address), Presence::Composing).await {
            debug!(account_id = %self.account_id, error = %err, "composing update failed");
        }

        let pause = typing_plan(body_len);
        tokio::select! {
            () = tokio::time::sleep(pause) => {},
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Err(GatewayError::Shutdown);
                }
            },
        }

        if let Err(err) = socket.send_presence(Some(address), Presence::Paused).await {
            debug!(account_id = %self.account_id, error = %err, "paused update failed");
        }
        Ok(())
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn set_status(&self, status: AccountStatus) {
        *self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
        if let Err(err) = self
            .services
            .accounts
            .update_status(&self.account_id, status)
            .await
        {
            warn!(account_id = %self.account_id, error = %err, "status persist failed");
        }
    }

    fn emit(&self, event: RuntimeEvent) {
        let _ = self.events_tx.send(event);
    }

    async fn sleep_or_shutdown(
        &self,
        delay: std::time::Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        }
    }
}
