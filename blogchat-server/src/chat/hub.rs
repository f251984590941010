use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use axum::extract::ws::Utf8Bytes;
use metrics::{counter, gauge};
use shared::{
    config::server::ChatConfig,
    models::{ChatMessage, FramePayload, KickNotice, ServerFrame, UserInfo},
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, RwLock, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::ChatStore;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("chat hub is not running")]
    Closed,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

const STATE_LIVE: u8 = 1;
const STATE_CLOSING: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// Identity of one WebSocket peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: Uuid,
    pub user_id: Option<i64>,
    pub username: String,
    pub avatar: String,
    pub ip: String,
    pub role: Option<String>,
}

impl ClientInfo {
    pub fn is_admin(&self) -> bool {
        matches!(self.role.as_deref(), Some("admin" | "super_admin"))
    }

    pub fn user_info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// What a registered client keeps: its identity, the receiving half of its
/// outbound queue and the token that ends its loops.
#[derive(Debug)]
pub struct Connection {
    pub info: ClientInfo,
    pub outbound: mpsc::Receiver<Utf8Bytes>,
    pub token: CancellationToken,
}

#[derive(Debug)]
struct ClientEntry {
    info: ClientInfo,
    // The hub holds the only sender; dropping the entry closes the queue.
    sender: mpsc::Sender<Utf8Bytes>,
    state: AtomicU8,
    token: CancellationToken,
}

impl ClientEntry {
    fn is_live(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_LIVE
    }

    fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.token.cancel();
    }
}

#[derive(Debug)]
struct Registration {
    entry: ClientEntry,
    history: Vec<ChatMessage>,
    ack: oneshot::Sender<()>,
}

fn encode(frame: &ServerFrame) -> Result<Utf8Bytes, HubError> {
    Ok(Utf8Bytes::from(serde_json::to_string(frame)?))
}

fn encode_logged(frame: &ServerFrame) -> Option<Utf8Bytes> {
    encode(frame)
        .inspect_err(|err| warn!(kind = frame.kind(), error = %err, "dropping frame"))
        .ok()
}

fn dedup_users<'a>(entries: impl Iterator<Item = &'a ClientEntry>) -> Vec<UserInfo> {
    #[derive(PartialEq, Eq, Hash)]
    enum Person {
        Account(i64),
        Guest(String),
    }

    let mut seen = HashSet::new();
    let mut users: Vec<UserInfo> = entries
        .filter(|entry| {
            let person = match entry.info.user_id {
                Some(id) => Person::Account(id),
                None => Person::Guest(entry.info.username.clone()),
            };
            seen.insert(person)
        })
        .map(|entry| entry.info.user_info())
        .collect();
    users.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
    users
}

/// State touched by the event loop and by read queries.
#[derive(Debug)]
struct Registry {
    clients: RwLock<HashMap<Uuid, ClientEntry>>,
}

impl Registry {
    async fn insert(&self, registration: Registration) {
        let Registration {
            entry,
            history,
            ack,
        } = registration;
        let joined = entry.info.user_info();
        let history = ServerFrame::now(FramePayload::History(history));

        {
            let mut clients = self.clients.write().await;
            clients.insert(joined.id, entry);
            let roster = ServerFrame::now(FramePayload::UserList(dedup_users(clients.values())));

            if let Some(entry) = clients.get(&joined.id) {
                for frame in [&history, &roster] {
                    if let Some(payload) = encode_logged(frame) {
                        if entry.sender.try_send(payload).is_err() {
                            warn!(client_id = %joined.id, kind = frame.kind(), "new client queue rejected frame");
                        }
                    }
                }
            }
            gauge!("blogchat_hub_live_clients").set(clients.len() as f64);
        }

        let _ = ack.send(());
        info!(client_id = %joined.id, username = %joined.username, "client joined");
        if let Some(payload) = encode_logged(&ServerFrame::now(FramePayload::UserJoin(joined))) {
            self.fan_out(payload).await;
        }
    }

    async fn remove(&self, id: Uuid) {
        let removed = {
            let mut clients = self.clients.write().await;
            let removed = clients.remove(&id);
            gauge!("blogchat_hub_live_clients").set(clients.len() as f64);
            removed
        };

        let Some(entry) = removed else {
            debug!(client_id = %id, "client already unregistered");
            return;
        };
        entry.close();
        info!(client_id = %id, username = %entry.info.username, "client left");
        if let Some(payload) =
            encode_logged(&ServerFrame::now(FramePayload::UserLeave(entry.info.user_info())))
        {
            self.fan_out(payload).await;
        }
    }

    /// Delivers `payload` to every live queue. Clients whose queue is full or
    /// closed are dropped and the rest are told they left.
    async fn fan_out(&self, payload: Utf8Bytes) {
        let mut pending = VecDeque::from([payload]);

        while let Some(payload) = pending.pop_front() {
            let dropped: Vec<ClientEntry> = {
                let mut clients = self.clients.write().await;
                let stale: Vec<Uuid> = clients
                    .iter()
                    .filter(|(_, entry)| entry.sender.try_send(payload.clone()).is_err())
                    .map(|(id, _)| *id)
                    .collect();
                let dropped: Vec<ClientEntry> = stale
                    .iter()
                    .filter_map(|id| clients.remove(id))
                    .collect();
                gauge!("blogchat_hub_live_clients").set(clients.len() as f64);
                dropped
            };
            counter!("blogchat_hub_broadcasts_total").increment(1);

            for entry in dropped {
                entry.close();
                warn!(client_id = %entry.info.id, username = %entry.info.username, "dropping slow client");
                counter!("blogchat_hub_dropped_clients_total").increment(1);
                if let Some(leave) =
                    encode_logged(&ServerFrame::now(FramePayload::UserLeave(entry.info.user_info())))
                {
                    pending.push_back(leave);
                }
            }
        }
    }

    async fn clear(&self) {
        let mut clients = self.clients.write().await;
        for entry in clients.values() {
            entry.close();
        }
        clients.clear();
        gauge!("blogchat_hub_live_clients").set(0.0);
    }
}

/// Single-process chat coordinator.
///
/// One task owns every membership change and broadcast, so all of them are
/// totally ordered. Read queries take the registry's read lock directly.
pub struct Hub {
    registry: Arc<Registry>,
    store: Arc<dyn ChatStore>,
    config: ChatConfig,
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<Uuid>,
    broadcast_tx: mpsc::Sender<Utf8Bytes>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("running", &!self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Spawns the event loop and returns the handle used by everything else.
    pub fn start(config: ChatConfig, store: Arc<dyn ChatStore>) -> Arc<Self> {
        let registry = Arc::new(Registry {
            clients: RwLock::new(HashMap::new()),
        });
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_loop(
            registry.clone(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            shutdown.clone(),
        ));

        Arc::new(Self {
            registry,
            store,
            config,
            register_tx,
            unregister_tx,
            broadcast_tx,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Registers a client and returns once the hub has inserted it.
    ///
    /// History is loaded before the request is queued, so the history frame
    /// is the first thing in the new queue. A history failure is logged and
    /// the client joins with an empty replay.
    pub async fn register(&self, info: ClientInfo) -> Result<Connection, HubError> {
        let history = match self.store.recent_chat(self.config.history_limit).await {
            Ok(messages) => messages
                .into_iter()
                .map(|message| ChatMessage {
                    client_id: None,
                    ..message.redacted()
                })
                .collect(),
            Err(err) => {
                warn!(client_id = %info.id, error = %err, "history replay unavailable");
                Vec::new()
            }
        };

        let (sender, outbound) = mpsc::channel(self.config.send_queue_capacity.max(2));
        let token = self.shutdown.child_token();
        let (ack, acked) = oneshot::channel();
        let registration = Registration {
            entry: ClientEntry {
                info: info.clone(),
                sender,
                state: AtomicU8::new(STATE_LIVE),
                token: token.clone(),
            },
            history,
            ack,
        };

        self.register_tx
            .send(registration)
            .await
            .map_err(|_| HubError::Closed)?;
        acked.await.map_err(|_| HubError::Closed)?;

        Ok(Connection {
            info,
            outbound,
            token,
        })
    }

    /// Requests removal of `id`. Repeated requests are harmless.
    pub fn unregister(&self, id: Uuid) {
        if self.unregister_tx.send(id).is_err() {
            debug!(client_id = %id, "unregister after hub shutdown");
        }
    }

    /// Queues `payload` for every live client, waiting for broadcast capacity.
    pub async fn broadcast(&self, payload: Utf8Bytes) -> Result<(), HubError> {
        self.check_size(payload.len())?;
        self.broadcast_tx
            .send(payload)
            .await
            .map_err(|_| HubError::Closed)
    }

    pub async fn broadcast_frame(&self, frame: &ServerFrame) -> Result<(), HubError> {
        self.broadcast(encode(frame)?).await
    }

    /// Fails with [`HubError::PayloadTooLarge`] when `frame` would be refused
    /// by [`Hub::broadcast`]. Lets callers validate before persisting.
    pub fn ensure_fits(&self, frame: &ServerFrame) -> Result<(), HubError> {
        self.check_size(encode(frame)?.len())
    }

    fn check_size(&self, size: usize) -> Result<(), HubError> {
        let limit = self.config.max_frame_bytes;
        if size > limit {
            return Err(HubError::PayloadTooLarge { size, limit });
        }
        Ok(())
    }

    /// Private, non-blocking delivery to one live client. Returns whether the
    /// frame was queued.
    pub async fn send_to(&self, id: Uuid, frame: &ServerFrame) -> Result<bool, HubError> {
        let payload = encode(frame)?;
        let clients = self.registry.clients.read().await;
        Ok(clients
            .get(&id)
            .filter(|entry| entry.is_live())
            .is_some_and(|entry| entry.sender.try_send(payload).is_ok()))
    }

    /// Sends a kick notice to a live client and closes it after the grace
    /// period. Returns `false` for unknown or already closing clients.
    pub async fn kick(&self, id: Uuid, reason: &str) -> bool {
        let clients = self.registry.clients.read().await;
        let Some(entry) = clients.get(&id) else {
            return false;
        };
        if entry
            .state
            .compare_exchange(STATE_LIVE, STATE_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let notice = ServerFrame::now(FramePayload::Kick(KickNotice {
            reason: reason.to_string(),
        }));
        if let Some(payload) = encode_logged(&notice) {
            let _ = entry.sender.try_send(payload);
        }

        let token = entry.token.clone();
        let grace = self.config.kick_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            token.cancel();
        });

        counter!("blogchat_hub_kicks_total").increment(1);
        info!(client_id = %id, username = %entry.info.username, reason, "client kicked");
        true
    }

    /// Number of distinct people online.
    pub async fn online_count(&self) -> usize {
        self.online_users().await.len()
    }

    /// Online people, one entry per account or guest name.
    pub async fn online_users(&self) -> Vec<UserInfo> {
        let clients = self.registry.clients.read().await;
        dedup_users(clients.values())
    }

    pub async fn get_client(&self, id: Uuid) -> Option<ClientInfo> {
        self.registry
            .clients
            .read()
            .await
            .get(&id)
            .map(|entry| entry.info.clone())
    }

    /// Stops the loop, closes every queue and waits for the loop to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "chat hub task ended abnormally");
            }
        }
    }
}

async fn run_loop(
    registry: Arc<Registry>,
    mut register_rx: mpsc::Receiver<Registration>,
    mut unregister_rx: mpsc::UnboundedReceiver<Uuid>,
    mut broadcast_rx: mpsc::Receiver<Utf8Bytes>,
    shutdown: CancellationToken,
) {
    debug!("chat hub started");
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            Some(registration) = register_rx.recv() => registry.insert(registration).await,
            // Departures first, so a busy room cannot hold closed queues open.
            Some(id) = unregister_rx.recv() => registry.remove(id).await,
            Some(payload) = broadcast_rx.recv() => registry.fan_out(payload).await,
            else => break,
        }
    }
    registry.clear().await;
    info!("chat hub stopped");
}
