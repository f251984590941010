use std::{fmt::Display, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::ws::{Message, Utf8Bytes, WebSocket},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use shared::{
    config::server::ChatConfig,
    models::{ChatMessage, ClientFrame, FramePayload, NewChatMessage, ServerFrame, SystemPayload},
};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::hub::{ClientInfo, Connection, Hub};
use crate::store::Stores;

pub const MUTED_NOTICE: &str = "The chat room is muted by a moderator";

/// Socket deadlines and limits for one connection.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
    pub max_message_chars: usize,
}

impl PumpSettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            write_timeout: config.write_timeout(),
            max_message_chars: config.max_message_chars,
        }
    }
}

/// Runs an accepted socket until either side ends it.
pub async fn serve(socket: WebSocket, info: ClientInfo, hub: Arc<Hub>, stores: Stores) {
    let settings = PumpSettings::from_config(hub.config());
    let client_id = info.id;
    let Connection {
        info,
        outbound,
        token,
    } = match hub.register(info).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(%client_id, error = %err, "could not register client");
            return;
        }
    };

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(sink, outbound, token.clone(), settings));
    read_pump(stream, &info, &token, &hub, &stores, settings).await;

    if let Err(err) = writer.await {
        warn!(%client_id, error = %err, "write loop ended abnormally");
    }
}

/// Reads frames until the peer leaves, the read deadline passes or the
/// client's token is cancelled, then asks the hub to unregister it.
pub async fn read_pump<S, E>(
    mut stream: S,
    info: &ClientInfo,
    token: &CancellationToken,
    hub: &Hub,
    stores: &Stores,
    settings: PumpSettings,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + settings.pong_timeout;

    loop {
        let next = tokio::select! {
            () = token.cancelled() => break,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        match next {
            Err(_) => {
                debug!(client_id = %info.id, "read deadline passed");
                break;
            }
            Ok(None | Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(err))) => {
                debug!(client_id = %info.id, error = %err, "socket read failed");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                handle_text(text.as_str(), info, hub, stores, settings).await;
            }
            Ok(Some(Ok(Message::Pong(_)))) => {
                deadline = Instant::now() + settings.pong_timeout;
            }
            Ok(Some(Ok(_))) => {}
        }
    }

    hub.unregister(info.id);
}

async fn handle_text(
    text: &str,
    info: &ClientInfo,
    hub: &Hub,
    stores: &Stores,
    settings: PumpSettings,
) {
    let Ok(ClientFrame::Message { content }) = serde_json::from_str::<ClientFrame>(text) else {
        debug!(client_id = %info.id, "ignoring unrecognised frame");
        return;
    };
    let content = content.trim();
    if content.is_empty() || content.chars().count() > settings.max_message_chars {
        debug!(client_id = %info.id, "dropping empty or oversized message");
        return;
    }

    if !info.is_admin() && is_muted(stores).await {
        let notice = ServerFrame::now(FramePayload::System(SystemPayload::Notice {
            message: MUTED_NOTICE.to_string(),
        }));
        if let Err(err) = hub.send_to(info.id, &notice).await {
            warn!(client_id = %info.id, error = %err, "could not send mute notice");
        }
        return;
    }

    let stored = match stores
        .chat
        .append(NewChatMessage::user_message(
            content,
            info.user_id,
            info.username.clone(),
            info.avatar.clone(),
            Some(info.ip.clone()),
        ))
        .await
    {
        Ok(stored) => stored,
        Err(err) => {
            warn!(client_id = %info.id, error = %err, "failed to persist message");
            return;
        }
    };
    counter!("blogchat_messages_persisted_total").increment(1);

    let frame = ServerFrame::now(FramePayload::Message(ChatMessage {
        client_id: Some(info.id),
        ..stored.redacted()
    }));
    if let Err(err) = hub.broadcast_frame(&frame).await {
        warn!(client_id = %info.id, error = %err, "failed to broadcast message");
    }
}

async fn is_muted(stores: &Stores) -> bool {
    match stores.settings.chat_settings().await {
        Ok(settings) => settings.mute_all,
        Err(err) => {
            warn!(error = %err, "could not read chat settings");
            false
        }
    }
}

/// Writes queued frames, batching whatever is already waiting into one text
/// frame separated by `\n`, and pings on an interval. Sends a close frame
/// when the queue closes or the token is cancelled.
pub async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    token: CancellationToken,
    settings: PumpSettings,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );

    loop {
        let message = tokio::select! {
            biased;
            () = token.cancelled() => None,
            next = outbound.recv() => next.map(|first| Message::Text(drain_batch(first, &mut outbound))),
            _ = ping.tick() => Some(Message::Ping(Bytes::new())),
        };

        let Some(message) = message else {
            let _ = write(&mut sink, Message::Close(None), settings.write_timeout).await;
            return;
        };
        if !write(&mut sink, message, settings.write_timeout).await {
            token.cancel();
            return;
        }
    }
}

fn drain_batch(first: Utf8Bytes, outbound: &mut mpsc::Receiver<Utf8Bytes>) -> Utf8Bytes {
    let Ok(second) = outbound.try_recv() else {
        return first;
    };

    let mut batch = String::from(first.as_str());
    batch.push('\n');
    batch.push_str(second.as_str());
    while let Ok(next) = outbound.try_recv() {
        batch.push('\n');
        batch.push_str(next.as_str());
    }
    Utf8Bytes::from(batch)
}

async fn write<S>(sink: &mut S, message: Message, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(error = %err, "socket write failed");
            false
        }
        Err(_) => {
            debug!("socket write timed out");
            false
        }
    }
}
