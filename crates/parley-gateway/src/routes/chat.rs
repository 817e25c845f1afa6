// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: MIT
//! Chat endpoints: synchronous, SSE streaming, WebSocket, async enqueue,
//! and the pub/sub subscribe relay.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_core::{CallType, ChatOptions};
use parley_jobs::stream_channel;
use parley_store::{CurrentUser, Message, MessageStore, NewMessage, ThreadStore};

use crate::{
    auth::{verify_token, AuthUser},
    error::{ApiError, ApiResult},
    sse::{content_frame, done_frame, error_frame, is_terminal},
    state::AppContext,
};

/// Idle limit on the subscribe relay.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    pub temperature: Option<f32>,
    pub memory_strategy: Option<String>,
    pub memory_n: Option<u64>,
    #[serde(default)]
    pub stick_to_facts: bool,
    #[serde(default)]
    pub objective_responses: bool,
}

impl ChatBody {
    fn options(&self, call_type: CallType) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature,
            memory_strategy: self.memory_strategy.clone(),
            memory_n: self.memory_n,
            stick_to_facts: self.stick_to_facts,
            objective_responses: self.objective_responses,
            call_type,
            user_message_persisted: false,
        }
    }

    fn options_json(&self) -> Value {
        json!({
            "temperature": self.temperature,
            "memory_strategy": self.memory_strategy,
            "memory_n": self.memory_n,
            "stick_to_facts": self.stick_to_facts,
            "objective_responses": self.objective_responses,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AsyncQuery {
    #[serde(default)]
    pub async_processing: bool,
}

fn validate(body: &ChatBody) -> ApiResult<()> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    Ok(())
}

/// Enqueue an async chat turn.  The user message is persisted FIRST so
/// polling clients see it immediately; a failed enqueue rolls it back so
/// no orphan message survives.
async fn enqueue_chat(
    ctx: &AppContext,
    user: &CurrentUser,
    thread_id: &str,
    body: &ChatBody,
    stream: bool,
) -> ApiResult<Json<Value>> {
    let Some(jobs) = &ctx.jobs else {
        return Err(ApiError::Unavailable(
            "Async processing not available. Set async_processing=false or configure Redis."
                .into(),
        ));
    };

    let saved = MessageStore::new(&ctx.pool)
        .append(NewMessage::text(thread_id, "user", &body.message))
        .await?;

    let payload = json!({
        "thread_id": thread_id,
        "message": body.message,
        "message_id": saved.id,
        "user_id": user.id,
        "user_role": user.role,
        "stream": stream,
        "options": body.options_json(),
    });
    let job = match jobs.enqueue("chat_response", payload, Some(&user.id), None).await {
        Ok(job) => job,
        Err(e) => {
            // Roll back so a message the worker will never answer does not
            // linger in the thread.
            let _ = MessageStore::new(&ctx.pool).delete(&saved.id).await;
            return Err(e.into());
        }
    };

    Ok(Json(json!({
        "status": "pending",
        "job_id": job.id,
        "thread_id": thread_id,
        "message_id": saved.id,
        "stream_channel": stream.then(|| stream_channel(thread_id, &saved.id)),
        "poll_url": format!("/jobs/{}", job.id),
    })))
}

fn message_json(message: &Message) -> Value {
    json!({
        "id": message.id,
        "thread_id": message.thread_id,
        "role": message.role,
        "content": message.content,
        "tool_calls": message.tool_calls,
        "metadata": message.metadata,
        "created_at": message.created_at,
    })
}

/// `POST /chat/{thread_id}` — full reply in one response.
pub async fn chat(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(thread_id): Path<String>,
    Query(query): Query<AsyncQuery>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<Value>> {
    validate(&body)?;

    if query.async_processing {
        // Scope check up front: the worker runs later, the 404 must not.
        ThreadStore::new(&ctx.pool)
            .get(&thread_id, &user)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("thread not found: {thread_id}")))?;
        return enqueue_chat(&ctx, &user, &thread_id, &body, false).await;
    }

    let tracker = ctx.tracker_for(&thread_id);
    let outcome = ctx
        .runtime
        .chat(&thread_id, &user, &body.message, body.options(CallType::Chat), tracker)
        .await?;

    if outcome.needs_summarization {
        if let Some(jobs) = &ctx.jobs {
            let enqueue = jobs
                .enqueue("summarization", json!({ "thread_id": thread_id }), Some(&user.id), None)
                .await;
            if let Err(e) = enqueue {
                warn!(error = %e, "could not enqueue summarization");
            }
        }
    }

    Ok(Json(json!({
        "message": message_json(&outcome.message),
        "usage": { "input": outcome.input_tokens, "output": outcome.output_tokens },
        "cost": outcome.cost,
        "duration_ms": outcome.duration_ms,
        "tools_used": outcome.tools_used,
        "user_context": outcome.user_context,
    })))
}

/// `POST /chat/{thread_id}/stream` — SSE stream of the reply.
pub async fn chat_stream(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(thread_id): Path<String>,
    Query(query): Query<AsyncQuery>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    use axum::response::IntoResponse;
    validate(&body)?;

    if query.async_processing {
        ThreadStore::new(&ctx.pool)
            .get(&thread_id, &user)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("thread not found: {thread_id}")))?;
        return Ok(enqueue_chat(&ctx, &user, &thread_id, &body, true).await?.into_response());
    }

    let tracker = ctx.tracker_for(&thread_id);
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let runtime = Arc::clone(&ctx.runtime);
    let options = body.options(CallType::ChatStream);
    let message = body.message.clone();
    let turn = tokio::spawn(async move {
        runtime.chat_stream(&thread_id, &user, &message, options, tracker, tx).await
    });

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Event, Infallible>(Event::default().data(content_frame(&chunk)));
        }
        // Channel closed: the turn is over; emit the terminal frame.
        match turn.await {
            Ok(Ok(_)) => yield Ok(Event::default().data(done_frame())),
            Ok(Err(e)) => yield Ok(Event::default().data(error_frame(&e.to_string()))),
            Err(e) => yield Ok(Event::default().data(error_frame(&format!("turn panicked: {e}")))),
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

/// `GET /chat/{thread_id}/messages` — the thread's message log.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_message_limit")]
    pub limit: i64,
}

fn default_message_limit() -> i64 {
    50
}

pub async fn list_messages(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path(thread_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Value>> {
    ThreadStore::new(&ctx.pool)
        .get(&thread_id, &user)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("thread not found: {thread_id}")))?;
    let messages = MessageStore::new(&ctx.pool).list(&thread_id, query.limit).await?;
    Ok(Json(json!({
        "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
    })))
}

/// `GET /chat/{thread_id}/subscribe/{channel_id}` — relay the async chat's
/// pub/sub channel as SSE until a terminal frame or the idle timeout.
pub async fn subscribe(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser,
    Path((thread_id, channel_id)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    ThreadStore::new(&ctx.pool)
        .get(&thread_id, &user)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("thread not found: {thread_id}")))?;

    let redis_url = ctx
        .settings
        .redis_url
        .clone()
        .ok_or_else(|| ApiError::Unavailable("streaming subscription requires Redis".into()))?;
    let channel = stream_channel(&thread_id, &channel_id);

    let stream = async_stream::stream! {
        let client = match redis::Client::open(redis_url.as_str()) {
            Ok(c) => c,
            Err(e) => {
                yield Ok(Event::default().data(error_frame(&e.to_string())));
                return;
            }
        };
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(p) => p,
            Err(e) => {
                yield Ok(Event::default().data(error_frame(&e.to_string())));
                return;
            }
        };
        if let Err(e) = pubsub.subscribe(&channel).await {
            yield Ok(Event::default().data(error_frame(&e.to_string())));
            return;
        }

        let mut messages = pubsub.on_message();
        loop {
            let next = tokio::time::timeout(SUBSCRIBE_TIMEOUT, messages.next()).await;
            match next {
                Ok(Some(msg)) => {
                    let payload: String = msg.get_payload().unwrap_or_default();
                    let terminal = is_terminal(&payload);
                    yield Ok::<Event, Infallible>(Event::default().data(payload));
                    if terminal {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    yield Ok(Event::default().data(error_frame("stream timeout")));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── WebSocket ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /chat/{thread_id}/ws` — bidirectional chat.
///
/// The token arrives as a query param or, failing that, as a first
/// `{"type":"auth","token":…}` frame after the upgrade.
pub async fn chat_ws(
    State(ctx): State<AppContext>,
    Path(thread_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, thread_id, query.token))
}

async fn ws_send(socket: &mut WebSocket, payload: String) -> bool {
    socket.send(WsMessage::Text(payload)).await.is_ok()
}

async fn handle_socket(
    mut socket: WebSocket,
    ctx: AppContext,
    thread_id: String,
    token: Option<String>,
) {
    // ── Authenticate ─────────────────────────────────────────────────────────
    let user = if !ctx.settings.auth_enabled {
        CurrentUser::new("default", "admin")
    } else if let Some(token) = token {
        match verify_token(&ctx.settings, &token) {
            Ok(user) => user,
            Err(e) => {
                let _ = ws_send(&mut socket, error_frame(&e.to_string())).await;
                return;
            }
        }
    } else {
        // Handshake frame: {"type":"auth","token":"…"}.
        let frame = match socket.recv().await {
            Some(Ok(WsMessage::Text(text))) => text,
            _ => return,
        };
        let parsed: Value = serde_json::from_str(&frame).unwrap_or(Value::Null);
        let token = parsed["token"].as_str().unwrap_or_default();
        if parsed["type"].as_str() != Some("auth") || token.is_empty() {
            let _ = ws_send(
                &mut socket,
                error_frame("Authentication required. Send {\"type\":\"auth\",\"token\":\"<jwt>\"}"),
            )
            .await;
            return;
        }
        match verify_token(&ctx.settings, token) {
            Ok(user) => {
                if !ws_send(&mut socket, json!({"type": "auth_success"}).to_string()).await {
                    return;
                }
                user
            }
            Err(e) => {
                let _ = ws_send(&mut socket, error_frame(&e.to_string())).await;
                return;
            }
        }
    };

    // ── Authorize the thread once per connection ─────────────────────────────
    match ThreadStore::new(&ctx.pool).get(&thread_id, &user).await {
        Ok(Some(_)) => {}
        _ => {
            let _ = ws_send(&mut socket, error_frame("Thread not found")).await;
            return;
        }
    }

    // ── Chat loop ────────────────────────────────────────────────────────────
    while let Some(incoming) = socket.recv().await {
        let text = match incoming {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(WsMessage::Ping(data)) => {
                if socket.send(WsMessage::Pong(data)).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(_) => continue,
        };

        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let message = parsed["message"].as_str().unwrap_or_default().to_string();
        if message.is_empty() {
            if !ws_send(&mut socket, error_frame("Empty message")).await {
                break;
            }
            continue;
        }

        let tracker = ctx.tracker_for(&thread_id);
        let options = ChatOptions { call_type: CallType::ChatWs, ..Default::default() };
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let runtime = Arc::clone(&ctx.runtime);
        let turn_thread = thread_id.clone();
        let turn_user = user.clone();
        let turn = tokio::spawn(async move {
            runtime
                .chat_stream(&turn_thread, &turn_user, &message, options, tracker, tx)
                .await
        });

        let mut client_gone = false;
        while let Some(chunk) = rx.recv().await {
            if !ws_send(&mut socket, content_frame(&chunk)).await {
                // Disconnect mid-stream: dropping the receiver stops the
                // turn at the next chunk boundary.
                client_gone = true;
                rx.close();
                break;
            }
        }
        match turn.await {
            Ok(Ok(_)) => {
                if !client_gone && !ws_send(&mut socket, done_frame()).await {
                    break;
                }
            }
            Ok(Err(e)) => {
                if !client_gone && !ws_send(&mut socket, error_frame(&e.to_string())).await {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "websocket turn panicked");
                break;
            }
        }
        if client_gone {
            break;
        }
    }
    debug!(thread_id, "websocket closed");
}
