use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    Extension, Json,
};
use futures::stream::Stream;
use log::info;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::cancellable_sse::StreamRegistration;
use crate::error::AppError;
use crate::services::chats::ReplyStream;
use crate::state::AppState;
use crate::types::StreamQuery;

pub const OPENROUTER_KEY_HEADER: &str = "x-openrouter-key";

/// SSE body for one reply. Holds the stream id registration, if any, for
/// as long as the client stays connected.
pub struct ReplySseStream {
    reply: ReplyStream,
    _registration: Option<StreamRegistration>,
}

impl Stream for ReplySseStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.reply)
            .poll_next(cx)
            .map(|event| event.map(|e| Ok(e.into_sse_event())))
    }
}

pub async fn stream_reply(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<KeepAliveStream<ReplySseStream>>, AppError> {
    let credential = headers
        .get(OPENROUTER_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    info!("Starting reply stream for user: {user_id} - chat: {chat_id}");

    let reply = state
        .chats
        .stream_assistant_reply(user_id, chat_id, &query.content, credential)
        .await?;
    let registration = query
        .stream_id
        .filter(|id| !id.is_empty())
        .map(|id| state.sse_state.register_stream(id, user_id, reply.cancel_token()));

    Ok(Sse::new(ReplySseStream {
        reply,
        _registration: registration,
    })
    .keep_alive(KeepAlive::default()))
}

pub async fn cancel_stream(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(stream_id): Path<String>,
) -> Json<Value> {
    let cancelled = state.sse_state.cancel_stream(&stream_id, user_id);
    Json(json!({ "cancelled": cancelled }))
}
