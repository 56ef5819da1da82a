use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::config::Config;
use crate::database::Store;
use crate::error::AppError;
use crate::models::conversations::{Chat, Message, NewChat, NewMessage, Role};
use crate::services::context::ContextRetriever;
use crate::services::models::{default_model_id, is_known_model, is_paid_model};
use crate::services::openrouter::{parse_sse_line, ChatMessage, OpenRouterClient, SseFrame, SseLineDecoder};
use crate::services::ownership::{assert_chat_owned, assert_project_owned};
use crate::types::StreamEvent;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Emitted when no provider credential is available at all.
pub const STUB_TOKENS: &[&str] = &[
    "Thinking", "…", " ", "Thanks", " ", "for", " ", "your", " ", "message", ".",
];

/// Holds a chat's single streaming slot until dropped.
struct ChatLease {
    chat_id: Uuid,
    active: Arc<DashMap<Uuid, ()>>,
}

impl ChatLease {
    fn acquire(active: &Arc<DashMap<Uuid, ()>>, chat_id: Uuid) -> Result<Self, AppError> {
        match active.entry(chat_id) {
            Entry::Occupied(_) => Err(AppError::Conflict("stream_in_progress")),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Self {
                    chat_id,
                    active: active.clone(),
                })
            }
        }
    }
}

impl Drop for ChatLease {
    fn drop(&mut self) {
        self.active.remove(&self.chat_id);
    }
}

/// Everything the streaming task needs, resolved before the stream opens.
struct ReplyPlan {
    chat_id: Uuid,
    model: String,
    paid: bool,
    api_key: Option<String>,
    messages: Vec<ChatMessage>,
}

enum Outcome {
    Finished(String),
    Cancelled,
}

/// Events of one assistant reply. Dropping it cancels the reply.
pub struct ReplyStream {
    receiver: mpsc::Receiver<StreamEvent>,
    cancel_token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    _guard: DropGuard,
}

impl ReplyStream {
    /// Handle for cancelling the reply from elsewhere, e.g. a cancel request.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

impl Stream for ReplyStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // a timeout still delivers its terminal error event
        if self.cancel_token.is_cancelled() && !self.timed_out.load(Ordering::SeqCst) {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
    context: Arc<ContextRetriever>,
    openrouter: OpenRouterClient,
    config: Arc<Config>,
    active_streams: Arc<DashMap<Uuid, ()>>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        context: Arc<ContextRetriever>,
        openrouter: OpenRouterClient,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            context,
            openrouter,
            config,
            active_streams: Arc::new(DashMap::new()),
        }
    }

    pub async fn create_chat(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        title: Option<String>,
    ) -> Result<Chat, AppError> {
        assert_project_owned(self.store.as_ref(), user_id, project_id).await?;
        let now = Utc::now();
        let chat = self
            .store
            .insert_chat(NewChat {
                id: Uuid::new_v4(),
                user_id,
                project_id,
                title: clean_title(title),
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!("Created chat {} in project {}", chat.id, project_id);
        Ok(chat)
    }

    pub async fn list_chats(&self, user_id: Uuid, project_id: Uuid) -> Result<Vec<Chat>, AppError> {
        assert_project_owned(self.store.as_ref(), user_id, project_id).await?;
        Ok(self.store.list_chats(user_id, project_id).await?)
    }

    pub async fn get_chat(&self, user_id: Uuid, chat_id: Uuid) -> Result<Chat, AppError> {
        assert_chat_owned(self.store.as_ref(), user_id, chat_id).await
    }

    pub async fn update_chat(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        title: Option<String>,
    ) -> Result<Chat, AppError> {
        assert_chat_owned(self.store.as_ref(), user_id, chat_id).await?;
        self.store
            .update_chat_title(chat_id, clean_title(title))
            .await?
            .ok_or(AppError::NotFound("chat_not_found"))
    }

    pub async fn delete_chat(&self, user_id: Uuid, chat_id: Uuid) -> Result<(), AppError> {
        assert_chat_owned(self.store.as_ref(), user_id, chat_id).await?;
        self.store.delete_chat(chat_id).await?;
        info!("Deleted chat {chat_id}");
        Ok(())
    }

    pub async fn list_messages(&self, user_id: Uuid, chat_id: Uuid) -> Result<Vec<Message>, AppError> {
        assert_chat_owned(self.store.as_ref(), user_id, chat_id).await?;
        Ok(self.store.list_messages(chat_id).await?)
    }

    pub async fn create_user_message(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        content: &str,
    ) -> Result<Message, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::bad_request("content_required", "message content is required"));
        }
        assert_chat_owned(self.store.as_ref(), user_id, chat_id).await?;
        Ok(self
            .store
            .insert_message(NewMessage::user(chat_id, user_id, content))
            .await?)
    }

    /// Persists the user's turn and starts streaming the assistant reply.
    ///
    /// Ownership, model and credential failures are returned here, before
    /// any event is produced. Later failures arrive as one
    /// [`StreamEvent::Error`] at the end of the stream.
    pub async fn stream_assistant_reply(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        content: &str,
        credential: Option<String>,
    ) -> Result<ReplyStream, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::bad_request("content_required", "message content is required"));
        }
        let chat = assert_chat_owned(self.store.as_ref(), user_id, chat_id).await?;
        let lease = ChatLease::acquire(&self.active_streams, chat_id)?;

        let saved = self
            .store
            .insert_message(NewMessage::user(chat_id, user_id, content))
            .await?;

        let plan = self.plan_reply(user_id, &chat, &saved, content, credential).await?;

        let (tx, rx) = mpsc::channel(100);
        let cancel_token = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));

        let service = self.clone();
        let task_token = cancel_token.clone();
        let task_flag = timed_out.clone();
        tokio::spawn(async move {
            service.run_reply(plan, tx, task_token, task_flag).await;
            drop(lease);
        });

        Ok(ReplyStream {
            receiver: rx,
            _guard: cancel_token.clone().drop_guard(),
            cancel_token,
            timed_out,
        })
    }

    async fn plan_reply(
        &self,
        user_id: Uuid,
        chat: &Chat,
        saved: &Message,
        content: &str,
        credential: Option<String>,
    ) -> Result<ReplyPlan, AppError> {
        let project = assert_project_owned(self.store.as_ref(), user_id, chat.project_id).await?;

        let system_prompt = project
            .system_prompt
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let mut messages = vec![ChatMessage::new(Role::System.as_str(), system_prompt)];

        let context = self
            .context
            .build_context_for_chat(project.id, chat.id, content)
            .await?;
        let turn = match context {
            Some(block) => format!("{block}\n\n---\n\nUser's question: {content}"),
            None => content.to_owned(),
        };

        // the saved turn is replayed once, in its augmented form
        let history = self.store.list_messages(chat.id).await?;
        let mut replaced = false;
        for message in history {
            if message.id == saved.id {
                messages.push(ChatMessage::new(Role::User.as_str(), turn.clone()));
                replaced = true;
            } else {
                messages.push(ChatMessage::new(message.role, message.content));
            }
        }
        if !replaced {
            messages.push(ChatMessage::new(Role::User.as_str(), turn));
        }

        let model = project
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| default_model_id().to_owned());
        if !is_known_model(&model) {
            return Err(AppError::invalid_model(&model));
        }

        let user_key = credential
            .map(|k| k.trim().to_owned())
            .filter(|k| !k.is_empty());
        let paid = is_paid_model(&model);
        let api_key = if paid {
            Some(user_key.ok_or(AppError::Forbidden("paid_model_requires_user_key"))?)
        } else {
            user_key.or_else(|| self.config.openrouter_api_key.clone())
        };

        Ok(ReplyPlan {
            chat_id: chat.id,
            model,
            paid,
            api_key,
            messages,
        })
    }

    async fn run_reply(
        &self,
        plan: ReplyPlan,
        tx: mpsc::Sender<StreamEvent>,
        token: CancellationToken,
        timed_out: Arc<AtomicBool>,
    ) {
        let Some(api_key) = plan.api_key.clone() else {
            self.run_stub(plan.chat_id, &tx, &token).await;
            return;
        };

        let timer = tokio::spawn({
            let token = token.clone();
            let timed_out = timed_out.clone();
            let timeout = self.config.stream_timeout;
            async move {
                tokio::time::sleep(timeout).await;
                timed_out.store(true, Ordering::SeqCst);
                token.cancel();
            }
        });

        let result = self.stream_upstream(&plan, &api_key, &tx, &token).await;
        timer.abort();

        let timed_out = timed_out.load(Ordering::SeqCst);
        match result {
            Ok(Outcome::Finished(full)) if !token.is_cancelled() => {
                if !full.is_empty() {
                    if let Err(e) = self
                        .store
                        .insert_message(NewMessage::assistant(plan.chat_id, full))
                        .await
                    {
                        error!("Failed to persist assistant reply for chat {}: {e}", plan.chat_id);
                        let _ = tx.send(StreamEvent::Error(e.into())).await;
                        return;
                    }
                }
                let _ = tx.send(StreamEvent::Done).await;
            }
            _ if timed_out => {
                warn!("OpenRouter stream timed out for chat {}", plan.chat_id);
                let _ = tx.send(StreamEvent::Error(AppError::UpstreamTimeout)).await;
            }
            Ok(_) => debug!("Stream for chat {} cancelled", plan.chat_id),
            Err(_) if token.is_cancelled() => {
                debug!("Stream for chat {} cancelled", plan.chat_id)
            }
            Err(e) => {
                error!("stream_error for chat {}: {e}", plan.chat_id);
                let _ = tx.send(StreamEvent::Error(e)).await;
            }
        }
    }

    async fn stream_upstream(
        &self,
        plan: &ReplyPlan,
        api_key: &str,
        tx: &mpsc::Sender<StreamEvent>,
        token: &CancellationToken,
    ) -> Result<Outcome, AppError> {
        let response = tokio::select! {
            _ = token.cancelled() => return Ok(Outcome::Cancelled),
            response = self.openrouter.open_stream(api_key, &plan.model, &plan.messages, plan.paid) => response?,
        };

        let mut body = response.bytes_stream();
        let mut decoder = SseLineDecoder::new();
        let mut full = String::new();

        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Ok(Outcome::Cancelled),
                chunk = body.next() => chunk,
            };
            let (lines, ended) = match chunk {
                Some(bytes) => {
                    let bytes = bytes.map_err(|e| AppError::UpstreamTransport(e.to_string()))?;
                    (decoder.push(&bytes), false)
                }
                None => (decoder.finish().into_iter().collect(), true),
            };

            for line in lines {
                match parse_sse_line(&line) {
                    SseFrame::Delta(delta) => {
                        full.push_str(&delta);
                        if tx.send(StreamEvent::Fragment(delta)).await.is_err() {
                            return Ok(Outcome::Cancelled);
                        }
                    }
                    SseFrame::Done => return Ok(Outcome::Finished(full)),
                    SseFrame::Skip => {}
                }
            }
            if ended {
                return Ok(Outcome::Finished(full));
            }
        }
    }

    async fn run_stub(&self, chat_id: Uuid, tx: &mpsc::Sender<StreamEvent>, token: &CancellationToken) {
        info!("CHAT: No OpenRouter key available, streaming stub reply for chat {chat_id}");
        for t in STUB_TOKENS {
            if token.is_cancelled() || tx.send(StreamEvent::Fragment((*t).to_owned())).await.is_err() {
                return;
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.config.stub_token_delay) => {}
            }
        }

        if let Err(e) = self
            .store
            .insert_message(NewMessage::assistant(chat_id, STUB_TOKENS.concat()))
            .await
        {
            error!("Failed to persist stub reply for chat {chat_id}: {e}");
            let _ = tx.send(StreamEvent::Error(e.into())).await;
            return;
        }
        let _ = tx.send(StreamEvent::Done).await;
    }
}

fn clean_title(title: Option<String>) -> Option<String> {
    title.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, Bytes};
    use axum::routing::post;
    use axum::Router;
    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::database::MemoryStore;
    use crate::models::files::NewFileRecord;
    use crate::models::projects::NewProject;
    use crate::services::blobs::{BlobStore, LocalBlobStore};
    use crate::services::extract::PdfTextExtractor;

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        blobs: Arc<LocalBlobStore>,
        service: ChatService,
        user_id: Uuid,
        project_id: Uuid,
        chat_id: Uuid,
    }

    fn test_config(base_url: &str, server_key: Option<&str>) -> Config {
        Config {
            openrouter_base_url: base_url.to_owned(),
            openrouter_api_key: server_key.map(str::to_owned),
            stub_token_delay: Duration::ZERO,
            stream_timeout: Duration::from_secs(5),
            ..Config::default()
        }
    }

    async fn harness(config: Config, model: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(LocalBlobStore::new(dir.path()));
        let config = Arc::new(config);
        let context = Arc::new(ContextRetriever::new(
            store.clone(),
            blobs.clone(),
            Arc::new(PdfTextExtractor),
            config.context_max_chunks,
            config.context_max_chars_per_chunk,
        ));
        let openrouter = OpenRouterClient::new(reqwest::Client::new(), &config);
        let service = ChatService::new(store.clone(), context, openrouter, config);

        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let project = store
            .insert_project(NewProject {
                id: Uuid::new_v4(),
                user_id,
                name: "research".into(),
                system_prompt: Some("Be brief.".into()),
                model: model.map(str::to_owned),
                params: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let chat = service.create_chat(user_id, project.id, None).await.unwrap();

        Harness {
            _dir: dir,
            store,
            blobs,
            service,
            user_id,
            project_id: project.id,
            chat_id: chat.id,
        }
    }

    impl Harness {
        async fn add_text_file(&self, name: &str, text: &str) {
            let locator = self.blobs.put(text.as_bytes()).await.unwrap();
            self.store
                .insert_file(NewFileRecord {
                    id: Uuid::new_v4(),
                    project_id: self.project_id,
                    user_id: self.user_id,
                    name: name.into(),
                    mime: "text/plain".into(),
                    size: text.len() as i64,
                    storage_locator: locator,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        async fn roles(&self) -> Vec<(String, String)> {
            self.store
                .list_messages(self.chat_id)
                .await
                .unwrap()
                .into_iter()
                .map(|m| (m.role, m.content))
                .collect()
        }

        async fn stream(&self, content: &str, credential: Option<&str>) -> Result<ReplyStream, AppError> {
            self.service
                .stream_assistant_reply(self.user_id, self.chat_id, content, credential.map(str::to_owned))
                .await
        }
    }

    async fn collect(stream: ReplyStream) -> Vec<StreamEvent> {
        tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
            .await
            .expect("stream did not finish")
    }

    fn fragments(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Fragment(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    fn sse_body(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("{l}\n\n")).collect()
    }

    async fn mock_upstream(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    /// Sends one fragment, then never finishes the body.
    async fn stalled_upstream() -> String {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async {
                let first = futures::stream::once(async {
                    Ok::<_, std::io::Error>(Bytes::from_static(
                        b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
                    ))
                });
                let body = Body::from_stream(first.chain(futures::stream::pending()));
                ([("content-type", "text/event-stream")], body)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn stub_reply_without_any_credential() {
        let server = MockServer::start().await;
        let h = harness(test_config(&server.uri(), None), None).await;

        let events = collect(h.stream("hello", None).await.unwrap()).await;

        assert_eq!(fragments(&events), STUB_TOKENS);
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        assert!(server.received_requests().await.unwrap().is_empty());
        assert_eq!(
            h.roles().await,
            vec![
                ("user".to_owned(), "hello".to_owned()),
                ("assistant".to_owned(), "Thinking… Thanks for your message.".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn upstream_reply_is_streamed_and_persisted_once() {
        let body = sse_body(&[
            ": OPENROUTER PROCESSING",
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#,
            "data: {broken",
            r#"data: {"choices":[{"delta":{"content":" world"}}]}"#,
            "data: [DONE]",
            r#"data: {"choices":[{"delta":{"content":"ignored"}}]}"#,
        ]);
        let server = mock_upstream(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;
        let h = harness(test_config(&server.uri(), Some("server-key")), None).await;
        h.add_text_file("notes.txt", "Alpha appears here in this paragraph.").await;

        let events = collect(h.stream("what is alpha", None).await.unwrap()).await;

        assert_eq!(fragments(&events), vec!["Hello", " world"]);
        let done_count = events.iter().filter(|e| matches!(e, StreamEvent::Done)).count();
        assert_eq!(done_count, 1);
        assert!(matches!(events.last(), Some(StreamEvent::Done)));

        let roles = h.roles().await;
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[1], ("assistant".to_owned(), "Hello world".to_owned()));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.headers.get("authorization").unwrap(), "Bearer server-key");
        assert_eq!(request.headers.get("x-title").unwrap(), "Kanari");

        let sent: Value = request.body_json().unwrap();
        assert_eq!(sent["model"], default_model_id());
        assert_eq!(sent["stream"], true);
        let messages = sent["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Be brief.");
        let user_turns: Vec<&str> = messages
            .iter()
            .filter(|m| m["role"] == "user")
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(user_turns.len(), 1);
        assert!(user_turns[0].contains("File: notes.txt (Part 1)"));
        assert!(user_turns[0].ends_with("\n\n---\n\nUser's question: what is alpha"));
    }

    #[tokio::test]
    async fn caller_key_overrides_server_key_for_free_models() {
        let body = sse_body(&[r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#, "data: [DONE]"]);
        let server = mock_upstream(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;
        let h = harness(test_config(&server.uri(), Some("server-key")), None).await;

        collect(h.stream("hi", Some("  user-key ")).await.unwrap()).await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get("authorization").unwrap(), "Bearer user-key");
    }

    #[tokio::test]
    async fn empty_reply_emits_done_without_persisting() {
        let body = sse_body(&[r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#, "data: [DONE]"]);
        let server = mock_upstream(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;
        let h = harness(test_config(&server.uri(), Some("server-key")), None).await;

        let events = collect(h.stream("hi", None).await.unwrap()).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Done));
        assert_eq!(h.roles().await, vec![("user".to_owned(), "hi".to_owned())]);
    }

    #[tokio::test]
    async fn paid_model_requires_caller_key() {
        let body = sse_body(&[r#"data: {"choices":[{"delta":{"content":"paid"}}]}"#, "data: [DONE]"]);
        let server = mock_upstream(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")).await;
        let h = harness(test_config(&server.uri(), Some("server-key")), Some("openai/gpt-5-nano")).await;

        let err = h.stream("hi", None).await.err().unwrap();
        assert_eq!(err.code(), "paid_model_requires_user_key");
        assert_eq!(err.status().as_u16(), 403);
        assert!(server.received_requests().await.unwrap().is_empty());
        assert_eq!(h.roles().await, vec![("user".to_owned(), "hi".to_owned())]);

        let events = collect(h.stream("again", Some("user-key")).await.unwrap()).await;
        assert_eq!(fragments(&events), vec!["paid"]);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get("authorization").unwrap(), "Bearer user-key");
        let sent: Value = requests[0].body_json().unwrap();
        assert_eq!(sent["plugins"][0]["id"], "file-parser");
    }

    #[tokio::test]
    async fn unknown_project_model_is_rejected() {
        let h = harness(test_config("http://127.0.0.1:9", Some("k")), Some("acme/unknown")).await;
        let err = h.stream("hi", None).await.err().unwrap();
        assert_eq!(err.code(), "invalid_model");
    }

    #[tokio::test]
    async fn upstream_failure_becomes_terminal_error() {
        let server = mock_upstream(ResponseTemplate::new(500).set_body_string("boom")).await;
        let h = harness(test_config(&server.uri(), Some("server-key")), None).await;

        let events = collect(h.stream("hi", None).await.unwrap()).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Error(AppError::Upstream { status, body }) => {
                assert_eq!(*status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.roles().await.len(), 1);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = mock_upstream(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["data: [DONE]"]), "text/event-stream")
                .set_delay(Duration::from_secs(3)),
        )
        .await;
        let mut config = test_config(&server.uri(), Some("server-key"));
        config.stream_timeout = Duration::from_millis(100);
        let h = harness(config, None).await;

        let events = collect(h.stream("hi", None).await.unwrap()).await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            match &events[0] {
                StreamEvent::Error(e) => e.code(),
                _ => "",
            },
            "openrouter_stream_timeout"
        );
        assert_eq!(h.roles().await.len(), 1);
    }

    #[tokio::test]
    async fn cancelling_discards_partial_output() {
        let base = stalled_upstream().await;
        let h = harness(test_config(&base, Some("server-key")), None).await;

        let mut stream = h.stream("hi", None).await.unwrap();
        match stream.next().await {
            Some(StreamEvent::Fragment(f)) => assert_eq!(f, "partial"),
            other => panic!("unexpected event {other:?}"),
        }
        stream.cancel_token().cancel();
        assert!(stream.next().await.is_none());
        drop(stream);

        // the lease is released once the task winds down
        let mut next = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            match h.stream("again", None).await {
                Err(AppError::Conflict(_)) => continue,
                other => {
                    next = Some(other);
                    break;
                }
            }
        }
        let next = next.expect("lease was never released").unwrap();
        drop(next);

        let roles = h.roles().await;
        assert!(roles.iter().all(|(role, _)| role == "user"));
    }

    #[tokio::test]
    async fn concurrent_stream_on_same_chat_conflicts() {
        let mut config = test_config("http://127.0.0.1:9", None);
        config.stub_token_delay = Duration::from_secs(1);
        let h = harness(config, None).await;

        let first = h.stream("one", None).await.unwrap();
        let err = h.stream("two", None).await.err().unwrap();
        assert_eq!(err.code(), "stream_in_progress");
        assert_eq!(err.status().as_u16(), 409);
        assert_eq!(h.roles().await, vec![("user".to_owned(), "one".to_owned())]);
        drop(first);
    }

    #[tokio::test]
    async fn foreign_chat_is_not_found_and_nothing_is_written() {
        let h = harness(test_config("http://127.0.0.1:9", None), None).await;
        let stranger = Uuid::new_v4();

        let err = h
            .service
            .stream_assistant_reply(stranger, h.chat_id, "hi", None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "chat_not_found");
        let err = h.service.list_messages(stranger, h.chat_id).await.unwrap_err();
        assert_eq!(err.code(), "chat_not_found");
        let err = h.service.create_chat(stranger, h.project_id, None).await.unwrap_err();
        assert_eq!(err.code(), "project_not_found");
        assert!(h.roles().await.is_empty());
    }

    #[tokio::test]
    async fn blank_content_is_rejected() {
        let h = harness(test_config("http://127.0.0.1:9", None), None).await;
        let err = h.stream("   ", None).await.err().unwrap();
        assert_eq!(err.code(), "content_required");
        let err = h.service.create_user_message(h.user_id, h.chat_id, "").await.unwrap_err();
        assert_eq!(err.code(), "content_required");
    }

    #[tokio::test]
    async fn chat_crud_round() {
        let h = harness(test_config("http://127.0.0.1:9", None), None).await;

        let renamed = h
            .service
            .update_chat(h.user_id, h.chat_id, Some("  Plans ".into()))
            .await
            .unwrap();
        assert_eq!(renamed.title.as_deref(), Some("Plans"));
        assert_eq!(h.service.list_chats(h.user_id, h.project_id).await.unwrap().len(), 1);

        h.service.create_user_message(h.user_id, h.chat_id, "note").await.unwrap();
        h.service.delete_chat(h.user_id, h.chat_id).await.unwrap();
        let err = h.service.get_chat(h.user_id, h.chat_id).await.unwrap_err();
        assert_eq!(err.code(), "chat_not_found");
        assert!(h.store.list_messages(h.chat_id).await.unwrap().is_empty());
    }
}
