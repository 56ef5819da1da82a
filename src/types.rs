use axum::response::sse::Event;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const END_MARKER: &str = "[DONE]";

/// One item of a streamed assistant reply.
#[derive(Debug)]
pub enum StreamEvent {
    Fragment(String),
    /// End marker; sent once, after every fragment.
    Done,
    /// Terminal failure after the stream was opened.
    Error(AppError),
}

impl StreamEvent {
    pub fn into_sse_event(self) -> Event {
        match self {
            // SSE cannot carry carriage returns
            StreamEvent::Fragment(text) => {
                Event::default().data(text.replace("\r\n", "\n").replace('\r', "\n"))
            }
            StreamEvent::Done => Event::default().data(END_MARKER),
            StreamEvent::Error(err) => {
                Event::default().event("error").data(err.to_json().to_string())
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub content: String,
    pub stream_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilesQuery {
    pub project_id: uuid::Uuid,
}
