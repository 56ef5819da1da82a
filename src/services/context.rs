use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::database::Store;
use crate::error::AppError;
use crate::models::files::FileRecord;
use crate::services::blobs::BlobStore;
use crate::services::extract::TextExtractor;

const RECENT_MESSAGES: usize = 4;
const MAX_FILES: usize = 50;

const CONTEXT_HEADER: &str = "[CONTEXT: The following are excerpts from files in your project]";
const CONTEXT_FOOTER: &str = "[END OF CONTEXT]";

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").expect("valid regex"));
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n+").expect("valid regex"));

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    part: usize,
    chunk: String,
    score: usize,
}

/// Lexical-overlap retrieval over a project's uploaded files.
pub struct ContextRetriever {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    max_chunks: usize,
    max_chars_per_chunk: usize,
}

impl ContextRetriever {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        max_chunks: usize,
        max_chars_per_chunk: usize,
    ) -> Self {
        Self {
            store,
            blobs,
            extractor,
            max_chunks,
            max_chars_per_chunk,
        }
    }

    /// Builds the context block for one turn, or `None` when the project
    /// has no readable file content.
    ///
    /// Unreadable files are logged and skipped. Only store failures while
    /// listing messages or files are returned as errors.
    pub async fn build_context_for_chat(
        &self,
        project_id: Uuid,
        chat_id: Uuid,
        prompt: &str,
    ) -> Result<Option<String>, AppError> {
        let recent = self.store.recent_messages(chat_id, RECENT_MESSAGES).await?;
        let basis = std::iter::once(prompt)
            .chain(recent.iter().map(|m| m.content.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        let query: HashSet<String> = tokenize(&basis).into_iter().collect();

        let files = self.store.list_files(project_id, Some(MAX_FILES)).await?;
        info!("RAG: Found {} files for project {}", files.len(), project_id);

        let mut candidates = Vec::new();
        for file in &files {
            let Some(raw) = self.read_file_text(file).await else {
                continue;
            };

            let chunks = chunk_text(&raw, self.max_chars_per_chunk);
            debug!("RAG: Created {} chunks from {}", chunks.len(), file.name);

            for (i, chunk) in chunks.into_iter().enumerate() {
                let score = score_chunk(&query, &chunk);
                candidates.push(Candidate {
                    name: file.name.clone(),
                    part: i + 1,
                    chunk,
                    score,
                });
            }
        }

        if candidates.is_empty() {
            debug!("RAG: No chunks found for project {project_id}");
            return Ok(None);
        }

        // sort_by is stable: equal scores keep file recency then part order
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates.truncate(self.max_chunks);

        let context = render(&candidates, self.max_chars_per_chunk);
        info!(
            "RAG: Built context with {} chars from {} chunks",
            context.chars().count(),
            candidates.len()
        );
        Ok(Some(context))
    }

    async fn read_file_text(&self, file: &FileRecord) -> Option<String> {
        let is_pdf = file.mime == "application/pdf";
        if !is_pdf && !is_text_mime(&file.mime) {
            debug!("RAG: Skipping unsupported mime type {} for {}", file.mime, file.name);
            return None;
        }

        let bytes = match self.blobs.get(&file.storage_locator).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("RAG: Failed to read file {} {}: {e}", file.id, file.name);
                return None;
            }
        };

        let raw = if is_pdf {
            match self.extractor.extract_pdf(bytes).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("RAG: Failed to extract PDF {}: {e}", file.name);
                    return None;
                }
            }
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };

        (!raw.is_empty()).then_some(raw)
    }
}

pub fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/xml" | "application/javascript"
        )
}

fn tokenize(s: &str) -> Vec<String> {
    NON_WORD
        .replace_all(&s.to_lowercase(), " ")
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// Every occurrence of a query token counts, so repeated terms weigh more.
fn score_chunk(query: &HashSet<String>, chunk: &str) -> usize {
    tokenize(chunk).iter().filter(|t| query.contains(*t)).count()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Greedy paragraph packing. A chunk never exceeds `max_chars` characters.
fn chunk_text(raw: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut acc = String::new();
    let mut acc_chars = 0;

    for para in PARAGRAPH_BREAK.split(raw) {
        let para_chars = para.chars().count();
        if acc.is_empty() {
            acc = truncate_chars(para, max_chars).to_owned();
            acc_chars = acc.chars().count();
        } else if acc_chars + 2 + para_chars > max_chars {
            out.push(std::mem::take(&mut acc));
            acc = truncate_chars(para, max_chars).to_owned();
            acc_chars = acc.chars().count();
        } else {
            acc.push_str("\n\n");
            acc.push_str(para);
            acc_chars += 2 + para_chars;
        }
    }
    if !acc.is_empty() {
        out.push(acc);
    }
    out
}

fn render(top: &[Candidate], max_chars: usize) -> String {
    let mut lines: Vec<&str> = vec![CONTEXT_HEADER, ""];
    let headings: Vec<String> = top
        .iter()
        .map(|c| format!("File: {} (Part {})", c.name, c.part))
        .collect();
    for (c, heading) in top.iter().zip(&headings) {
        lines.push(heading);
        lines.push(truncate_chars(&c.chunk, max_chars));
        lines.push("");
    }
    lines.push(CONTEXT_FOOTER);
    lines.push("");
    lines.join("\n")
}
