//! Transcript retrieval pipeline
//!
//! Produces one validated, persisted transcript file per conversation that
//! has a transcript and annotation, within explicit bounds, using three
//! batched query waves instead of per-conversation fan-out:
//!
//! 1. Conversations in the workstream (FetchXML, capped at
//!    `max_conversations`).
//! 2. Transcripts for those conversations, batched with `in` conditions.
//! 3. Annotations for those transcripts, batched the same way.
//!
//! The waves run sequentially; results are joined in memory by lookup
//! value. A failure on one conversation (missing transcript or annotation,
//! oversize or undecodable body, write failure) is counted and the loop
//! continues; only configuration, validation, path-traversal, and API
//! errors abort the run.

pub mod fetchxml;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use serde_json::Value;

use crate::config::{Config, OutputPathStrategy};
use crate::dataverse::entities::{
    Annotation, AnnotationRow, Conversation, DownloadSummary, Transcript, TranscriptMessage,
    TranscriptRow,
};
use crate::dataverse::DataverseClient;
use crate::error::{Error, Result};
use crate::validators::{is_safe_path_component, sanitize_filename, validate_guid};

/// Ids per batched `in` query. Bounds query size and keeps round trips at
/// `ceil(N/10)` instead of `N`.
pub const TRANSCRIPT_BATCH_SIZE: usize = 10;

const CONVERSATION_ENTITY_SET: &str = "msdyn_ocliveworkitems";
const TRANSCRIPT_ENTITY_SET: &str = "msdyn_transcripts";
const ANNOTATION_ENTITY_SET: &str = "annotations";

/// Orchestrates the three-wave batched join and file persistence.
#[derive(Debug)]
pub struct TranscriptPipeline<'a> {
    client: &'a DataverseClient,
    workstream_id: String,
    days_to_fetch: i64,
    max_conversations: u32,
    max_content_size: usize,
    closed_only: bool,
    lookup_field: String,
    output_dir: PathBuf,
}

impl<'a> TranscriptPipeline<'a> {
    /// Validate bounds and prepare the output directory.
    ///
    /// Fails with [`Error::Config`] when `max_conversations` is missing or
    /// out of [1, 1000], and with [`Error::Validation`] when the workstream
    /// id is not a GUID.
    pub fn new(client: &'a DataverseClient, config: &Config) -> Result<Self> {
        validate_guid(&config.workstream_id, "workstream_id")?;

        let max_conversations = config.max_conversations.ok_or_else(|| {
            Error::Config("max_conversations is required (range: 1-1000)".to_string())
        })?;
        if !(1..=1000).contains(&max_conversations) {
            return Err(Error::Config(format!(
                "max_conversations must be between 1 and 1000, got {}",
                max_conversations
            )));
        }

        let output_dir = Self::prepare_output_dir(config)?;

        Ok(Self {
            client,
            workstream_id: config.workstream_id.clone(),
            days_to_fetch: config.days_to_fetch,
            max_conversations,
            max_content_size: config.max_content_size,
            closed_only: config.closed_only,
            lookup_field: config.transcript_lookup_field.clone(),
            output_dir,
        })
    }

    fn prepare_output_dir(config: &Config) -> Result<PathBuf> {
        let root = if config.output_dir.is_absolute() {
            config.output_dir.clone()
        } else {
            std::env::current_dir()?.join(&config.output_dir)
        };

        let dir = match config.output_path_strategy {
            OutputPathStrategy::Fixed => root,
            OutputPathStrategy::Timestamped => {
                root.join(Utc::now().format("%Y%m%d_%H%M%S").to_string())
            }
        };

        std::fs::create_dir_all(&dir)?;
        // Canonical form makes the traversal prefix check exact.
        Ok(dir.canonicalize()?)
    }

    /// The resolved absolute output directory for this run.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run the full pipeline and return the aggregate summary.
    pub async fn run(&self) -> Result<DownloadSummary> {
        let mut summary = DownloadSummary::default();

        let conversations = self.fetch_conversations().await?;
        summary.total_conversations = conversations.len();
        tracing::info!(count = conversations.len(), "Fetched conversations");
        if conversations.is_empty() {
            return Ok(summary);
        }

        let conversation_ids: Vec<String> =
            conversations.iter().map(|c| c.id.clone()).collect();
        let transcripts = self.fetch_transcripts(&conversation_ids).await?;
        tracing::info!(count = transcripts.len(), "Fetched transcripts");

        let transcript_ids: Vec<String> =
            transcripts.values().map(|t| t.id.clone()).collect();
        let annotations = self.fetch_annotations(&transcript_ids).await?;
        tracing::info!(count = annotations.len(), "Fetched annotations");

        for conversation in &conversations {
            self.persist(conversation, &transcripts, &annotations, &mut summary)?;
        }

        tracing::info!(
            total = summary.total_conversations,
            found = summary.transcripts_found,
            downloaded = summary.transcripts_downloaded,
            errors = summary.errors,
            "Pipeline run complete"
        );
        Ok(summary)
    }

    /// Wave 1: conversations in the workstream, newest first, capped at
    /// `max_conversations`.
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        let created_after = Utc::now() - Duration::days(self.days_to_fetch);
        let query = fetchxml::conversations_query(
            &self.workstream_id,
            created_after,
            self.max_conversations,
            self.closed_only,
        )?;

        tracing::info!(
            workstream = %self.workstream_id,
            days = self.days_to_fetch,
            top = self.max_conversations,
            "Fetching conversations"
        );
        let records = self
            .client
            .execute_fetch_xml(CONVERSATION_ENTITY_SET, &query)
            .await?;

        let mut conversations = Vec::with_capacity(records.len());
        for record in &records {
            match Conversation::from_record(record) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed conversation record"),
            }
        }
        Ok(conversations)
    }

    /// Wave 2: transcripts for the conversation batch, merged into a
    /// conversation-id -> transcript map. First transcript per conversation
    /// wins.
    async fn fetch_transcripts(
        &self,
        conversation_ids: &[String],
    ) -> Result<HashMap<String, Transcript>> {
        let mut by_conversation = HashMap::new();

        for batch in conversation_ids.chunks(TRANSCRIPT_BATCH_SIZE) {
            let query = fetchxml::transcripts_by_conversation_query(&self.lookup_field, batch)?;
            let records = self
                .client
                .execute_fetch_xml(TRANSCRIPT_ENTITY_SET, &query)
                .await?;

            for record in &records {
                match TranscriptRow::from_record(record, &self.lookup_field) {
                    Ok(TranscriptRow {
                        conversation_id: Some(conversation_id),
                        transcript,
                    }) => {
                        by_conversation.entry(conversation_id).or_insert(transcript);
                    }
                    Ok(row) => tracing::warn!(
                        transcript = %row.transcript.id,
                        lookup_field = %self.lookup_field,
                        "Transcript record carries no conversation lookup value"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed transcript record"),
                }
            }
        }

        Ok(by_conversation)
    }

    /// Wave 3: annotations for the transcript batch, merged into a
    /// transcript-id -> annotation map.
    async fn fetch_annotations(
        &self,
        transcript_ids: &[String],
    ) -> Result<HashMap<String, Annotation>> {
        let mut by_transcript = HashMap::new();

        for batch in transcript_ids.chunks(TRANSCRIPT_BATCH_SIZE) {
            let query = fetchxml::annotations_by_object_query(batch)?;
            let records = self
                .client
                .execute_fetch_xml(ANNOTATION_ENTITY_SET, &query)
                .await?;

            for record in &records {
                match AnnotationRow::from_record(record) {
                    Ok(AnnotationRow {
                        transcript_id: Some(transcript_id),
                        annotation,
                    }) => {
                        by_transcript.entry(transcript_id).or_insert(annotation);
                    }
                    Ok(row) => tracing::warn!(
                        annotation = %row.annotation.id,
                        "Annotation record carries no object lookup value"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed annotation record"),
                }
            }
        }

        Ok(by_transcript)
    }

    /// Join one conversation against the fetched maps and persist its
    /// transcript file, updating the summary.
    ///
    /// Retrieval gaps and content errors are counted and the method returns
    /// `Ok`; only validation and path-traversal failures propagate.
    pub fn persist(
        &self,
        conversation: &Conversation,
        transcripts: &HashMap<String, Transcript>,
        annotations: &HashMap<String, Annotation>,
        summary: &mut DownloadSummary,
    ) -> Result<()> {
        let Some(transcript) = transcripts.get(&conversation.id) else {
            tracing::info!(conversation = %conversation.id, "No transcript for conversation");
            summary.errors += 1;
            return Ok(());
        };
        summary.transcripts_found += 1;

        let Some(annotation) = annotations.get(&transcript.id) else {
            tracing::warn!(
                conversation = %conversation.id,
                transcript = %transcript.id,
                "No annotation for transcript"
            );
            summary.errors += 1;
            return Ok(());
        };

        let Some(body) = annotation.document_body.as_deref() else {
            tracing::warn!(annotation = %annotation.id, "Annotation has no document body");
            summary.errors += 1;
            return Ok(());
        };

        // Size ceiling applies to the still-encoded body; oversize content
        // is never decoded.
        if body.len() > self.max_content_size {
            tracing::warn!(
                annotation = %annotation.id,
                size = body.len(),
                limit = self.max_content_size,
                "Document body exceeds size limit, skipping decode"
            );
            summary.errors += 1;
            return Ok(());
        }

        let decoded = match decode_document_body(body) {
            Ok(decoded) => decoded,
            Err(reason) => {
                tracing::warn!(annotation = %annotation.id, reason, "Could not decode document body");
                summary.errors += 1;
                return Ok(());
            }
        };

        let rendered = render_transcript(&decoded);
        let path = self.output_path_for(conversation)?;

        match std::fs::write(&path, rendered) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Saved transcript");
                summary.transcripts_downloaded += 1;
                summary.files.push(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not write transcript file");
                summary.errors += 1;
            }
        }
        Ok(())
    }

    /// Compute the output path for a conversation and verify it stays under
    /// the output directory.
    pub fn output_path_for(&self, conversation: &Conversation) -> Result<PathBuf> {
        let id = validate_guid(&conversation.id, "conversation id")?;
        let stamp = conversation
            .created_on
            .map(|dt| dt.format("%Y%m%d_%H%M%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut name = format!("transcript_{}_{}", stamp, id);
        if let Some(title) = &conversation.title {
            let fragment = sanitize_filename(title);
            if is_safe_path_component(&fragment) {
                name.push('_');
                name.push_str(&fragment);
            }
        }
        name.push_str(".json");

        let path = self.output_dir.join(&name);
        self.ensure_under_output_dir(&path)?;
        Ok(path)
    }

    // The final authority on path safety: the resolved path must be a
    // direct descendant of the canonical output directory, with no parent
    // or root components past the prefix.
    fn ensure_under_output_dir(&self, path: &Path) -> Result<()> {
        let rejected = || {
            Error::PathTraversal(format!(
                "{} escapes output directory {}",
                path.display(),
                self.output_dir.display()
            ))
        };

        let relative = path.strip_prefix(&self.output_dir).map_err(|_| rejected())?;
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(rejected());
        }
        Ok(())
    }
}

/// Decode a base64 document body into UTF-8 text.
fn decode_document_body(body: &str) -> std::result::Result<String, String> {
    let bytes = BASE64
        .decode(body.trim())
        .map_err(|e| format!("base64 decode failed: {}", e))?;
    String::from_utf8(bytes).map_err(|e| format!("UTF-8 decode failed: {}", e))
}

/// Render decoded annotation content for persistence.
///
/// Valid JSON is pretty-printed; when a `Content` field holds nested
/// message JSON, a normalized `messages` array is added. Non-JSON content
/// is written verbatim, which is not an error.
fn render_transcript(decoded: &str) -> String {
    let parsed = match parse_lenient(decoded) {
        Some(parsed) => parsed,
        None => return decoded.to_string(),
    };

    let messages = extract_messages(&parsed);
    let output = match (parsed, messages) {
        (Value::Object(mut map), Some(messages)) => {
            map.insert(
                "messages".to_string(),
                serde_json::to_value(messages).unwrap_or(Value::Null),
            );
            Value::Object(map)
        }
        (parsed, _) => parsed,
    };

    serde_json::to_string_pretty(&output).unwrap_or_else(|_| decoded.to_string())
}

// Annotation bodies sometimes arrive with an extra layer of string
// escaping; retry the parse with common sequences unescaped before giving
// up on JSON.
fn parse_lenient(decoded: &str) -> Option<Value> {
    if let Ok(parsed) = serde_json::from_str(decoded) {
        return Some(parsed);
    }
    let unescaped = decoded
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
        .replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t");
    serde_json::from_str(&unescaped).ok()
}

/// Find a `Content` field holding nested message JSON and project each
/// entry through the [`TranscriptMessage`] filter.
fn extract_messages(parsed: &Value) -> Option<Vec<TranscriptMessage>> {
    let content = match parsed {
        Value::Object(map) => map.get("Content"),
        Value::Array(items) => items.iter().find_map(|item| item.get("Content")),
        _ => None,
    }?;

    let inner: Value = serde_json::from_str(content.as_str()?).ok()?;
    let entries = match inner {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("messages") {
            Some(Value::Array(entries)) => entries,
            _ => return None,
        },
        _ => return None,
    };

    Some(entries.iter().map(TranscriptMessage::from_value).collect())
}
