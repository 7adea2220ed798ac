//! Typed entity models at the client boundary
//!
//! Raw Dataverse records are loosely-typed JSON maps; converting them to
//! these structs as soon as they come off the wire keeps "missing field"
//! bugs out of the pipeline. Construction fails when the identifying field
//! is absent; every other field is optional.
//!
//! Join keys (`conversation_id`, `transcript_id`) are lookup values carried
//! alongside the entity in `*Row` wrappers, not inside it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

fn string_field(record: &Value, name: &str) -> Option<String> {
    record
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_field(record: &Value, name: &str, entity: &str) -> Result<String> {
    string_field(record, name).ok_or_else(|| {
        Error::Validation(format!(
            "missing required field {:?} in {} record",
            name, entity
        ))
    })
}

fn timestamp_field(record: &Value, name: &str) -> Option<DateTime<Utc>> {
    record
        .get(name)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// A live work item (conversation) in the workstream.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub created_on: Option<DateTime<Utc>>,
    pub workstream_id: Option<String>,
}

impl Conversation {
    pub fn from_record(record: &Value) -> Result<Self> {
        Ok(Self {
            id: required_field(record, "msdyn_ocliveworkitemid", "conversation")?,
            title: string_field(record, "msdyn_title"),
            created_on: timestamp_field(record, "createdon"),
            workstream_id: string_field(record, "_msdyn_liveworkstreamid_value"),
        })
    }
}

/// A transcript record attached to a conversation.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub id: String,
    pub name: Option<String>,
    pub created_on: Option<DateTime<Utc>>,
}

/// A transcript plus the conversation lookup value it joins on.
#[derive(Debug, Clone)]
pub struct TranscriptRow {
    /// Resolved lookup value; absent when the record carries no join key.
    pub conversation_id: Option<String>,
    pub transcript: Transcript,
}

impl TranscriptRow {
    /// Parse a transcript record, reading the join key from the configured
    /// lookup field.
    pub fn from_record(record: &Value, lookup_field: &str) -> Result<Self> {
        Ok(Self {
            conversation_id: string_field(record, lookup_field),
            transcript: Transcript {
                id: required_field(record, "msdyn_transcriptid", "transcript")?,
                name: string_field(record, "msdyn_name"),
                created_on: timestamp_field(record, "createdon"),
            },
        })
    }
}

/// An annotation used as blob storage for transcript content.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub id: String,
    pub document_body: Option<String>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

/// An annotation plus the transcript lookup value it joins on.
#[derive(Debug, Clone)]
pub struct AnnotationRow {
    pub transcript_id: Option<String>,
    pub annotation: Annotation,
}

impl AnnotationRow {
    pub fn from_record(record: &Value) -> Result<Self> {
        Ok(Self {
            transcript_id: string_field(record, "_objectid_value"),
            annotation: Annotation {
                id: required_field(record, "annotationid", "annotation")?,
                document_body: string_field(record, "documentbody"),
                filename: string_field(record, "filename"),
                mime_type: string_field(record, "mimetype"),
            },
        })
    }
}

/// Normalized inner message extracted from decoded annotation content.
///
/// Deliberately lossy: arbitrary nested JSON is filtered down to the fields
/// downstream consumers need, and everything else is dropped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptMessage {
    pub created_at: Option<String>,
    pub is_control_message: bool,
    pub content: Option<String>,
    pub content_type: Option<String>,
    pub from_app_name: Option<String>,
    pub from_app_id: Option<String>,
    pub from_user_id: Option<String>,
}

impl TranscriptMessage {
    /// Project an arbitrary message object down to the normalized subset.
    pub fn from_value(value: &Value) -> Self {
        let from = value.get("from");
        let application = from.and_then(|f| f.get("application"));
        let user = from.and_then(|f| f.get("user"));

        Self {
            created_at: string_field(value, "created")
                .or_else(|| string_field(value, "createdDateTime")),
            is_control_message: value
                .get("isControlMessage")
                .map(|v| v.as_bool().unwrap_or_else(|| v.as_str() == Some("True")))
                .unwrap_or(false),
            content: string_field(value, "content"),
            content_type: string_field(value, "contentType"),
            from_app_name: application
                .and_then(|a| a.get("displayName"))
                .and_then(Value::as_str)
                .map(str::to_string),
            from_app_id: application
                .and_then(|a| a.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            from_user_id: user
                .and_then(|u| u.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadSummary {
    pub total_conversations: usize,
    pub transcripts_found: usize,
    pub transcripts_downloaded: usize,
    pub errors: usize,
    pub files: Vec<std::path::PathBuf>,
}
