//! Injection-safe FetchXML builders
//!
//! Every literal interpolated into a query is validated (GUIDs) and escaped
//! (everything) before it reaches the XML. Batched joins use a single `in`
//! condition per batch instead of one query per id.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::validators::{escape_xml_value, validate_guid};

/// Derive the FetchXML condition attribute from an OData lookup field name,
/// e.g. `_msdyn_liveworkitemid_value` -> `msdyn_liveworkitemid`.
pub fn lookup_attribute(lookup_field: &str) -> &str {
    lookup_field
        .strip_prefix('_')
        .unwrap_or(lookup_field)
        .strip_suffix("_value")
        .unwrap_or(lookup_field)
}

/// Conversations in a workstream created on or after a cutoff, newest
/// first, capped at `top`.
pub fn conversations_query(
    workstream_id: &str,
    created_after: DateTime<Utc>,
    top: u32,
    closed_only: bool,
) -> Result<String> {
    let workstream_id = escape_xml_value(validate_guid(workstream_id, "workstream_id")?);
    let cutoff = created_after.format("%Y-%m-%dT%H:%M:%SZ");

    let state_condition = if closed_only {
        "\n        <condition attribute='statecode' operator='eq' value='1'/>"
    } else {
        ""
    };

    Ok(format!(
        "<fetch top='{top}'>\
         \n  <entity name='msdyn_ocliveworkitem'>\
         \n    <attribute name='msdyn_ocliveworkitemid'/>\
         \n    <attribute name='msdyn_title'/>\
         \n    <attribute name='createdon'/>\
         \n    <attribute name='msdyn_liveworkstreamid'/>\
         \n    <filter type='and'>\
         \n      <condition attribute='msdyn_liveworkstreamid' operator='eq' value='{workstream_id}'/>\
         \n      <condition attribute='createdon' operator='ge' value='{cutoff}'/>{state_condition}\
         \n    </filter>\
         \n    <order attribute='createdon' descending='true'/>\
         \n  </entity>\
         \n</fetch>"
    ))
}

/// Transcripts whose conversation lookup matches any id in the batch.
pub fn transcripts_by_conversation_query(
    lookup_field: &str,
    conversation_ids: &[String],
) -> Result<String> {
    let attribute = lookup_attribute(lookup_field);
    let condition = in_condition(attribute, conversation_ids, "conversation id")?;

    Ok(format!(
        "<fetch>\
         \n  <entity name='msdyn_transcript'>\
         \n    <attribute name='msdyn_transcriptid'/>\
         \n    <attribute name='msdyn_name'/>\
         \n    <attribute name='createdon'/>\
         \n    <attribute name='{attribute}'/>\
         \n    <filter>\
         \n      {condition}\
         \n    </filter>\
         \n  </entity>\
         \n</fetch>"
    ))
}

/// Annotations whose `objectid` lookup matches any id in the batch.
pub fn annotations_by_object_query(object_ids: &[String]) -> Result<String> {
    let condition = in_condition("objectid", object_ids, "transcript id")?;

    Ok(format!(
        "<fetch>\
         \n  <entity name='annotation'>\
         \n    <attribute name='annotationid'/>\
         \n    <attribute name='documentbody'/>\
         \n    <attribute name='filename'/>\
         \n    <attribute name='mimetype'/>\
         \n    <attribute name='objectid'/>\
         \n    <filter>\
         \n      {condition}\
         \n    </filter>\
         \n  </entity>\
         \n</fetch>"
    ))
}

// An `in` condition listing each validated, escaped GUID as a value child.
fn in_condition(attribute: &str, ids: &[String], field_name: &str) -> Result<String> {
    let mut condition = format!("<condition attribute='{}' operator='in'>", attribute);
    for id in ids {
        let id = escape_xml_value(validate_guid(id, field_name)?);
        condition.push_str(&format!("<value>{}</value>", id));
    }
    condition.push_str("</condition>");
    Ok(condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WORKSTREAM: &str = "bf8ebd2e-9043-4deb-b11f-d2fa48afc455";

    fn guid(n: u8) -> String {
        format!("{n:08x}-1111-2222-3333-444444444444")
    }

    #[test]
    fn test_lookup_attribute() {
        assert_eq!(
            lookup_attribute("_msdyn_liveworkitemid_value"),
            "msdyn_liveworkitemid"
        );
        assert_eq!(lookup_attribute("msdyn_liveworkitemid"), "msdyn_liveworkitemid");
    }

    #[test]
    fn test_conversations_query_contents() {
        let cutoff = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let xml = conversations_query(WORKSTREAM, cutoff, 50, false).unwrap();

        assert!(xml.starts_with("<fetch top='50'>"));
        assert!(xml.contains(&format!("value='{}'", WORKSTREAM)));
        assert!(xml.contains("operator='ge' value='2025-06-01T00:00:00Z'"));
        assert!(xml.contains("<order attribute='createdon' descending='true'/>"));
        assert!(!xml.contains("statecode"));

        let closed = conversations_query(WORKSTREAM, cutoff, 50, true).unwrap();
        assert!(closed.contains("<condition attribute='statecode' operator='eq' value='1'/>"));
    }

    #[test]
    fn test_conversations_query_rejects_injection() {
        let cutoff = Utc::now();
        let hostile = "x'/><entity name='systemuser";
        assert!(conversations_query(hostile, cutoff, 10, false).is_err());
    }

    #[test]
    fn test_in_condition_lists_all_batch_ids() {
        let ids: Vec<String> = (0..3).map(guid).collect();
        let xml = transcripts_by_conversation_query("_msdyn_liveworkitemid_value", &ids).unwrap();

        assert!(xml.contains("<condition attribute='msdyn_liveworkitemid' operator='in'>"));
        for id in &ids {
            assert!(xml.contains(&format!("<value>{}</value>", id)));
        }
        assert!(xml.contains("<attribute name='msdyn_liveworkitemid'/>"));
    }

    #[test]
    fn test_in_condition_rejects_non_guid() {
        let ids = vec![guid(1), "not-a-guid".to_string()];
        assert!(annotations_by_object_query(&ids).is_err());
    }

    #[test]
    fn test_annotations_query_contents() {
        let ids = vec![guid(7)];
        let xml = annotations_by_object_query(&ids).unwrap();
        assert!(xml.contains("<entity name='annotation'>"));
        assert!(xml.contains("<condition attribute='objectid' operator='in'>"));
        assert!(xml.contains("<attribute name='documentbody'/>"));
    }
}
