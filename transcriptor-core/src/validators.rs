//! Validation and escaping utilities for safe query and filename handling.
//!
//! Every literal interpolated into a FetchXML or OData query goes through
//! these functions first: GUIDs are validated exactly, everything else is
//! escaped. Filenames built from human-supplied titles pass through
//! [`sanitize_filename`] and [`is_safe_path_component`] before the
//! output-directory prefix check at write time.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Check if a string is a canonical 8-4-4-4-12 hex GUID (any case).
pub fn is_valid_guid(value: &str) -> bool {
    // The uuid parser accepts simple/braced/urn forms too; restricting to
    // 36 bytes leaves exactly the hyphenated canonical form.
    value.len() == 36 && Uuid::parse_str(value).is_ok()
}

/// Validate that a string is a canonical GUID and return it unchanged.
///
/// Case is preserved; an invalid value is a hard [`Error::Validation`],
/// never coerced.
pub fn validate_guid<'a>(value: &'a str, field_name: &str) -> Result<&'a str> {
    if !is_valid_guid(value) {
        return Err(Error::Validation(format!(
            "invalid GUID format for {}: {:?}",
            field_name, value
        )));
    }
    Ok(value)
}

/// Escape a value for safe use as a FetchXML literal.
pub fn escape_xml_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escape a value for safe use in an OData `$filter` string literal.
pub fn escape_odata_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Check if a string is safe to use as a single path component.
///
/// Rejects empty strings, `..` anywhere, leading separators, and the
/// characters `: * ? " < > |` and NUL. The output-directory prefix check
/// at write time remains the final authority.
pub fn is_safe_path_component(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if value.contains("..") || value.starts_with('/') || value.starts_with('\\') {
        return false;
    }
    !value
        .chars()
        .any(|c| matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'))
}

/// Sanitize a human-supplied title for use inside a filename.
///
/// Replaces filesystem-hostile characters with `_` and truncates to 100
/// characters.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\0' => '_',
            other => other,
        })
        .take(100)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID: &str = "11111111-2222-3333-4444-555555555555";

    #[test]
    fn test_valid_guids_pass_unchanged() {
        assert_eq!(validate_guid(GUID, "id").unwrap(), GUID);

        // Case is preserved, not normalized
        let mixed = "AbCdEf01-2345-6789-abcd-EF0123456789";
        assert_eq!(validate_guid(mixed, "id").unwrap(), mixed);
    }

    #[test]
    fn test_invalid_guids_rejected() {
        for bad in [
            "",
            "not-a-guid",
            "11111111222233334444555555555555",              // no hyphens
            "{11111111-2222-3333-4444-555555555555}",        // braced
            "urn:uuid:11111111-2222-3333-4444-555555555555", // urn form
            "11111111-2222-3333-4444-55555555555",           // short
            "11111111-2222-3333-4444-5555555555556",         // long
            "1' or '1'='1",
        ] {
            assert!(
                validate_guid(bad, "id").is_err(),
                "should reject {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_escape_xml_value() {
        assert_eq!(
            escape_xml_value(r#"<a & "b" & 'c'>"#),
            "&lt;a &amp; &quot;b&quot; &amp; &apos;c&apos;&gt;"
        );

        let escaped = escape_xml_value("a<b>&'\"");
        for c in ['<', '>', '\'', '"'] {
            assert!(!escaped.contains(c), "unescaped {:?} in {:?}", c, escaped);
        }
        // '&' only appears as part of an entity
        for (i, _) in escaped.match_indices('&') {
            assert!(escaped[i..].starts_with("&amp;")
                || escaped[i..].starts_with("&lt;")
                || escaped[i..].starts_with("&gt;")
                || escaped[i..].starts_with("&quot;")
                || escaped[i..].starts_with("&apos;"));
        }
    }

    #[test]
    fn test_escape_xml_value_plain_passthrough() {
        assert_eq!(escape_xml_value("plain text 123"), "plain text 123");
    }

    #[test]
    fn test_escape_odata_string() {
        assert_eq!(escape_odata_string("O'Brien"), "O''Brien");
        assert_eq!(escape_odata_string("no quotes"), "no quotes");
    }

    #[test]
    fn test_safe_path_components() {
        assert!(is_safe_path_component("billing-issue"));
        assert!(is_safe_path_component("Chat 42"));

        assert!(!is_safe_path_component(""));
        assert!(!is_safe_path_component("../../etc/passwd"));
        assert!(!is_safe_path_component("/absolute"));
        assert!(!is_safe_path_component("\\windows"));
        assert!(!is_safe_path_component("a:b"));
        assert!(!is_safe_path_component("what?"));
        assert!(!is_safe_path_component("a|b"));
        assert!(!is_safe_path_component("nul\0byte"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename("<title?>"), "_title__");

        let long: String = std::iter::repeat('x').take(250).collect();
        assert_eq!(sanitize_filename(&long).chars().count(), 100);
    }
}
