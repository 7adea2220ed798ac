//! HTTP client for the Dataverse Web API
//!
//! Thin, generic request layer over an OData v4 / FetchXML-capable API.
//! Both query styles follow `@odata.nextLink` continuation links; any
//! non-2xx response is a fatal error for that call. No retry or backoff
//! lives here; transient failures propagate to the caller.

pub mod entities;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// One page of an entity-set response.
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Optional OData query options for [`DataverseClient::query_entities`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub order_by: Option<String>,
    pub top: Option<u32>,
}

/// Client bound to one organization URL, API version, and bearer token.
#[derive(Debug)]
pub struct DataverseClient {
    http: reqwest::Client,
    base_url: String,
}

impl DataverseClient {
    /// Create a client with the fixed base path
    /// `{organization_url}/api/data/{api_version}` and default headers.
    pub fn new(access_token: &str, organization_url: &str, api_version: &str) -> Result<Self> {
        let base_url = format!(
            "{}/api/data/{}",
            organization_url.trim_end_matches('/'),
            api_version
        );

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", access_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| Error::Config(format!("invalid access token: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("OData-MaxVersion", HeaderValue::from_static("4.0"));
        headers.insert("OData-Version", HeaderValue::from_static("4.0"));
        headers.insert(
            "Prefer",
            HeaderValue::from_static("odata.include-annotations=*"),
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http, base_url })
    }

    /// Execute a FetchXML query against an entity set, following
    /// continuation links until exhausted.
    pub async fn execute_fetch_xml(
        &self,
        entity_set: &str,
        fetch_xml: &str,
    ) -> Result<Vec<Value>> {
        let url = format!(
            "{}/{}?fetchXml={}",
            self.base_url,
            entity_set,
            urlencoding::encode(fetch_xml)
        );
        self.collect_pages(url, false).await
    }

    /// Query an entity set with OData query options.
    ///
    /// Paginates via `@odata.nextLink` unless `top` is set, in which case
    /// only the first page is returned.
    pub async fn query_entities(
        &self,
        entity_set: &str,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        let url = format!(
            "{}/{}{}",
            self.base_url,
            entity_set,
            query_string(options)
        );
        self.collect_pages(url, options.top.is_some()).await
    }

    async fn collect_pages(&self, first_url: String, first_page_only: bool) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut url = first_url;

        loop {
            let page = self.get_page(&url).await?;
            records.extend(page.value);

            match next_page_url(first_page_only, page.next_link) {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(records)
    }

    async fn get_page(&self, url: &str) -> Result<Page> {
        tracing::debug!(url, "Dataverse GET");
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Api {
                status: status.as_u16(),
                message: truncate_message(&body),
            });
        }

        Ok(response.json().await?)
    }
}

/// Assemble the `?$filter=...&$select=...` suffix from the set options.
///
/// Empty options yield an empty string, not a bare `?`.
fn query_string(options: &QueryOptions) -> String {
    let mut params = Vec::new();
    if let Some(filter) = &options.filter {
        params.push(format!("$filter={}", filter));
    }
    if !options.select.is_empty() {
        params.push(format!("$select={}", options.select.join(",")));
    }
    if let Some(order_by) = &options.order_by {
        params.push(format!("$orderby={}", order_by));
    }
    if let Some(top) = options.top {
        params.push(format!("$top={}", top));
    }

    if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    }
}

// The continuation decision: a capped query stops after its first page,
// everything else follows the next link until the server omits it.
fn next_page_url(first_page_only: bool, next_link: Option<String>) -> Option<String> {
    if first_page_only {
        None
    } else {
        next_link
    }
}

// Error bodies can carry large payloads; keep log lines readable.
fn truncate_message(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_rejects_unprintable_token() {
        assert!(DataverseClient::new("bad\ntoken", "https://org.example.com", "v9.2").is_err());
        assert!(DataverseClient::new("good-token", "https://org.example.com", "v9.2").is_ok());
    }

    #[test]
    fn test_base_url_shape() {
        let client =
            DataverseClient::new("token", "https://org.example.com/", "v9.2").unwrap();
        assert_eq!(client.base_url, "https://org.example.com/api/data/v9.2");
    }

    #[test]
    fn test_page_parses_next_link() {
        let page: Page = serde_json::from_str(
            r#"{"value": [{"a": 1}], "@odata.nextLink": "https://next.example.com"}"#,
        )
        .unwrap();
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.next_link.as_deref(), Some("https://next.example.com"));

        let last: Page = serde_json::from_str(r#"{"value": []}"#).unwrap();
        assert!(last.next_link.is_none());
    }

    #[test]
    fn test_query_string_assembly() {
        assert_eq!(query_string(&QueryOptions::default()), "");

        let options = QueryOptions {
            filter: Some("statecode eq 1".to_string()),
            select: vec!["annotationid".to_string(), "filename".to_string()],
            order_by: Some("createdon desc".to_string()),
            top: Some(25),
        };
        assert_eq!(
            query_string(&options),
            "?$filter=statecode eq 1&$select=annotationid,filename\
             &$orderby=createdon desc&$top=25"
        );

        let options = QueryOptions {
            top: Some(1),
            ..Default::default()
        };
        assert_eq!(query_string(&options), "?$top=1");
    }

    #[test]
    fn test_capped_query_reads_first_page_only() {
        let next = Some("https://next.example.com".to_string());

        // A top-capped query never follows the continuation link
        assert!(next_page_url(true, next.clone()).is_none());
        assert!(next_page_url(true, None).is_none());

        // An uncapped query follows it until the server stops sending one
        assert_eq!(next_page_url(false, next).as_deref(), Some("https://next.example.com"));
        assert!(next_page_url(false, None).is_none());
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short"), "short");
        let long: String = std::iter::repeat('x').take(600).collect();
        let truncated = truncate_message(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with("..."));
    }
}
