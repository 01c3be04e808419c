//! Typed client (W) against an Outline-compatible wiki REST surface.
//!
//! Every operation is a POST of a JSON body against `{base_url}/api/<rpc>`,
//! matching Outline's JSON-RPC-flavoured API. Errors are classified so the
//! caller (a reconciler or worker) can distinguish transient failures worth
//! retrying from permanent ones that should surface on the resource.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WikiError {
    #[error("network error calling wiki: {0}")]
    Network(String),
    #[error("wiki authentication failed: {0}")]
    Auth(String),
    #[error("wiki protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_template: bool,
}

#[derive(Debug, Clone)]
pub struct PageContent {
    pub id: String,
    pub title: String,
    pub markdown: String,
    pub slug: String,
}

#[derive(Debug, Clone)]
pub struct CreatePageRequest {
    pub title: String,
    pub text: String,
    pub collection_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdatePageRequest {
    pub id: String,
    pub title: Option<String>,
    pub text: String,
}

/// Stateless client configured with a base URL and a pre-trimmed bearer token.
#[derive(Clone)]
pub struct WikiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl WikiClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        insecure_skip_tls_verify: bool,
    ) -> Result<Self, WikiError> {
        let token = token.into().trim().to_string();
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .build()
            .map_err(|e| WikiError::Network(e.to_string()))?;
        Ok(WikiClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn endpoint(&self, rpc: &str) -> String {
        format!("{}/api/{}", self.base_url, rpc)
    }

    async fn post(&self, rpc: &str, body: Value) -> Result<Value, WikiError> {
        let response = self
            .http
            .post(self.endpoint(rpc))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    WikiError::Network(e.to_string())
                } else {
                    WikiError::Protocol(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(WikiError::Auth(format!("{} returned {}", rpc, status)));
        }
        if status.is_server_error() {
            return Err(WikiError::Network(format!("{} returned {}", rpc, status)));
        }
        if !status.is_success() {
            return Err(WikiError::Protocol(format!("{} returned {}", rpc, status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| WikiError::Protocol(e.to_string()))
    }

    /// `ListPages(ctx, collection_id?) -> [PageSummary]`. Drafts are included.
    pub async fn list_pages(
        &self,
        collection_id: Option<&str>,
    ) -> Result<Vec<PageSummary>, WikiError> {
        let mut body = json!({ "limit": 100 });
        if let Some(cid) = collection_id {
            body["collectionId"] = json!(cid);
        }
        let data = self.post("documents.list", body).await?;
        let items = data
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| WikiError::Protocol("documents.list: missing data array".into()))?;
        items
            .iter()
            .map(|v| serde_json::from_value(v.clone()).map_err(|e| WikiError::Protocol(e.to_string())))
            .collect()
    }

    /// `GetPageContent(ctx, page_id) -> {id, title, markdown, slug}`.
    pub async fn get_page_content(&self, page_id: &str) -> Result<PageContent, WikiError> {
        let data = self.post("documents.info", json!({ "id": page_id })).await?;
        let doc = data
            .get("data")
            .ok_or_else(|| WikiError::Protocol("documents.info: missing data".into()))?;
        Ok(PageContent {
            id: field(doc, "id")?,
            title: field(doc, "title")?,
            markdown: doc.get("text").and_then(Value::as_str).unwrap_or("").to_string(),
            slug: doc.get("urlId").and_then(Value::as_str).unwrap_or("").to_string(),
        })
    }

    /// `CreatePage(ctx, {title, text, collection_id?}) -> {id, title, slug}`.
    /// An absent `collection_id` creates an unfiled draft.
    pub async fn create_page(&self, req: CreatePageRequest) -> Result<PageSummary, WikiError> {
        let mut body = json!({
            "title": req.title,
            "text": req.text,
            "publish": false,
        });
        match req.collection_id {
            Some(cid) => body["collectionId"] = json!(cid),
            None => {}
        }
        let data = self.post("documents.create", body).await?;
        let doc = data
            .get("data")
            .ok_or_else(|| WikiError::Protocol("documents.create: missing data".into()))?;
        summary_from(doc)
    }

    /// `UpdatePage(ctx, {id, title?, text})`, returns the new slug.
    pub async fn update_page(&self, req: UpdatePageRequest) -> Result<PageSummary, WikiError> {
        let mut body = json!({ "id": req.id, "text": req.text });
        if let Some(title) = req.title {
            body["title"] = json!(title);
        }
        let data = self.post("documents.update", body).await?;
        let doc = data
            .get("data")
            .ok_or_else(|| WikiError::Protocol("documents.update: missing data".into()))?;
        summary_from(doc)
    }

    /// `PublishPage(ctx, {id}) -> {id, title, slug}`, promotes a draft to published.
    pub async fn publish_page(&self, id: &str) -> Result<PageSummary, WikiError> {
        let data = self
            .post("documents.update", json!({ "id": id, "publish": true }))
            .await?;
        let doc = data
            .get("data")
            .ok_or_else(|| WikiError::Protocol("documents.update(publish): missing data".into()))?;
        summary_from(doc)
    }

    /// Idempotent: a missing page is not signalled as an error upstream.
    pub async fn delete_page(&self, id: &str) -> Result<(), WikiError> {
        match self.post("documents.delete", json!({ "id": id })).await {
            Ok(_) => Ok(()),
            Err(WikiError::Protocol(msg)) if msg.contains("404") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Resolves a named collection, creating it if absent.
    pub async fn get_or_create_collection(&self, name: &str) -> Result<String, WikiError> {
        let data = self.post("collections.list", json!({ "limit": 100 })).await?;
        if let Some(items) = data.get("data").and_then(Value::as_array) {
            for item in items {
                if item.get("name").and_then(Value::as_str) == Some(name) {
                    return field(item, "id");
                }
            }
        }
        let created = self
            .post(
                "collections.create",
                json!({ "name": name, "permission": "read" }),
            )
            .await?;
        let collection = created
            .get("data")
            .ok_or_else(|| WikiError::Protocol("collections.create: missing data".into()))?;
        field(collection, "id")
    }
}

fn field(value: &Value, key: &str) -> Result<String, WikiError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WikiError::Protocol(format!("missing field `{key}`")))
}

fn summary_from(doc: &Value) -> Result<PageSummary, WikiError> {
    Ok(PageSummary {
        id: field(doc, "id")?,
        title: field(doc, "title")?,
        slug: doc.get("urlId").and_then(Value::as_str).unwrap_or("").to_string(),
        updated_at: doc
            .get("updatedAt")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        collection_id: doc
            .get("collectionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        language: None,
        is_draft: doc.get("publishedAt").map(Value::is_null).unwrap_or(true),
        is_template: doc.get("template").and_then(Value::as_bool).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_trimmed_on_construction() {
        let client = WikiClient::new("https://w.example", "  abc123 \n", false).unwrap();
        assert_eq!(client.token, "abc123");
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = WikiClient::new("https://w.example/", "abc", false).unwrap();
        assert_eq!(client.endpoint("documents.list"), "https://w.example/api/documents.list");
    }
}
