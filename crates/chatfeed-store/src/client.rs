//! HTTP client for the remote document store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, trace};

use crate::stream::StreamClient;
use crate::{
    ChangeStream, CreateDocumentResponse, LIST_PAGE_SIZE, ListDocumentsResponse,
    MESSAGES_COLLECTION, MessageId, NewMessage, RemoteStore, SENT_AT_FIELD, StoreError,
    USERS_COLLECTION, UserRecord,
};

/// Client for a document store exposing the `users` and `messages`
/// collections over HTTP, with a WebSocket change stream.
pub struct StoreClient {
    http: Client,
    base_url: String,
    stream_url: String,
    token: Option<String>,
}

impl StoreClient {
    /// Create a new client for the given store URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let stream_url = derive_stream_url(&base_url);

        Self {
            http,
            base_url,
            stream_url,
            token: None,
        }
    }

    /// Send a bearer token with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Use a change stream endpoint other than the one derived from the base URL.
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get the store base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the change stream base URL.
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    fn documents_url(&self, collection: &str) -> String {
        format!("{}/v1/collections/{}/documents", self.base_url, collection)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.documents_url(collection), id)
    }

    fn listen_url(&self, collection: &str, order_by: &str) -> String {
        format!(
            "{}/v1/collections/{}/listen?orderBy={}",
            self.stream_url, collection, order_by
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// List one page of documents in a collection.
    pub async fn list_documents<T: DeserializeOwned>(
        &self,
        collection: &str,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse<T>, StoreError> {
        let mut query_params: Vec<(&str, String)> = Vec::new();
        if let Some(page_size) = page_size {
            query_params.push(("pageSize", page_size.to_string()));
        }
        if let Some(page_token) = page_token {
            query_params.push(("pageToken", page_token.to_string()));
        }

        let response = self
            .authorize(self.http.get(self.documents_url(collection)))
            .query(&query_params)
            .send()
            .await?;

        let response = check_status(response, collection, None).await?;
        Ok(response.json().await?)
    }

    /// List all documents in a collection (handles pagination).
    pub async fn list_all_documents<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<T>, StoreError> {
        let mut all_documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response: ListDocumentsResponse<T> = self
                .list_documents(collection, Some(LIST_PAGE_SIZE), page_token.as_deref())
                .await?;

            all_documents.extend(response.documents);

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(collection = %collection, count = all_documents.len(), "listed collection");
        Ok(all_documents)
    }

    /// Create a document; the store assigns its id.
    pub async fn create_document<T: Serialize>(
        &self,
        collection: &str,
        document: &T,
    ) -> Result<CreateDocumentResponse, StoreError> {
        let response = self
            .authorize(self.http.post(self.documents_url(collection)))
            .json(document)
            .send()
            .await?;

        let response = check_status(response, collection, None).await?;
        let created: CreateDocumentResponse = response.json().await?;
        debug!(collection = %collection, id = %created.id, "created document");
        Ok(created)
    }

    /// Update the given fields of an existing document.
    pub async fn update_document<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        fields: &T,
    ) -> Result<(), StoreError> {
        let response = self
            .authorize(self.http.patch(self.document_url(collection, id)))
            .json(fields)
            .send()
            .await?;

        check_status(response, collection, Some(id)).await?;
        debug!(collection = %collection, id = %id, "updated document");
        Ok(())
    }

    /// Delete a document.
    pub async fn delete_document(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let response = self
            .authorize(self.http.delete(self.document_url(collection, id)))
            .send()
            .await?;

        check_status(response, collection, Some(id)).await?;
        debug!(collection = %collection, id = %id, "deleted document");
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for StoreClient {
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.list_all_documents(USERS_COLLECTION).await
    }

    async fn subscribe_messages(&self) -> Result<ChangeStream, StoreError> {
        let mut stream = StreamClient::new(self.listen_url(MESSAGES_COLLECTION, SENT_AT_FIELD));
        if let Some(token) = &self.token {
            stream = stream.with_token(token.clone());
        }
        stream.connect().await
    }

    async fn create_message(&self, draft: &NewMessage) -> Result<MessageId, StoreError> {
        let created = self.create_document(MESSAGES_COLLECTION, draft).await?;
        Ok(created.id)
    }

    async fn update_message_text(&self, id: &MessageId, text: &str) -> Result<(), StoreError> {
        #[derive(Serialize)]
        struct TextPatch<'a> {
            text: &'a str,
        }

        self.update_document(MESSAGES_COLLECTION, id.as_str(), &TextPatch { text })
            .await
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
        self.delete_document(MESSAGES_COLLECTION, id.as_str()).await
    }
}

/// Map a `http(s)` store URL to its `ws(s)` counterpart.
fn derive_stream_url(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    }
}

/// Turn a non-success response into a `StoreError`.
async fn check_status(
    response: reqwest::Response,
    collection: &str,
    id: Option<&str>,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        return Err(StoreError::RateLimited { retry_after_secs });
    }

    if status == StatusCode::NOT_FOUND
        && let Some(id) = id
    {
        return Err(StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    let text = response.text().await.map_err(|e| {
        StoreError::InvalidResponse(format!(
            "request failed ({}): failed to read response: {}",
            status, e
        ))
    })?;
    trace!(status = %status, body = %text, "store request failed");

    let api_error = serde_json::from_str::<ApiError>(&text).ok();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let message = api_error
            .map(|e| e.message)
            .unwrap_or_else(|| format!("{} on {}", status, collection));
        return Err(StoreError::PermissionDenied(message));
    }

    match api_error {
        Some(api_error) => Err(StoreError::Api {
            status: status.as_u16(),
            error: api_error.error,
            message: api_error.message,
        }),
        None => Err(StoreError::InvalidResponse(format!(
            "request failed ({}): {}",
            status, text
        ))),
    }
}

/// Store API error response format.
#[derive(Debug, serde::Deserialize)]
struct ApiError {
    error: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_client_creation() {
        let client = StoreClient::new("https://example.com/");
        assert_eq!(client.base_url(), "https://example.com");
        assert_eq!(client.stream_url(), "wss://example.com");
    }

    #[test]
    fn test_stream_url_derivation() {
        assert_eq!(derive_stream_url("http://localhost:8080"), "ws://localhost:8080");
        assert_eq!(derive_stream_url("https://store.example"), "wss://store.example");
        assert_eq!(derive_stream_url("wss://already"), "wss://already");
    }

    #[test]
    fn test_listen_url() {
        let client =
            StoreClient::new("https://example.com").with_stream_url("wss://stream.example.com/");
        assert_eq!(
            client.listen_url(MESSAGES_COLLECTION, SENT_AT_FIELD),
            "wss://stream.example.com/v1/collections/messages/listen?orderBy=sentAt"
        );
    }

    #[tokio::test]
    async fn test_list_users_follows_page_tokens() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/collections/users/documents"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "documents": [{"id": "u2", "firstName": "B", "lastname": "Two"}]
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/collections/users/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "documents": [{"id": "u1", "firstName": "A", "lastname": "One"}],
                "nextPageToken": "p2"
            })))
            .mount(&mock_server)
            .await;

        let client = StoreClient::new(mock_server.uri());
        let users = client.list_users().await.unwrap();

        let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_create_message_sends_token_and_draft() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/collections/messages/documents"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({"text": "hello", "sentBy": "u1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m42",
                "sentAt": "2024-01-23T10:00:00Z"
            })))
            .mount(&mock_server)
            .await;

        let client = StoreClient::new(mock_server.uri()).with_token("secret");
        let id = client
            .create_message(&NewMessage::new("hello", UserId::from("u1")))
            .await
            .unwrap();

        assert_eq!(id, MessageId::from("m42"));
    }

    #[tokio::test]
    async fn test_update_message_patches_text_only() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/v1/collections/messages/documents/m1"))
            .and(body_json(serde_json::json!({"text": "edited"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = StoreClient::new(mock_server.uri());
        client
            .update_message_text(&MessageId::from("m1"), "edited")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/v1/collections/messages/documents/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = StoreClient::new(mock_server.uri());
        let result = client.delete_message(&MessageId::from("missing")).await;

        assert!(matches!(result.unwrap_err(), StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/v1/collections/messages/documents/m1"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "PermissionDenied",
                "message": "not the author"
            })))
            .mount(&mock_server)
            .await;

        let client = StoreClient::new(mock_server.uri());
        let err = client
            .update_message_text(&MessageId::from("m1"), "x")
            .await
            .unwrap_err();

        match err {
            StoreError::PermissionDenied(message) => assert_eq!(message, "not the author"),
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/collections/users/documents"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&mock_server)
            .await;

        let client = StoreClient::new(mock_server.uri());
        let err = client.list_users().await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::RateLimited {
                retry_after_secs: Some(7)
            }
        ));
    }

    #[tokio::test]
    async fn test_api_error_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/collections/messages/documents"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "Internal",
                "message": "boom"
            })))
            .mount(&mock_server)
            .await;

        let client = StoreClient::new(mock_server.uri());
        let err = client
            .create_message(&NewMessage::new("hi", UserId::from("u1")))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Api { status: 500, .. }));
    }
}
