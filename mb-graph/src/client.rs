use crate::error::{GraphError, Result};
use crate::profile::{ProfileField, ProfileSetting};
use crate::tokens::PageTokens;
use crate::types::{
    AttachmentPayload, AttachmentType, MessageBody, OutgoingAttachment, OutgoingMessage,
    QuickReply, SendResponse, SenderAction, USER_PROFILE_FIELDS, UserProfile,
};
use reqwest::{Method, Url};
use std::time::Duration;

pub const DEFAULT_GRAPH_API_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_GRAPH_API_VERSION: &str = "v20.0";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Stateless Graph API client. Every call resolves its page token first, so
/// credential problems surface before a request is built.
#[derive(Clone, Debug)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    tokens: PageTokens,
}

impl GraphClient {
    pub fn new(tokens: PageTokens) -> Result<Self> {
        Ok(Self {
            http: build_http_client(DEFAULT_REQUEST_TIMEOUT)?,
            base_url: DEFAULT_GRAPH_API_BASE_URL.to_string(),
            api_version: DEFAULT_GRAPH_API_VERSION.to_string(),
            tokens,
        })
    }

    pub fn with_api_base(mut self, base_url: &str, api_version: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        Url::parse(base_url)
            .map_err(|e| GraphError::Configuration(format!("invalid graph api base url: {e}")))?;
        let api_version = api_version.trim().trim_matches('/');
        if api_version.is_empty() {
            return Err(GraphError::Configuration(
                "graph api version must not be empty".to_string(),
            ));
        }
        self.base_url = base_url.to_string();
        self.api_version = api_version.to_string();
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = build_http_client(timeout)?;
        Ok(self)
    }

    pub fn tokens(&self) -> &PageTokens {
        &self.tokens
    }

    pub fn is_multi_page(&self) -> bool {
        self.tokens.is_multi_page()
    }

    /// `{base}/{version}/{segments..}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| GraphError::Configuration(format!("invalid graph api url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| {
                GraphError::Configuration("graph api base url cannot carry a path".to_string())
            })?
            .pop_if_empty()
            .push(&self.api_version)
            .extend(segments);
        Ok(url)
    }

    #[tracing::instrument(level = "info", skip_all, fields(page_id = ?page_id))]
    pub async fn send_message(
        &self,
        page_id: Option<&str>,
        message: &OutgoingMessage,
    ) -> Result<SendResponse> {
        if message.recipient.id.trim().is_empty() {
            return Err(GraphError::InvalidInput("recipient id is required".to_string()));
        }
        let token = self.tokens.resolve(page_id)?;
        let url = self.endpoint(&["me", "messages"])?;
        let request = self
            .http
            .post(url)
            .query(&[("access_token", token)])
            .json(message);
        let body = self.execute(request, "send_message").await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn send_text(
        &self,
        page_id: Option<&str>,
        recipient_id: &str,
        text: &str,
    ) -> Result<SendResponse> {
        if text.trim().is_empty() {
            return Err(GraphError::InvalidInput("message text is empty".to_string()));
        }
        self.send_message(page_id, &OutgoingMessage::text(recipient_id, text))
            .await
    }

    pub async fn send_quick_replies(
        &self,
        page_id: Option<&str>,
        recipient_id: &str,
        text: &str,
        quick_replies: Vec<QuickReply>,
    ) -> Result<SendResponse> {
        if quick_replies.is_empty() {
            return Err(GraphError::InvalidInput(
                "at least one quick reply is required".to_string(),
            ));
        }
        let body = MessageBody {
            text: Some(text.to_string()),
            quick_replies,
            ..MessageBody::default()
        };
        self.send_message(page_id, &OutgoingMessage::message(recipient_id, body))
            .await
    }

    pub async fn send_attachment(
        &self,
        page_id: Option<&str>,
        recipient_id: &str,
        kind: AttachmentType,
        url: &str,
    ) -> Result<SendResponse> {
        if !kind.is_sendable_media() {
            return Err(GraphError::InvalidInput(format!(
                "{} attachments cannot be sent by url",
                kind.as_str()
            )));
        }
        let body = MessageBody {
            attachment: Some(OutgoingAttachment {
                kind,
                payload: AttachmentPayload {
                    url: url.to_string(),
                    is_reusable: None,
                },
            }),
            ..MessageBody::default()
        };
        self.send_message(page_id, &OutgoingMessage::message(recipient_id, body))
            .await
    }

    pub async fn send_sender_action(
        &self,
        page_id: Option<&str>,
        recipient_id: &str,
        action: SenderAction,
    ) -> Result<SendResponse> {
        self.send_message(
            page_id,
            &OutgoingMessage::sender_action(recipient_id, action),
        )
        .await
    }

    /// Current value of one profile field, or `Null` when it is unset.
    #[tracing::instrument(level = "info", skip_all, fields(page_id = ?page_id, field = %field))]
    pub async fn get_profile_setting(
        &self,
        page_id: Option<&str>,
        field: ProfileField,
    ) -> Result<serde_json::Value> {
        let token = self.tokens.resolve(page_id)?;
        let url = self.endpoint(&["me", "messenger_profile"])?;
        let request = self
            .http
            .get(url)
            .query(&[("fields", field.as_str()), ("access_token", token)]);
        let body = self.execute(request, "get_profile_setting").await?;
        Ok(body
            .get("data")
            .and_then(|data| data.get(0))
            .and_then(|entry| entry.get(field.as_str()))
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    #[tracing::instrument(level = "info", skip_all, fields(page_id = ?page_id, field = %setting.field()))]
    pub async fn set_profile_setting(
        &self,
        page_id: Option<&str>,
        setting: &ProfileSetting,
    ) -> Result<serde_json::Value> {
        self.profile_request(Method::POST, page_id, setting.to_body(), "set_profile_setting")
            .await
    }

    #[tracing::instrument(level = "info", skip_all, fields(page_id = ?page_id, field = %field))]
    pub async fn remove_profile_setting(
        &self,
        page_id: Option<&str>,
        field: ProfileField,
    ) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "fields": [field.as_str()] });
        self.profile_request(Method::DELETE, page_id, body, "remove_profile_setting")
            .await
    }

    async fn profile_request(
        &self,
        method: Method,
        page_id: Option<&str>,
        body: serde_json::Value,
        operation: &'static str,
    ) -> Result<serde_json::Value> {
        let token = self.tokens.resolve(page_id)?;
        let url = self.endpoint(&["me", "messenger_profile"])?;
        let request = self
            .http
            .request(method, url)
            .query(&[("access_token", token)])
            .json(&body);
        self.execute(request, operation).await
    }

    /// Public profile of a user as seen by `page_id`.
    #[tracing::instrument(level = "info", skip_all, fields(page_id = ?page_id))]
    pub async fn user_profile(&self, page_id: Option<&str>, user_id: &str) -> Result<UserProfile> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(GraphError::InvalidInput("user id is required".to_string()));
        }
        if !is_graph_node_id(user_id) {
            return Err(GraphError::InvalidInput(format!(
                "user id {user_id:?} is not a graph node id"
            )));
        }
        let token = self.tokens.resolve(page_id)?;
        let url = self.endpoint(&[user_id])?;
        let request = self
            .http
            .get(url)
            .query(&[("fields", USER_PROFILE_FIELDS), ("access_token", token)]);
        let body = self.execute(request, "user_profile").await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<serde_json::Value> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let parsed = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<serde_json::Value>(&text).ok()
        };

        if let Some(error) = parsed.as_ref().and_then(|body| body.get("error")) {
            let err = upstream_error(status.as_u16(), error);
            tracing::warn!(operation, status = status.as_u16(), %err, "graph api call failed");
            return Err(err);
        }
        if !status.is_success() {
            tracing::warn!(operation, status = status.as_u16(), "graph api call failed");
            return Err(GraphError::Upstream {
                status: status.as_u16(),
                code: None,
                message: truncate(&text, MAX_ERROR_BODY_CHARS),
            });
        }

        tracing::debug!(operation, status = status.as_u16(), "graph api call succeeded");
        parsed.ok_or_else(|| {
            GraphError::ResponseFormat(format!("{operation}: response body is not json"))
        })
    }
}

/// Page-scoped ids are numeric; letters, `-` and `_` are allowed for test
/// and app-scoped ids. Anything else could change the request path.
fn is_graph_node_id(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn upstream_error(status: u16, error: &serde_json::Value) -> GraphError {
    let message = error
        .get("message")
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| truncate(&error.to_string(), MAX_ERROR_BODY_CHARS));
    GraphError::Upstream {
        status,
        code: error.get("code").and_then(|v| v.as_i64()),
        message,
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::GraphClient;
    use crate::error::GraphError;
    use crate::profile::{ProfileField, ProfileSetting};
    use crate::tokens::PageTokens;
    use crate::types::{AttachmentType, SenderAction};
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{Method, StatusCode, Uri};
    use axum::response::IntoResponse;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct RecordedRequest {
        method: Method,
        path: String,
        query: HashMap<String, String>,
        body: serde_json::Value,
    }

    #[derive(Clone)]
    struct MockGraph {
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
        status: StatusCode,
        response: serde_json::Value,
    }

    impl MockGraph {
        fn request_count(&self) -> usize {
            self.requests.lock().expect("requests lock").len()
        }

        fn last_request(&self) -> RecordedRequest {
            self.requests
                .lock()
                .expect("requests lock")
                .last()
                .cloned()
                .expect("at least one request")
        }
    }

    async fn record(
        State(mock): State<MockGraph>,
        method: Method,
        uri: Uri,
        body: Bytes,
    ) -> impl IntoResponse {
        let query = uri
            .query()
            .unwrap_or_default()
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        mock.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                method,
                path: uri.path().to_string(),
                query,
                body,
            });
        (mock.status, axum::Json(mock.response.clone()))
    }

    async fn spawn_mock(status: StatusCode, response: serde_json::Value) -> (MockGraph, String) {
        let mock = MockGraph {
            requests: Arc::new(Mutex::new(Vec::new())),
            status,
            response,
        };
        let app = Router::new().fallback(record).with_state(mock.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock graph api");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock graph api");
        });
        (mock, format!("http://{addr}"))
    }

    fn single_page_client(base_url: &str) -> GraphClient {
        GraphClient::new(PageTokens::Single("page-token".to_string()))
            .expect("client")
            .with_api_base(base_url, "v20.0")
            .expect("api base")
    }

    fn multi_page_client(base_url: &str) -> GraphClient {
        let tokens = PageTokens::from_parts(
            None,
            Some(HashMap::from([
                ("page-a".to_string(), "token-a".to_string()),
                ("page-b".to_string(), "token-b".to_string()),
            ])),
        )
        .expect("tokens");
        GraphClient::new(tokens)
            .expect("client")
            .with_api_base(base_url, "v20.0")
            .expect("api base")
    }

    #[tokio::test]
    async fn send_text_posts_to_messages_endpoint_with_page_token() {
        let (mock, base_url) = spawn_mock(
            StatusCode::OK,
            json!({ "recipient_id": "user-1", "message_id": "mid.1" }),
        )
        .await;
        let client = single_page_client(&base_url);

        let response = client
            .send_text(None, "user-1", "Hello")
            .await
            .expect("send text");
        assert_eq!(response.recipient_id.as_deref(), Some("user-1"));
        assert_eq!(response.message_id.as_deref(), Some("mid.1"));

        let request = mock.last_request();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/v20.0/me/messages");
        assert_eq!(
            request.query.get("access_token").map(String::as_str),
            Some("page-token")
        );
        assert_eq!(request.body["recipient"]["id"], "user-1");
        assert_eq!(request.body["message"]["text"], "Hello");
    }

    #[tokio::test]
    async fn multi_page_call_without_page_id_fails_before_any_request() {
        let (mock, base_url) = spawn_mock(StatusCode::OK, json!({})).await;
        let client = multi_page_client(&base_url);

        let err = client
            .send_text(None, "user-1", "Hello")
            .await
            .expect_err("page id is required");
        assert!(err.is_configuration());

        let err = client
            .user_profile(None, "user-1")
            .await
            .expect_err("page id is required");
        assert!(err.is_configuration());

        let err = client
            .remove_profile_setting(Some("page-unknown"), ProfileField::Greeting)
            .await
            .expect_err("unknown page");
        assert!(err.is_configuration());

        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn multi_page_call_uses_token_of_requested_page() {
        let (mock, base_url) = spawn_mock(
            StatusCode::OK,
            json!({ "first_name": "John-David", "gender": "male", "id": "user-1" }),
        )
        .await;
        let client = multi_page_client(&base_url);

        let profile = client
            .user_profile(Some("page-b"), "user-1")
            .await
            .expect("user profile");
        assert_eq!(profile.first_name.as_deref(), Some("John-David"));
        assert_eq!(profile.gender.as_deref(), Some("male"));

        let request = mock.last_request();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.path, "/v20.0/user-1");
        assert_eq!(
            request.query.get("access_token").map(String::as_str),
            Some("token-b")
        );
    }

    #[tokio::test]
    async fn error_object_in_body_is_an_upstream_error() {
        let (_mock, base_url) = spawn_mock(
            StatusCode::BAD_REQUEST,
            json!({
                "error": {
                    "message": "Invalid OAuth access token.",
                    "type": "OAuthException",
                    "code": 190,
                }
            }),
        )
        .await;
        let client = single_page_client(&base_url);

        let err = client
            .send_sender_action(None, "user-1", SenderAction::TypingOn)
            .await
            .expect_err("upstream error");
        match err {
            GraphError::Upstream {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(190));
                assert_eq!(message, "Invalid OAuth access token.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_message_never_contains_access_token() {
        let (_mock, base_url) = spawn_mock(StatusCode::INTERNAL_SERVER_ERROR, json!("boom")).await;
        let client = single_page_client(&base_url);

        let err = client
            .get_profile_setting(None, ProfileField::Greeting)
            .await
            .expect_err("server error");
        assert!(matches!(err, GraphError::Upstream { status: 500, .. }));
        assert!(!err.to_string().contains("page-token"));
    }

    #[tokio::test]
    async fn profile_calls_use_messenger_profile_endpoint() {
        let (mock, base_url) = spawn_mock(StatusCode::OK, json!({ "result": "success" })).await;
        let client = single_page_client(&base_url);

        let result = client
            .set_profile_setting(
                None,
                &ProfileSetting::WhitelistedDomains(vec!["https://example.com/".to_string()]),
            )
            .await
            .expect("set whitelisted domains");
        assert_eq!(result["result"], "success");
        let request = mock.last_request();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/v20.0/me/messenger_profile");
        assert_eq!(
            request.body,
            json!({ "whitelisted_domains": ["https://example.com/"] })
        );

        client
            .remove_profile_setting(None, ProfileField::WhitelistedDomains)
            .await
            .expect("remove whitelisted domains");
        let request = mock.last_request();
        assert_eq!(request.method, Method::DELETE);
        assert_eq!(request.body, json!({ "fields": ["whitelisted_domains"] }));
    }

    #[tokio::test]
    async fn get_profile_setting_extracts_field_from_data() {
        let (mock, base_url) = spawn_mock(
            StatusCode::OK,
            json!({ "data": [{ "get_started": { "payload": "START" } }] }),
        )
        .await;
        let client = single_page_client(&base_url);

        let value = client
            .get_profile_setting(None, ProfileField::GetStarted)
            .await
            .expect("get started");
        assert_eq!(value, json!({ "payload": "START" }));
        assert_eq!(
            mock.last_request().query.get("fields").map(String::as_str),
            Some("get_started")
        );

        let missing = client
            .get_profile_setting(None, ProfileField::Greeting)
            .await
            .expect("greeting");
        assert!(missing.is_null());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_without_a_request() {
        let (mock, base_url) = spawn_mock(StatusCode::OK, json!({})).await;
        let client = single_page_client(&base_url);

        assert!(matches!(
            client
                .send_attachment(None, "user-1", AttachmentType::Location, "https://x")
                .await,
            Err(GraphError::InvalidInput(_))
        ));
        assert!(matches!(
            client.send_text(None, "user-1", "   ").await,
            Err(GraphError::InvalidInput(_))
        ));
        assert!(matches!(
            client.send_quick_replies(None, "user-1", "pick", vec![]).await,
            Err(GraphError::InvalidInput(_))
        ));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn user_ids_that_would_change_the_request_path_are_rejected() {
        let (mock, base_url) = spawn_mock(StatusCode::OK, json!({})).await;
        let client = single_page_client(&base_url);

        for user_id in ["../me", "1/2", "a?b", ".", "me#x", "%2e%2e", "1 2"] {
            assert!(
                matches!(
                    client.user_profile(None, user_id).await,
                    Err(GraphError::InvalidInput(_))
                ),
                "{user_id:?} should be rejected"
            );
        }
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn endpoint_appends_encoded_segments_under_the_version() {
        let client = single_page_client("http://127.0.0.1:9/");
        let url = client.endpoint(&["me", "messages"]).expect("endpoint");
        assert_eq!(url.path(), "/v20.0/me/messages");

        let url = client.endpoint(&["a/b?c"]).expect("endpoint");
        assert_eq!(url.path(), "/v20.0/a%2Fb%3Fc");
        assert!(url.query().is_none());
    }
}
