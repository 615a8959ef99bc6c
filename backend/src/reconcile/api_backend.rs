//! Back end calling the catalogue HTTP API with an admin bearer token.
//!
//! | Capability | Request                                  |
//! |------------|------------------------------------------|
//! | lookup     | `GET /api/{herbs,diseases}` (once per kind, then cached) |
//! | insert     | `POST /api/{herbs,diseases}` multipart   |
//! | update     | `PUT /api/{herbs,diseases}/{id}` JSON    |
//!
//! Timeouts, connection failures and 5xx answers are retried. A connection
//! that still cannot be made after the last attempt is reported as lost.

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::store_backend::changes;
use super::{Backend, RecordDefaults};
use crate::error::{BackendError, BackendResult};
use crate::models::{DocumentId, EntityKind};
use crate::normalize::Record;
use crate::report::log_warning;

/// Default number of attempts per request
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Remote-API back end.
pub struct ApiBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
    max_attempts: u32,
    retry_delay: Duration,
    /// natural key -> id, filled by the first lookup of each kind
    known: HashMap<EntityKind, HashMap<String, DocumentId>>,
}

impl ApiBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BackendError::ConnectionLost(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            known: HashMap::new(),
        })
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/api/{}", self.base_url, kind.collection())
    }

    /// Send a request built fresh for every attempt.
    async fn send<F>(&self, build: F) -> BackendResult<Value>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let error = match build().bearer_auth(&self.token).send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();

                    if status.is_success() {
                        return Ok(serde_json::from_str(&body).unwrap_or(Value::Null));
                    }

                    let error = classify(status, &body);
                    if !matches!(error, BackendError::Transient(_)) {
                        return Err(error);
                    }
                    error
                }
                Err(e) if e.is_connect() => BackendError::ConnectionLost(e.to_string()),
                Err(e) => BackendError::Transient(e.to_string()),
            };

            log_warning(format!("Attempt {}/{} failed: {}", attempt, self.max_attempts, error));
            last_error = Some(error);

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::Transient("no attempt made".to_string())))
    }

    /// Fetch every document of a kind and index it by natural key.
    async fn load_index(&self, kind: EntityKind) -> BackendResult<HashMap<String, DocumentId>> {
        let url = self.collection_url(kind);
        let body = self.send(|| self.client.get(&url)).await?;

        let docs = body
            .get("data")
            .and_then(Value::as_array)
            .or_else(|| body.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(docs
            .iter()
            .filter_map(|doc| {
                let key = doc.get(kind.natural_key_field())?.as_str()?;
                let id = doc.get("_id")?.as_str()?;
                Some((key.to_string(), DocumentId::from(id)))
            })
            .collect())
    }
}

/// Map a non-success status to a back-end error.
fn classify(status: StatusCode, body: &str) -> BackendError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    let message = format!("{} {}", status.as_u16(), message).trim().to_string();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(message),
        StatusCode::CONFLICT => BackendError::DuplicateKey(message),
        StatusCode::BAD_REQUEST if is_duplicate_message(&message) => BackendError::DuplicateKey(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => BackendError::Transient(message),
        s if s.is_server_error() => BackendError::Transient(message),
        _ => BackendError::Rejected(message),
    }
}

fn is_duplicate_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("duplicate") || lower.contains("already exists") || lower.contains("e11000")
}

/// Multipart body for a new record.
fn insert_form(record: &Record, defaults: &RecordDefaults) -> Form {
    let list = |items: &[String]| serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());

    match record {
        Record::Herb(h) => Form::new()
            .text("name", h.name.clone())
            .text("scientificName", h.scientific_name.clone())
            .text("description", h.description.clone())
            .text("properties", list(h.properties.as_slice()))
            .text("usage", h.usage.clone())
            .text("image", defaults.image.clone())
            .text("addedBy", defaults.added_by.to_string())
            .text("published", defaults.publish.to_string()),
        Record::Disease(d) => {
            let form = Form::new()
                .text("name", d.name.clone())
                .text("description", d.description.clone())
                .text("symptoms", list(d.symptoms.as_slice()))
                .text("medicines", "[]")
                .text("usage", d.usage.clone())
                .text("published", defaults.publish.to_string());
            match &d.eng_name {
                Some(eng) => form.text("engName", eng.clone()),
                None => form,
            }
        }
    }
}

#[async_trait]
impl Backend for ApiBackend {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn lookup(&mut self, kind: EntityKind, key: &str) -> BackendResult<Option<DocumentId>> {
        if !self.known.contains_key(&kind) {
            let index = self.load_index(kind).await?;
            self.known.insert(kind, index);
        }
        Ok(self.known.get(&kind).and_then(|index| index.get(key)).cloned())
    }

    async fn insert(&mut self, record: &Record, defaults: &RecordDefaults) -> BackendResult<DocumentId> {
        let kind = record.kind();
        let url = self.collection_url(kind);
        let body = self
            .send(|| self.client.post(&url).multipart(insert_form(record, defaults)))
            .await?;

        let id = body
            .get("data")
            .and_then(|data| data.get("_id"))
            .and_then(Value::as_str)
            .map(DocumentId::from)
            .ok_or_else(|| BackendError::Rejected("create response carries no _id".to_string()))?;

        self.known
            .entry(kind)
            .or_default()
            .insert(record.natural_key().to_string(), id.clone());
        Ok(id)
    }

    async fn update(&mut self, id: &DocumentId, record: &Record, defaults: &RecordDefaults) -> BackendResult<()> {
        let url = format!("{}/{}", self.collection_url(record.kind()), id);
        let body = changes(record, defaults);
        self.send(|| self.client.put(&url).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::HerbDraft;
    use axum::extract::{Multipart, Path, State};
    use axum::http::{header, HeaderMap};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const TOKEN: &str = "secret-admin-token";

    /// Stand-in for the catalogue API's herb routes.
    #[derive(Clone, Default)]
    struct MockApi {
        herbs: Arc<Mutex<Vec<Value>>>,
        fail_with: Option<u16>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {}", TOKEN))
    }

    async fn list_herbs(State(api): State<MockApi>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
        if let Some(code) = api.fail_with {
            return (StatusCode::from_u16(code).unwrap(), Json(json!({ "message": "Server Error" })));
        }
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Not authorized" })));
        }
        let herbs = api.herbs.lock().unwrap().clone();
        (StatusCode::OK, Json(json!({ "success": true, "count": herbs.len(), "data": herbs })))
    }

    async fn create_herb(
        State(api): State<MockApi>,
        headers: HeaderMap,
        mut multipart: Multipart,
    ) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Not authorized" })));
        }

        let mut doc = serde_json::Map::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap().to_string();
            let text = field.text().await.unwrap();
            doc.insert(name, Value::String(text));
        }

        let mut herbs = api.herbs.lock().unwrap();
        if herbs.iter().any(|h| h["scientificName"] == doc["scientificName"]) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": "E11000 duplicate key error" })),
            );
        }

        let id = format!("h{}", herbs.len() + 1);
        doc.insert("_id".into(), Value::String(id));
        herbs.push(Value::Object(doc.clone()));
        (StatusCode::CREATED, Json(json!({ "success": true, "data": doc })))
    }

    async fn update_herb(
        State(api): State<MockApi>,
        Path(id): Path<String>,
        Json(changes): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let mut herbs = api.herbs.lock().unwrap();
        match herbs.iter_mut().find(|h| h["_id"] == id.as_str()) {
            Some(herb) => {
                for (k, v) in changes.as_object().unwrap() {
                    herb[k] = v.clone();
                }
                (StatusCode::OK, Json(json!({ "success": true, "data": herb.clone() })))
            }
            None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Herb not found" }))),
        }
    }

    async fn serve(api: MockApi) -> String {
        let app = Router::new()
            .route("/api/herbs", get(list_herbs).post(create_herb))
            .route("/api/herbs/{id}", put(update_herb))
            .with_state(api);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn herb(usage: &str) -> Record {
        Record::Herb(HerbDraft {
            name: "ขมิ้นชัน".into(),
            scientific_name: "Curcuma longa".into(),
            description: "เหง้าสีเหลือง".into(),
            properties: vec!["ลดสิว".into()],
            usage: usage.into(),
        })
    }

    fn defaults() -> RecordDefaults {
        RecordDefaults::new(DocumentId::new("admin1"))
    }

    #[tokio::test]
    async fn test_insert_lookup_update() {
        let api = MockApi::default();
        let url = serve(api.clone()).await;
        let mut backend = ApiBackend::new(url, TOKEN).unwrap();

        assert_eq!(backend.lookup(EntityKind::Herb, "Curcuma longa").await.unwrap(), None);

        let id = backend.insert(&herb("ทาบาง ๆ"), &defaults()).await.unwrap();
        assert_eq!(id.as_str(), "h1");
        assert_eq!(backend.lookup(EntityKind::Herb, "Curcuma longa").await.unwrap(), Some(id.clone()));

        {
            let herbs = api.herbs.lock().unwrap();
            assert_eq!(herbs[0]["properties"], "[\"ลดสิว\"]");
            assert_eq!(herbs[0]["published"], "false");
        }

        backend.update(&id, &herb("ต้มดื่ม"), &defaults()).await.unwrap();
        assert_eq!(api.herbs.lock().unwrap()[0]["usage"], "ต้มดื่ม");
    }

    #[tokio::test]
    async fn test_existing_documents_are_found() {
        let api = MockApi::default();
        api.herbs
            .lock()
            .unwrap()
            .push(json!({ "_id": "abc", "name": "พลู", "scientificName": "Piper betle" }));
        let url = serve(api).await;

        let mut backend = ApiBackend::new(url, TOKEN).unwrap();
        let found = backend.lookup(EntityKind::Herb, "Piper betle").await.unwrap();
        assert_eq!(found, Some(DocumentId::new("abc")));
    }

    #[tokio::test]
    async fn test_duplicate_answer() {
        let api = MockApi::default();
        let url = serve(api).await;
        let mut backend = ApiBackend::new(url, TOKEN).unwrap();

        backend.insert(&herb("ทา"), &defaults()).await.unwrap();
        let err = backend.insert(&herb("ทา"), &defaults()).await.unwrap_err();
        assert!(matches!(err, BackendError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_bad_token_is_fatal() {
        let url = serve(MockApi::default()).await;
        let mut backend = ApiBackend::new(url, "wrong").unwrap();

        let err = backend.lookup(EntityKind::Herb, "Curcuma longa").await.unwrap_err();
        assert!(matches!(err, BackendError::Unauthorized(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_transient() {
        let api = MockApi { fail_with: Some(503), ..Default::default() };
        let url = serve(api).await;
        let mut backend = ApiBackend::new(url, TOKEN).unwrap().with_retry(2, Duration::from_millis(1));

        let err = backend.lookup(EntityKind::Herb, "Curcuma longa").await.unwrap_err();
        assert!(matches!(err, BackendError::Transient(ref m) if m.starts_with("503")));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_lost() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut backend = ApiBackend::new(format!("http://{}", addr), TOKEN)
            .unwrap()
            .with_retry(2, Duration::from_millis(1));
        let err = backend.lookup(EntityKind::Herb, "x").await.unwrap_err();
        assert!(matches!(err, BackendError::ConnectionLost(_)));
    }

    #[test]
    fn test_classify() {
        assert!(matches!(classify(StatusCode::FORBIDDEN, ""), BackendError::Unauthorized(_)));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, r#"{"message":"Validation failed"}"#),
            BackendError::Rejected(ref m) if m == "400 Validation failed"
        ));
        assert!(matches!(classify(StatusCode::CONFLICT, ""), BackendError::DuplicateKey(_)));
        assert!(matches!(classify(StatusCode::BAD_GATEWAY, "<html>"), BackendError::Transient(_)));
    }
}
