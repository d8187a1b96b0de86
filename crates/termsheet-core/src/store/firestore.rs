use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ResultStore;
use crate::record::{EmailRecord, Entities, ExtractionResult, NewEmailRecord, NewExtraction};
use crate::{Error, Result};

const API_BASE: &str = "https://firestore.googleapis.com/v1";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TERMSHEETS: &str = "termsheets";
const EMAILS: &str = "emails";

/// The fields of a Google service-account key file that matter here.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccount {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw)
            .map_err(|e| Error::Credentials(format!("{}: {e}", path.display())))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// OAuth access tokens minted from a signed service-account assertion.
struct TokenSource {
    account: ServiceAccount,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    fn new(account: ServiceAccount) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| Error::Credentials(format!("private key: {e}")))?;
        Ok(Self {
            account,
            key,
            cached: Mutex::new(None),
        })
    }

    async fn token(&self, client: &reqwest::Client) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at - Utc::now() > Duration::seconds(60) {
                return Ok(token.value.clone());
            }
        }

        let now = Utc::now();
        let claims = Claims {
            iss: &self.account.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.account.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| Error::Credentials(format!("signing assertion: {e}")))?;

        let response = client
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credentials(format!(
                "token exchange failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = token.expires_in, "Obtained Firestore access token");

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        });
        Ok(value)
    }
}

/// Firestore typed value, as the REST API encodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Value {
    StringValue(String),
    DoubleValue(f64),
    IntegerValue(String),
    BooleanValue(bool),
    TimestampValue(String),
    MapValue(MapValue),
    NullValue(()),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct MapValue {
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

type Fields = BTreeMap<String, Value>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    name: String,
    #[serde(default)]
    fields: Fields,
    create_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    write_results: Vec<WriteResult>,
    commit_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResult {
    #[serde(default)]
    transform_results: Vec<Value>,
}

/// Cloud Firestore over its REST API. One document per record; `created_at`
/// is filled in by the server.
pub struct FirestoreStore {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    auth: Option<TokenSource>,
}

impl FirestoreStore {
    /// Authenticated access with a service-account key. `project_id`
    /// overrides the key file's project.
    pub fn with_service_account(account: ServiceAccount, project_id: Option<String>) -> Result<Self> {
        let project_id = project_id.unwrap_or_else(|| account.project_id.clone());
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            project_id,
            auth: Some(TokenSource::new(account)?),
        })
    }

    /// Unauthenticated access to a local emulator at `host` (`host:port`).
    #[must_use]
    pub fn emulator(host: &str, project_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{host}/v1"),
            project_id: project_id.into(),
            auth: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn database(&self) -> String {
        format!("projects/{}/databases/(default)", self.project_id)
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{collection}/{id}", self.database())
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match &self.auth {
            Some(auth) => Ok(request.bearer_auth(auth.token(&self.client).await?)),
            None => Ok(request),
        }
    }

    /// Create `collection/{new id}` with `fields` and a server-set
    /// `created_at`. Returns the id and the timestamp the server applied.
    async fn create(&self, collection: &str, fields: Fields) -> Result<(String, DateTime<Utc>)> {
        let id = Uuid::now_v7().to_string();
        let body = json!({
            "writes": [{
                "update": {
                    "name": self.document_name(collection, &id),
                    "fields": fields,
                },
                "updateTransforms": [{
                    "fieldPath": "created_at",
                    "setToServerValue": "REQUEST_TIME",
                }],
                "currentDocument": { "exists": false },
            }]
        });

        let url = format!("{}/{}/documents:commit", self.base_url, self.database());
        let response = self
            .authorize(self.client.post(url).json(&body))
            .await?
            .send()
            .await?;
        let commit: CommitResponse = check(response).await?.json().await?;

        let applied = commit
            .write_results
            .first()
            .and_then(|w| w.transform_results.first())
            .and_then(|v| match v {
                Value::TimestampValue(t) => Some(t.clone()),
                _ => None,
            })
            .or(commit.commit_time)
            .ok_or_else(|| Error::DocumentStore("commit returned no timestamp".into()))?;

        tracing::debug!(collection, id = %id, "Created Firestore document");
        Ok((id, parse_timestamp(&applied)?))
    }
}

#[async_trait::async_trait]
impl ResultStore for FirestoreStore {
    fn backend(&self) -> &'static str {
        "firestore"
    }

    async fn save_extraction(&self, record: NewExtraction) -> Result<ExtractionResult> {
        let (id, created_at) = self.create(TERMSHEETS, extraction_fields(&record)).await?;
        Ok(record.into_stored(id, created_at))
    }

    async fn save_email(&self, record: NewEmailRecord) -> Result<EmailRecord> {
        let (id, created_at) = self.create(EMAILS, email_fields(&record)).await?;
        Ok(record.into_stored(id, created_at))
    }

    async fn get_extraction(&self, id: &str) -> Result<ExtractionResult> {
        let url = format!("{}/{}", self.base_url, self.document_name(TERMSHEETS, id));
        let response = self.authorize(self.client.get(url)).await?.send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::RecordNotFound(id.to_string()));
        }

        let document: Document = check(response).await?.json().await?;
        decode_extraction(document)
    }

    async fn list_extractions(&self, limit: usize) -> Result<Vec<ExtractionResult>> {
        let url = format!("{}/{}/documents/{TERMSHEETS}", self.base_url, self.database());
        let request = self.client.get(url).query(&[
            ("pageSize", limit.to_string()),
            ("orderBy", "created_at desc".to_string()),
        ]);
        let response = self.authorize(request).await?.send().await?;

        let listed: ListResponse = check(response).await?.json().await?;
        listed.documents.into_iter().map(decode_extraction).collect()
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::DocumentStore(format!("{status}: {body}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::InvalidTimestamp(value.to_string()))
}

fn string(value: &str) -> Value {
    Value::StringValue(value.to_string())
}

fn entities_value(entities: &Entities) -> Value {
    Value::MapValue(MapValue {
        fields: entities.iter().map(|(k, v)| (k.clone(), string(v))).collect(),
    })
}

fn extraction_fields(record: &NewExtraction) -> Fields {
    BTreeMap::from([
        ("document_name".to_string(), string(&record.document_name)),
        ("document_type".to_string(), string(&record.document_type)),
        ("extracted_text".to_string(), string(&record.extracted_text)),
        (
            "ocr_confidence".to_string(),
            Value::DoubleValue(record.ocr_confidence),
        ),
        ("entities".to_string(), entities_value(&record.entities)),
        (
            "validation_status".to_string(),
            string(record.validation_status.as_str()),
        ),
    ])
}

fn email_fields(record: &NewEmailRecord) -> Fields {
    let mut fields = BTreeMap::from([
        ("body".to_string(), string(&record.body)),
        ("entities".to_string(), entities_value(&record.entities)),
    ]);
    if let Some(subject) = &record.subject {
        fields.insert("subject".to_string(), string(subject));
    }
    if let Some(sender) = &record.sender {
        fields.insert("sender".to_string(), string(sender));
    }
    fields
}

fn text_field(fields: &Fields, key: &str) -> Result<String> {
    match fields.get(key) {
        Some(Value::StringValue(s)) => Ok(s.clone()),
        _ => Err(Error::DocumentStore(format!("missing string field {key}"))),
    }
}

fn decode_extraction(document: Document) -> Result<ExtractionResult> {
    let fields = &document.fields;
    let id = document
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let ocr_confidence = match fields.get("ocr_confidence") {
        Some(Value::DoubleValue(v)) => *v,
        Some(Value::IntegerValue(v)) => v
            .parse()
            .map_err(|_| Error::DocumentStore(format!("bad ocr_confidence {v}")))?,
        _ => 0.0,
    };

    let entities = match fields.get("entities") {
        Some(Value::MapValue(map)) => map
            .fields
            .iter()
            .filter_map(|(k, v)| match v {
                Value::StringValue(s) => Some((k.clone(), s.clone())),
                _ => None,
            })
            .collect(),
        _ => Entities::new(),
    };

    let created_at = match (fields.get("created_at"), &document.create_time) {
        (Some(Value::TimestampValue(t)), _) | (_, Some(t)) => parse_timestamp(t)?,
        _ => return Err(Error::DocumentStore(format!("{id} has no timestamp"))),
    };

    Ok(ExtractionResult {
        id,
        document_name: text_field(fields, "document_name")?,
        document_type: text_field(fields, "document_type")?,
        extracted_text: text_field(fields, "extracted_text")?,
        ocr_confidence,
        entities,
        validation_status: text_field(fields, "validation_status")?.parse()?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ValidationStatus;
    use mockito::Matcher;

    const COMMIT_PATH: &str = "/v1/projects/demo/databases/(default)/documents:commit";
    const TEST_KEY: &str = include_str!("testdata/service_account_key.pem");

    fn draft() -> NewExtraction {
        let mut entities = Entities::new();
        entities.insert("GOVERNING_LAW".into(), "governed by the laws of Delaware".into());
        NewExtraction::new("deal.pdf".into(), "application/pdf".into())
            .with_text("governed by the laws of Delaware\n".into(), 91.0)
            .with_entities(entities)
    }

    fn commit_body(timestamp: &str) -> String {
        json!({
            "writeResults": [{
                "updateTime": timestamp,
                "transformResults": [{ "timestampValue": timestamp }],
            }],
            "commitTime": timestamp,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_save_requests_server_timestamp() {
        let mut server = mockito::Server::new_async().await;
        let commit = server
            .mock("POST", COMMIT_PATH)
            .match_body(Matcher::PartialJson(json!({
                "writes": [{
                    "updateTransforms": [{
                        "fieldPath": "created_at",
                        "setToServerValue": "REQUEST_TIME",
                    }],
                    "currentDocument": { "exists": false },
                }]
            })))
            .with_status(200)
            .with_body(commit_body("2024-05-01T10:00:00.123456Z"))
            .create_async()
            .await;

        let store = FirestoreStore::emulator(&server.host_with_port(), "demo");
        let saved = store.save_extraction(draft()).await.unwrap();

        commit.assert_async().await;
        assert_eq!(saved.id.len(), 36);
        assert_eq!(saved.validation_status, ValidationStatus::Pending);
        assert_eq!(
            saved.created_at,
            parse_timestamp("2024-05-01T10:00:00.123456Z").unwrap()
        );
    }

    #[tokio::test]
    async fn test_save_email_skips_missing_headers() {
        let mut server = mockito::Server::new_async().await;
        let commit = server
            .mock("POST", COMMIT_PATH)
            .match_body(Matcher::Regex(r#""body":\{"stringValue":"hello"\}"#.into()))
            .with_status(200)
            .with_body(commit_body("2024-05-01T10:00:00Z"))
            .create_async()
            .await;

        let store = FirestoreStore::emulator(&server.host_with_port(), "demo");
        let saved = store
            .save_email(NewEmailRecord {
                subject: None,
                sender: Some("founder@example.com".into()),
                body: "hello".into(),
                entities: Entities::new(),
            })
            .await
            .unwrap();

        commit.assert_async().await;
        assert!(saved.subject.is_none());
        assert_eq!(saved.sender.as_deref(), Some("founder@example.com"));
    }

    #[tokio::test]
    async fn test_get_decodes_typed_fields() {
        let mut server = mockito::Server::new_async().await;
        let document = json!({
            "name": "projects/demo/databases/(default)/documents/termsheets/abc",
            "fields": {
                "document_name": { "stringValue": "deal.pdf" },
                "document_type": { "stringValue": "application/pdf" },
                "extracted_text": { "stringValue": "text\n" },
                "ocr_confidence": { "doubleValue": 91.5 },
                "entities": { "mapValue": { "fields": {
                    "VALUATION": { "stringValue": "pre-money valuation of $5,000,000" }
                }}},
                "validation_status": { "stringValue": "Pending" },
                "created_at": { "timestampValue": "2024-05-01T10:00:00Z" },
            },
            "createTime": "2024-05-01T10:00:01Z",
        });
        server
            .mock(
                "GET",
                "/v1/projects/demo/databases/(default)/documents/termsheets/abc",
            )
            .with_status(200)
            .with_body(document.to_string())
            .create_async()
            .await;

        let store = FirestoreStore::emulator(&server.host_with_port(), "demo");
        let record = store.get_extraction("abc").await.unwrap();

        assert_eq!(record.id, "abc");
        assert!((record.ocr_confidence - 91.5).abs() < 1e-9);
        assert_eq!(
            record.entities["VALUATION"],
            "pre-money valuation of $5,000,000"
        );
        assert_eq!(
            record.created_at,
            parse_timestamp("2024-05-01T10:00:00Z").unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/v1/projects/demo/databases/(default)/documents/termsheets/gone",
            )
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"status":"NOT_FOUND"}}"#)
            .create_async()
            .await;

        let store = FirestoreStore::emulator(&server.host_with_port(), "demo");

        assert!(matches!(
            store.get_extraction("gone").await,
            Err(Error::RecordNotFound(id)) if id == "gone"
        ));
    }

    #[tokio::test]
    async fn test_list_of_empty_collection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/v1/projects/demo/databases/(default)/documents/termsheets",
            )
            .match_query(Matcher::UrlEncoded("pageSize".into(), "10".into()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let store = FirestoreStore::emulator(&server.host_with_port(), "demo");

        assert!(store.list_extractions(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMMIT_PATH)
            .with_status(503)
            .with_body("backend unavailable")
            .create_async()
            .await;

        let store = FirestoreStore::emulator(&server.host_with_port(), "demo");

        match store.save_extraction(draft()).await {
            Err(Error::DocumentStore(message)) => assert!(message.contains("backend unavailable")),
            other => panic!("expected DocumentStore error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_access_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), JWT_BEARER.into()))
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.test","expires_in":3600,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;
        let commit = server
            .mock("POST", COMMIT_PATH)
            .match_header("authorization", "Bearer ya29.test")
            .with_status(200)
            .with_body(commit_body("2024-05-01T10:00:00Z"))
            .expect(2)
            .create_async()
            .await;

        let account = ServiceAccount {
            project_id: "demo".into(),
            client_email: "svc@demo.iam.gserviceaccount.com".into(),
            private_key: TEST_KEY.into(),
            token_uri: format!("{}/token", server.url()),
        };
        let store = FirestoreStore::with_service_account(account, None)
            .unwrap()
            .with_base_url(format!("{}/v1", server.url()));

        store.save_extraction(draft()).await.unwrap();
        store.save_extraction(draft()).await.unwrap();

        token.assert_async().await;
        commit.assert_async().await;
    }

    #[test]
    fn test_bad_private_key_is_credentials_error() {
        let account = ServiceAccount {
            project_id: "demo".into(),
            client_email: "svc@demo.iam.gserviceaccount.com".into(),
            private_key: "not a key".into(),
            token_uri: default_token_uri(),
        };

        assert!(matches!(
            FirestoreStore::with_service_account(account, None),
            Err(Error::Credentials(_))
        ));
    }

    #[test]
    fn test_service_account_file_defaults_token_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(
            &path,
            json!({
                "type": "service_account",
                "project_id": "demo",
                "client_email": "svc@demo.iam.gserviceaccount.com",
                "private_key": TEST_KEY,
            })
            .to_string(),
        )
        .unwrap();

        let account = ServiceAccount::from_file(&path).unwrap();
        assert_eq!(account.token_uri, "https://oauth2.googleapis.com/token");
        assert_eq!(account.project_id, "demo");
    }
}
