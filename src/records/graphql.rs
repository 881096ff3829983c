//! GraphQL record store client.
//!
//! Every user-supplied value (record name, field values, titles) travels in
//! the request's `variables`; query documents are constants.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{FieldId, FieldInfo, FieldValues, RecordId, RecordStore};
use crate::error::UpstreamError;
use crate::tenants::FieldKind;

pub const DEFAULT_API_URL: &str = "https://api.monday.com/v2";

const FIND_FIELDS_QUERY: &str =
    "query ($boardId: [ID!]) { boards(ids: $boardId) { columns { id title type } } }";

const CREATE_FIELD_MUTATION: &str = "mutation ($boardId: ID!, $title: String!, $columnType: ColumnType!) { \
     create_column(board_id: $boardId, title: $title, column_type: $columnType) { id } }";

const CREATE_RECORD_MUTATION: &str = "mutation ($boardId: ID!, $itemName: String!, $columnValues: JSON) { \
     create_item(board_id: $boardId, item_name: $itemName, column_values: $columnValues) { id } }";

/// Connection settings for the record store API.
#[derive(Debug, Clone)]
pub struct GraphQlConfig {
    pub api_url: String,
    /// Sent as the `API-Version` header when set.
    pub api_version: Option<String>,
    pub timeout: Duration,
}

impl Default for GraphQlConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_version: None,
            timeout: Duration::from_secs(20),
        }
    }
}

/// Record store backed by a GraphQL HTTP endpoint.
pub struct GraphQlRecordStore {
    config: GraphQlConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorItem>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorItem {
    message: String,
}

#[derive(Debug, Deserialize)]
struct BoardsData {
    boards: Vec<Board>,
}

#[derive(Debug, Deserialize)]
struct Board {
    columns: Vec<Column>,
}

#[derive(Debug, Deserialize)]
struct Column {
    id: String,
    title: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CreateColumnData {
    create_column: IdOnly,
}

#[derive(Debug, Deserialize)]
struct CreateItemData {
    create_item: IdOnly,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

impl GraphQlRecordStore {
    pub fn new(config: GraphQlConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::Request(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { config, client })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        token: &SecretString,
        query: &str,
        variables: Value,
    ) -> Result<T, UpstreamError> {
        let mut request = self
            .client
            .post(&self.config.api_url)
            .header(reqwest::header::AUTHORIZATION, token.expose_secret())
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(version) = &self.config.api_version {
            request = request.header("API-Version", version);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.config.timeout)
            } else {
                UpstreamError::Request(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, "Record store returned an error status");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GraphQlResponse<T> = resp
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;
        unwrap_response(parsed)
    }
}

fn unwrap_response<T>(resp: GraphQlResponse<T>) -> Result<T, UpstreamError> {
    if !resp.errors.is_empty() {
        let messages: Vec<String> = resp.errors.into_iter().map(|e| e.message).collect();
        return Err(UpstreamError::Api(messages.join("; ")));
    }
    if let Some(message) = resp.error_message {
        return Err(UpstreamError::Api(message));
    }
    resp.data
        .ok_or_else(|| UpstreamError::InvalidResponse("response has no data".into()))
}

/// Variables for the create-record mutation. Field values are sent as a
/// JSON-encoded string, as the `JSON` scalar expects.
fn create_record_variables(
    tenant_id: &str,
    name: &str,
    values: &FieldValues,
) -> Result<Value, UpstreamError> {
    let column_values = serde_json::to_string(values)
        .map_err(|e| UpstreamError::Request(format!("encoding field values: {e}")))?;
    Ok(json!({
        "boardId": tenant_id,
        "itemName": name,
        "columnValues": column_values,
    }))
}

#[async_trait]
impl RecordStore for GraphQlRecordStore {
    async fn find_fields(
        &self,
        tenant_id: &str,
        token: &SecretString,
    ) -> Result<Vec<FieldInfo>, UpstreamError> {
        let data: BoardsData = self
            .execute(token, FIND_FIELDS_QUERY, json!({ "boardId": [tenant_id] }))
            .await?;

        let board = data.boards.into_iter().next().ok_or_else(|| {
            UpstreamError::InvalidResponse(format!("board {tenant_id} not found"))
        })?;

        debug!(tenant = %tenant_id, fields = board.columns.len(), "Listed fields");
        Ok(board
            .columns
            .into_iter()
            .map(|c| FieldInfo {
                kind: FieldKind::from_wire(&c.kind),
                id: c.id,
                title: c.title,
            })
            .collect())
    }

    async fn create_field(
        &self,
        tenant_id: &str,
        token: &SecretString,
        title: &str,
        kind: FieldKind,
    ) -> Result<FieldId, UpstreamError> {
        let data: CreateColumnData = self
            .execute(
                token,
                CREATE_FIELD_MUTATION,
                json!({
                    "boardId": tenant_id,
                    "title": title,
                    "columnType": kind.as_str(),
                }),
            )
            .await?;
        Ok(data.create_column.id)
    }

    async fn create_record(
        &self,
        tenant_id: &str,
        token: &SecretString,
        name: &str,
        values: &FieldValues,
    ) -> Result<RecordId, UpstreamError> {
        let variables = create_record_variables(tenant_id, name, values)?;
        let data: CreateItemData = self
            .execute(token, CREATE_RECORD_MUTATION, variables)
            .await?;
        Ok(data.create_item.id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    use super::*;
    use crate::records::FieldValue;

    type Captured = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    /// Fake GraphQL endpoint: records each request and answers by operation.
    async fn handle(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let query = body["query"].as_str().unwrap_or_default().to_string();
        captured.lock().unwrap().push((auth, body));

        if query.contains("boards(") {
            (
                StatusCode::OK,
                Json(json!({"data": {"boards": [{"columns": [
                    {"id": "name", "title": "Name", "type": "name"},
                    {"id": "email_1", "title": "Email", "type": "email"},
                ]}]}})),
            )
        } else if query.contains("create_column") {
            (StatusCode::OK, Json(json!({"data": {"create_column": {"id": "phone_9"}}})))
        } else if query.contains("create_item") {
            (StatusCode::OK, Json(json!({"data": {"create_item": {"id": "555"}}})))
        } else {
            (StatusCode::BAD_REQUEST, Json(json!({"errors": [{"message": "unknown"}]})))
        }
    }

    async fn start_server(captured: Captured) -> String {
        let app = Router::new().route("/v2", post(handle)).with_state(captured);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{port}/v2")
    }

    fn store(api_url: String) -> GraphQlRecordStore {
        GraphQlRecordStore::new(GraphQlConfig {
            api_url,
            api_version: Some("2024-01".into()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn record_variables_carry_untrusted_text_verbatim() {
        let mut values = FieldValues::new();
        values.insert(
            "colN".into(),
            FieldValue::LongText("\"}) { delete_board(id: 1) }".into()),
        );
        let name = "Jane \"Doe\"\\ \n} mutation {";

        let vars = create_record_variables("42", name, &values).unwrap();
        assert_eq!(vars["itemName"], name);
        assert_eq!(vars["boardId"], "42");

        let decoded: Value =
            serde_json::from_str(vars["columnValues"].as_str().unwrap()).unwrap();
        assert_eq!(decoded["colN"], "\"}) { delete_board(id: 1) }");
        assert!(!CREATE_RECORD_MUTATION.contains("Jane"));
    }

    #[test]
    fn graphql_errors_become_api_errors() {
        let resp: GraphQlResponse<IdOnly> = serde_json::from_value(json!({
            "errors": [{"message": "bad board"}, {"message": "bad column"}]
        }))
        .unwrap();
        let err = unwrap_response(resp).unwrap_err();
        assert!(matches!(err, UpstreamError::Api(ref m) if m == "bad board; bad column"));
    }

    #[test]
    fn error_message_field_becomes_api_error() {
        let resp: GraphQlResponse<IdOnly> =
            serde_json::from_value(json!({"error_message": "Not authenticated"})).unwrap();
        assert!(matches!(unwrap_response(resp), Err(UpstreamError::Api(_))));
    }

    #[test]
    fn missing_data_is_invalid_response() {
        let resp: GraphQlResponse<IdOnly> = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(
            unwrap_response(resp),
            Err(UpstreamError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn find_fields_maps_columns() {
        let captured: Captured = Arc::default();
        let url = start_server(Arc::clone(&captured)).await;

        let fields = store(url)
            .find_fields("42", &SecretString::from("tok-1"))
            .await
            .unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].id, "email_1");
        assert_eq!(fields[1].kind, Some(FieldKind::Email));
        assert_eq!(fields[0].kind, None);

        let requests = captured.lock().unwrap();
        assert_eq!(requests[0].0.as_deref(), Some("tok-1"));
        assert_eq!(requests[0].1["variables"]["boardId"], json!(["42"]));
    }

    #[tokio::test]
    async fn create_field_and_record_round_trip() {
        let captured: Captured = Arc::default();
        let url = start_server(Arc::clone(&captured)).await;
        let store = store(url);
        let token = SecretString::from("tok-1");

        let field_id = store
            .create_field("42", &token, "Phone", FieldKind::Phone)
            .await
            .unwrap();
        assert_eq!(field_id, "phone_9");

        let mut values = FieldValues::new();
        values.insert("colS".into(), FieldValue::Status { label: "Checkup".into() });
        let record_id = store
            .create_record("42", &token, "Jane Doe", &values)
            .await
            .unwrap();
        assert_eq!(record_id, "555");

        let requests = captured.lock().unwrap();
        assert_eq!(requests[0].1["variables"]["columnType"], "phone");
        assert_eq!(requests[1].1["variables"]["itemName"], "Jane Doe");
        assert_eq!(
            requests[1].1["variables"]["columnValues"],
            r#"{"colS":{"label":"Checkup"}}"#
        );
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let app = Router::new().route(
            "/v2",
            post(|| async { (StatusCode::UNAUTHORIZED, "nope") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let err = store(format!("http://127.0.0.1:{port}/v2"))
            .find_fields("42", &SecretString::from("bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 401, .. }));
    }
}
