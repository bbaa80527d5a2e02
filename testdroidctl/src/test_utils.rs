//! Test utilities for client testing
//!
//! Provides an in-process mock of the Testdroid Cloud API. Every request is
//! recorded (method, path, raw query, raw body, headers) so tests can assert
//! on token exchanges and payload placement.

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Form, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// A request as seen by the mock server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: String,
    /// Raw request body
    pub body: String,
    /// Header values keyed by lowercase name
    pub headers: HashMap<String, String>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn query_value(&self, key: &str) -> Option<String> {
        parse_pairs(&self.query)
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn form_value(&self, key: &str) -> Option<String> {
        self.form_values(key).into_iter().next()
    }

    pub fn form_values(&self, key: &str) -> Vec<String> {
        parse_pairs(&self.body)
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect()
    }
}

/// Decode an `application/x-www-form-urlencoded` string.
fn parse_pairs(encoded: &str) -> Vec<(String, String)> {
    let decode = |s: &str| {
        let s = s.replace('+', " ");
        urlencoding::decode(&s)
            .map(|d| d.into_owned())
            .unwrap_or(s)
    };

    encoded
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

#[derive(Debug)]
struct MockRun {
    project_id: i64,
    state: String,
    polls: u32,
    parameters: Vec<Value>,
}

#[derive(Debug)]
struct Inner {
    requests: Vec<RecordedRequest>,
    token_lifetime: u64,
    tokens_issued: u32,
    access_tokens: Vec<String>,
    refresh_tokens: Vec<String>,
    proxy_ready_after: u32,
    proxy_polls: HashMap<(String, i64), u32>,
    bare_proxies: bool,
    run_finish_after: u32,
    /// Device JSON paired with the ids of its labels
    devices: Vec<(Value, Vec<i64>)>,
    label_groups: Vec<Value>,
    labels: Vec<Value>,
    projects: Vec<Value>,
    runs: HashMap<i64, MockRun>,
    sessions: Vec<i64>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl Default for Inner {
    fn default() -> Self {
        let label_groups = vec![
            json!({"id": 1, "displayName": "Device Type", "name": "device-type"}),
            json!({"id": 2, "displayName": "Build Identifier", "name": "build-identifier"}),
            json!({"id": 3, "displayName": "Memory", "name": "memory"}),
            json!({"id": 4, "displayName": "SIMs", "name": "sims"}),
        ];

        let labels = vec![
            json!({"id": 10, "displayName": "flame", "labelGroupId": 1}),
            json!({"id": 11, "displayName": "aries", "labelGroupId": 1}),
            json!({"id": 20, "displayName": "http://x/y.zip", "labelGroupId": 2}),
            json!({"id": 21, "displayName": "512_http://x/y.zip", "labelGroupId": 2}),
            json!({"id": 30, "displayName": "512", "labelGroupId": 3}),
            json!({"id": 31, "displayName": "1024", "labelGroupId": 3}),
            json!({"id": 40, "displayName": "2", "labelGroupId": 4}),
        ];

        let devices = vec![
            (
                json!({"id": 100, "displayName": "t2m flame", "online": true, "osType": "ANDROID"}),
                vec![10, 21, 30, 40],
            ),
            (
                json!({"id": 101, "displayName": "T2M Flame (spare)", "online": false}),
                vec![10, 31],
            ),
            (
                json!({"id": 102, "displayName": "Sony Aries", "online": true}),
                vec![11, 20],
            ),
        ];

        let projects = vec![
            json!({"id": 500, "name": "flash-fxos", "type": "UIAUTOMATOR"}),
            json!({"id": 501, "name": "smoke-tests", "type": "APPIUM_ANDROID"}),
        ];

        Self {
            requests: Vec::new(),
            token_lifetime: 3600,
            tokens_issued: 0,
            access_tokens: Vec::new(),
            refresh_tokens: Vec::new(),
            proxy_ready_after: 1,
            proxy_polls: HashMap::new(),
            bare_proxies: false,
            run_finish_after: u32::MAX,
            devices,
            label_groups,
            labels,
            projects,
            runs: HashMap::new(),
            sessions: Vec::new(),
            next_id: 1000,
        }
    }
}

/// Mock server state
#[derive(Debug, Clone, Default)]
pub struct MockState {
    inner: Arc<Mutex<Inner>>,
}

impl MockState {
    /// Every request received, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.inner.lock().unwrap().requests.last().cloned()
    }

    pub fn token_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == "/oauth/token")
            .collect()
    }

    /// `grant_type` of every token request, oldest first
    pub fn grant_types(&self) -> Vec<String> {
        self.token_requests()
            .iter()
            .filter_map(|r| r.form_value("grant_type"))
            .collect()
    }

    /// Forget every issued refresh token, so refresh grants are rejected
    pub fn revoke_refresh_tokens(&self) {
        self.inner.lock().unwrap().refresh_tokens.clear();
    }

    fn record(&self, request: RecordedRequest) {
        self.inner.lock().unwrap().requests.push(request);
    }
}

/// Mock Testdroid Cloud API
#[derive(Debug)]
pub struct MockCloud {
    state: MockState,
    port: u16,
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloud {
    pub const USERNAME: &'static str = "user@example.com";
    pub const PASSWORD: &'static str = "secret";

    pub fn new() -> Self {
        Self {
            state: MockState::default(),
            port: 0, // Will be assigned when server starts
        }
    }

    /// Lifetime in seconds of issued tokens
    pub fn with_token_lifetime(self, secs: u64) -> Self {
        self.state.inner.lock().unwrap().token_lifetime = secs;
        self
    }

    /// Number of proxy polls per session before a proxy shows up
    pub fn with_proxy_ready_after(self, polls: u32) -> Self {
        self.state.inner.lock().unwrap().proxy_ready_after = polls;
        self
    }

    /// Serve proxy records without `type` and `sessionId`
    pub fn with_bare_proxies(self) -> Self {
        self.state.inner.lock().unwrap().bare_proxies = true;
        self
    }

    /// Number of fetches of a running test run before it reports FINISHED
    pub fn with_run_finish_after(self, polls: u32) -> Self {
        self.state.inner.lock().unwrap().run_finish_after = polls;
        self
    }

    /// Start the mock server and return the address
    pub async fn start(mut self) -> Result<(Self, String)> {
        let app = self.create_router();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        self.port = addr.port();

        let server_url = format!("http://127.0.0.1:{}", self.port);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Mock server error: {}", e);
            }
        });

        // Give the server a moment to start and verify it's running
        for _ in 0..20 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Ok((self, server_url))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &MockState {
        &self.state
    }

    fn create_router(&self) -> Router {
        let api = Router::new()
            .route("/devices", get(devices_handler))
            .route("/devices/:id/properties", get(device_properties_handler))
            .route("/label-groups", get(label_groups_handler))
            .route("/label-groups/:id/labels", get(labels_handler))
            .route("/me/projects", get(projects_handler))
            .route("/me/projects/:id", get(project_handler))
            .route("/me/projects/:pid/runs/:rid", get(project_run_handler))
            .route("/me/projects/:pid/runs/:rid/config", get(project_run_config_handler))
            .route(
                "/me/projects/:pid/runs/:rid/config/parameters",
                post(create_parameter_handler),
            )
            .route(
                "/me/projects/:pid/runs/:rid/config/parameters/:param_id",
                delete(delete_parameter_handler),
            )
            .route("/runs", post(create_run_handler))
            .route("/runs/:id/config", get(run_config_handler))
            .route("/runs/:id/config/parameters", get(run_parameters_handler))
            .route("/runs/:id/start", post(start_run_handler))
            .route("/runs/:id/abort", post(abort_run_handler))
            .route("/me/device-sessions", post(create_session_handler))
            .route("/me/device-sessions/:id/release", post(release_session_handler))
            .route("/proxy-plugin/proxies", get(proxies_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_bearer,
            ));

        Router::new()
            .route("/oauth/token", post(token_handler))
            .nest("/api/v2", api)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                record_request,
            ))
            .with_state(self.state.clone())
    }
}

// Middleware

async fn record_request(State(state): State<MockState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    state.record(RecordedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
        headers,
    });

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

async fn require_bearer(State(state): State<MockState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let known = presented.is_some_and(|token| {
        state
            .inner
            .lock()
            .unwrap()
            .access_tokens
            .contains(&token)
    });

    if !known {
        return error(StatusCode::UNAUTHORIZED, "Invalid access token");
    }
    next.run(request).await
}

// Handler functions

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn page(items: Vec<Value>, limit: usize) -> Json<Value> {
    let total = items.len();
    let data: Vec<Value> = if limit > 0 {
        items.into_iter().take(limit).collect()
    } else {
        items
    };
    Json(json!({ "data": data, "offset": 0, "limit": limit, "total": total }))
}

fn limit_of(query: &HashMap<String, String>) -> usize {
    query
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(0)
}

fn form_field<'a>(form: &'a HashMap<String, String>, key: &str) -> &'a str {
    form.get(key).map(String::as_str).unwrap_or_default()
}

async fn token_handler(
    State(state): State<MockState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut inner = state.inner.lock().unwrap();
    let field = |key: &str| form_field(&form, key).to_string();

    if field("client_id") != "testdroid-cloud-api" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client", "error_description": "Unknown client"})),
        )
            .into_response();
    }

    let accepted = match field("grant_type").as_str() {
        "password" => {
            field("username") == MockCloud::USERNAME && field("password") == MockCloud::PASSWORD
        }
        "refresh_token" => inner
            .refresh_tokens
            .iter()
            .any(|t| *t == field("refresh_token")),
        _ => false,
    };

    if !accepted {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "Bad credentials"})),
        )
            .into_response();
    }

    inner.tokens_issued += 1;
    let access = format!("access-{}", inner.tokens_issued);
    let refresh = format!("refresh-{}", inner.tokens_issued);
    inner.access_tokens.push(access.clone());
    inner.refresh_tokens.push(refresh.clone());

    Json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": inner.token_lifetime,
        "token_type": "bearer"
    }))
    .into_response()
}

async fn devices_handler(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let required: Vec<i64> = query
        .get("label_ids_arr")
        .map(|ids| ids.split(',').filter_map(|id| id.parse().ok()).collect())
        .unwrap_or_default();

    let inner = state.inner.lock().unwrap();
    let devices = inner
        .devices
        .iter()
        .filter(|(_, labels)| required.iter().all(|id| labels.contains(id)))
        .map(|(device, _)| device.clone())
        .collect();

    page(devices, limit_of(&query))
}

async fn device_properties_handler(Path(id): Path<i64>) -> Json<Value> {
    let props = if id == 100 {
        vec![
            json!({"id": 1, "displayName": "512", "propertyGroupName": "Memory"}),
            json!({"id": 2, "displayName": "2", "propertyGroupName": "SIMs"}),
        ]
    } else {
        vec![]
    };
    page(props, 0)
}

async fn label_groups_handler(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let groups = state.inner.lock().unwrap().label_groups.clone();
    page(groups, limit_of(&query))
}

async fn labels_handler(
    State(state): State<MockState>,
    Path(group_id): Path<i64>,
) -> Json<Value> {
    let labels = state
        .inner
        .lock()
        .unwrap()
        .labels
        .iter()
        .filter(|l| l["labelGroupId"] == group_id)
        .cloned()
        .collect();
    page(labels, 0)
}

async fn projects_handler(State(state): State<MockState>) -> Json<Value> {
    let projects = state.inner.lock().unwrap().projects.clone();
    page(projects, 0)
}

async fn project_handler(State(state): State<MockState>, Path(id): Path<i64>) -> Response {
    let inner = state.inner.lock().unwrap();
    match inner.projects.iter().find(|p| p["id"] == id) {
        Some(project) => Json(project.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, &format!("Project {} not found", id)),
    }
}

fn run_json(id: i64, run: &MockRun) -> Value {
    json!({
        "id": id,
        "projectId": run.project_id,
        "state": run.state,
        "displayName": format!("Test Run {}", id)
    })
}

async fn create_run_handler(
    State(state): State<MockState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut inner = state.inner.lock().unwrap();
    let Some(project_id) = form.get("projectId").and_then(|id| id.parse::<i64>().ok()) else {
        return error(StatusCode::BAD_REQUEST, "projectId is required");
    };
    if !inner.projects.iter().any(|p| p["id"] == project_id) {
        return error(StatusCode::NOT_FOUND, &format!("Project {} not found", project_id));
    }

    let id = inner.next_id();
    let run = MockRun {
        project_id,
        state: "WAITING".to_string(),
        polls: 0,
        parameters: Vec::new(),
    };
    let body = run_json(id, &run);
    inner.runs.insert(id, run);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn project_run_handler(
    State(state): State<MockState>,
    Path((project_id, run_id)): Path<(i64, i64)>,
) -> Response {
    let mut inner = state.inner.lock().unwrap();
    let finish_after = inner.run_finish_after;
    match inner.runs.get_mut(&run_id) {
        Some(run) if run.project_id == project_id => {
            if run.state == "RUNNING" {
                run.polls += 1;
                if run.polls >= finish_after {
                    run.state = "FINISHED".to_string();
                }
            }
            Json(run_json(run_id, run)).into_response()
        }
        _ => error(StatusCode::NOT_FOUND, &format!("Test run {} not found", run_id)),
    }
}

async fn project_run_config_handler(
    State(state): State<MockState>,
    Path((project_id, run_id)): Path<(i64, i64)>,
) -> Response {
    let inner = state.inner.lock().unwrap();
    match inner.runs.get(&run_id) {
        Some(run) if run.project_id == project_id => Json(json!({
            "id": run_id,
            "projectId": project_id,
            "deviceLanguageCode": "en_US"
        }))
        .into_response(),
        _ => error(StatusCode::NOT_FOUND, &format!("Test run {} not found", run_id)),
    }
}

async fn run_config_handler(State(state): State<MockState>, Path(run_id): Path<i64>) -> Response {
    let inner = state.inner.lock().unwrap();
    match inner.runs.get(&run_id) {
        Some(run) => Json(json!({
            "data": {"id": run_id, "projectId": run.project_id, "deviceLanguageCode": "en_US"}
        }))
        .into_response(),
        None => error(StatusCode::NOT_FOUND, &format!("Test run {} not found", run_id)),
    }
}

async fn create_parameter_handler(
    State(state): State<MockState>,
    Path((_project_id, run_id)): Path<(i64, i64)>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut inner = state.inner.lock().unwrap();
    let id = inner.next_id();
    let Some(run) = inner.runs.get_mut(&run_id) else {
        return error(StatusCode::NOT_FOUND, &format!("Test run {} not found", run_id));
    };
    let Some(key) = form.get("key") else {
        return error(StatusCode::BAD_REQUEST, "key is required");
    };

    let parameter = json!({
        "id": id,
        "key": key,
        "value": form.get("value").cloned().unwrap_or_default()
    });
    run.parameters.push(parameter.clone());
    (StatusCode::CREATED, Json(parameter)).into_response()
}

async fn delete_parameter_handler(
    State(state): State<MockState>,
    Path((_project_id, run_id, param_id)): Path<(i64, i64, i64)>,
) -> Response {
    let mut inner = state.inner.lock().unwrap();
    let Some(run) = inner.runs.get_mut(&run_id) else {
        return error(StatusCode::NOT_FOUND, &format!("Test run {} not found", run_id));
    };
    let before = run.parameters.len();
    run.parameters.retain(|p| p["id"] != param_id);
    if run.parameters.len() == before {
        return error(StatusCode::NOT_FOUND, &format!("Parameter {} not found", param_id));
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn run_parameters_handler(
    State(state): State<MockState>,
    Path(run_id): Path<i64>,
) -> Response {
    let inner = state.inner.lock().unwrap();
    match inner.runs.get(&run_id) {
        Some(run) => page(run.parameters.clone(), 0).into_response(),
        None => error(StatusCode::NOT_FOUND, &format!("Test run {} not found", run_id)),
    }
}

async fn start_run_handler(
    State(state): State<MockState>,
    Path(run_id): Path<i64>,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    if !form.iter().any(|(k, _)| k == "usedDeviceIds[]") {
        return error(StatusCode::BAD_REQUEST, "usedDeviceIds[] is required");
    }

    let mut inner = state.inner.lock().unwrap();
    match inner.runs.get_mut(&run_id) {
        Some(run) => {
            run.state = "RUNNING".to_string();
            Json(run_json(run_id, run)).into_response()
        }
        None => error(StatusCode::NOT_FOUND, &format!("Test run {} not found", run_id)),
    }
}

async fn abort_run_handler(State(state): State<MockState>, Path(run_id): Path<i64>) -> Response {
    let mut inner = state.inner.lock().unwrap();
    match inner.runs.get_mut(&run_id) {
        Some(run) => {
            run.state = "ABORTED".to_string();
            Json(run_json(run_id, run)).into_response()
        }
        None => error(StatusCode::NOT_FOUND, &format!("Test run {} not found", run_id)),
    }
}

async fn create_session_handler(
    State(state): State<MockState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let Some(device_id) = form.get("deviceModelId").and_then(|id| id.parse::<i64>().ok()) else {
        return error(StatusCode::BAD_REQUEST, "deviceModelId is required");
    };

    let mut inner = state.inner.lock().unwrap();
    if !inner.devices.iter().any(|(d, _)| d["id"] == device_id) {
        return error(StatusCode::NOT_FOUND, &format!("Device {} not found", device_id));
    }
    let id = inner.next_id();
    inner.sessions.push(id);
    (
        StatusCode::CREATED,
        Json(json!({"id": id, "deviceModelId": device_id, "state": "RUNNING"})),
    )
        .into_response()
}

async fn release_session_handler(
    State(state): State<MockState>,
    Path(session_id): Path<i64>,
) -> Response {
    let mut inner = state.inner.lock().unwrap();
    if !inner.sessions.contains(&session_id) {
        return error(StatusCode::NOT_FOUND, &format!("Session {} not found", session_id));
    }
    inner.sessions.retain(|s| *s != session_id);
    Json(json!({"id": session_id, "state": "RELEASED"})).into_response()
}

async fn proxies_handler(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let proxy_type = query.get("type").cloned().unwrap_or_default();
    let Some(session_id) = query.get("sessionId").and_then(|id| id.parse::<i64>().ok()) else {
        return error(StatusCode::BAD_REQUEST, "sessionId is required");
    };

    let mut inner = state.inner.lock().unwrap();
    let ready_after = inner.proxy_ready_after;
    let polls = inner
        .proxy_polls
        .entry((proxy_type.clone(), session_id))
        .or_insert(0);
    *polls += 1;

    if *polls < ready_after {
        return Json(json!([])).into_response();
    }

    let port = if proxy_type == "adb" { 15037 } else { 2828 };
    let mut record = json!({
        "host": "127.0.0.1",
        "port": port,
        "serial": "emulator-5554"
    });
    if !inner.bare_proxies {
        record["type"] = json!(proxy_type);
        record["sessionId"] = json!(session_id);
    }
    Json(json!([record])).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        assert_eq!(
            parse_pairs("a=1&b=hello+world&c=http%3A%2F%2Fx%2Fy.zip&d"),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "hello world".to_string()),
                ("c".to_string(), "http://x/y.zip".to_string()),
                ("d".to_string(), String::new()),
            ]
        );
        assert!(parse_pairs("").is_empty());
    }

    #[tokio::test]
    async fn test_mock_server_startup() {
        let server = MockCloud::new();
        let (server, url) = server.start().await.unwrap();

        assert!(server.port() > 0);
        assert!(url.contains(&server.port().to_string()));

        // Resource calls are rejected without a token
        let response = reqwest::get(format!("{}/api/v2/devices", url))
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        assert_eq!(server.state().requests().len(), 1);
    }
}
