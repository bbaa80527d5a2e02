//! Resource client for the Testdroid Cloud API.

use reqwest::Client;
use std::time::Duration;
use testdroid_core::capabilities::label_lookups;
use testdroid_core::{
    Capabilities, Device, DeviceProperty, DeviceSession, Label, LabelGroup, Page, Payload,
    Project, ProxySession, ProxyType, Result, TestRun, TestRunParameter, TestdroidError,
};
use tracing::{debug, info, warn};

use crate::auth::{AuthSettings, Credentials, TokenManager, DEFAULT_CLIENT_ID, DEFAULT_REFRESH_WINDOW};
use crate::poll::{poll_until, PollPolicy};
use crate::request::ApiRequester;

/// Tunables of a [`TestdroidClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-request timeout
    pub timeout: Duration,
    pub user_agent: String,
    /// OAuth client id used for password and refresh grants
    pub client_id: String,
    /// Tokens closer than this to expiry are refreshed before use
    pub refresh_window: Duration,
    /// How long to wait for a proxy session to be provisioned
    pub proxy_poll: PollPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("testdroid-client/{}", env!("CARGO_PKG_VERSION")),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            refresh_window: DEFAULT_REFRESH_WINDOW,
            proxy_poll: PollPolicy::default(),
        }
    }
}

/// Client for the Testdroid Cloud API.
///
/// Owns its token state: several clients can live in one process, each
/// authenticated independently. Calls on one client may also be issued
/// concurrently; token refresh is serialized internally.
///
/// # Examples
///
/// ```no_run
/// use testdroidctl::client::TestdroidClient;
/// use testdroid_core::ProxyType;
///
/// # async fn example() -> testdroid_core::Result<()> {
/// let client = TestdroidClient::new("https://cloud.testdroid.com", "user", "secret")?;
///
/// let device = client.get_device_by_name("t2m flame").await?;
/// if let Some(device) = device {
///     let session = client.start_device_session(device.id).await?;
///     let adb = client.get_proxy(ProxyType::Adb, session.id).await?;
///     println!("adb at {:?}", adb.address());
///     client.stop_device_session(session.id).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TestdroidClient {
    requester: ApiRequester,
    options: ClientOptions,
}

impl TestdroidClient {
    /// Create a client with default options.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Self::with_options(
            Credentials::new(base_url, username, password),
            ClientOptions::default(),
        )
    }

    /// Create a client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the base url is not http(s) or the HTTP client
    /// cannot be created.
    pub fn with_options(credentials: Credentials, options: ClientOptions) -> Result<Self> {
        if !credentials.base_url.starts_with("http://") && !credentials.base_url.starts_with("https://") {
            return Err(TestdroidError::InvalidInput(format!(
                "Cloud URL must start with http:// or https://, got '{}'",
                credentials.base_url
            )));
        }

        let http = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| TestdroidError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        let tokens = TokenManager::new(
            credentials,
            AuthSettings {
                client_id: options.client_id.clone(),
                refresh_window: options.refresh_window,
                user_agent: options.user_agent.clone(),
            },
        );

        Ok(Self {
            requester: ApiRequester::new(http, options.user_agent.clone(), tokens),
            options,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The authenticated request layer, for endpoints without a helper.
    pub fn requester(&self) -> &ApiRequester {
        &self.requester
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// List devices, optionally restricted by capabilities.
    ///
    /// Every capability must resolve to a label; the label ids are ANDed into
    /// one device query. An unknown capability key, a missing label group
    /// or a missing label yields an empty list rather than a broader query.
    /// A `limit` of `None` asks for all devices.
    pub async fn get_devices(
        &self,
        filter: Option<&Capabilities>,
        limit: Option<u32>,
    ) -> Result<Vec<Device>> {
        let mut payload = Payload::new().with("limit", limit.unwrap_or(0));

        if let Some(capabilities) = filter.filter(|c| !c.is_empty()) {
            match self.resolve_label_ids(capabilities).await? {
                Some(ids) => payload.insert("label_ids_arr", join_ids(&ids)),
                None => return Ok(Vec::new()),
            }
        }

        let page: Page<Device> = self
            .requester
            .get("devices", payload)
            .await?
            .into_json("get devices")?;
        Ok(page.data)
    }

    /// Resolve capabilities to label ids; `None` when any of them has no label.
    async fn resolve_label_ids(&self, capabilities: &Capabilities) -> Result<Option<Vec<i64>>> {
        let Some(lookups) = label_lookups(capabilities) else {
            debug!("Unrecognized capability in {:?}", capabilities.keys().collect::<Vec<_>>());
            return Ok(None);
        };

        let mut ids = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            let Some(group) = self.get_label_group(lookup.group).await? else {
                debug!("Label group '{}' does not exist", lookup.group);
                return Ok(None);
            };
            let Some(label) = self.get_label_in_group(&lookup.value, &group).await? else {
                debug!("No label '{}' in group '{}'", lookup.value, lookup.group);
                return Ok(None);
            };
            ids.push(label.id);
        }
        Ok(Some(ids))
    }

    /// Find the device whose display name equals `name`, ignoring case.
    pub async fn get_device_by_name(&self, name: &str) -> Result<Option<Device>> {
        let devices = self.get_devices(None, None).await?;
        Ok(devices
            .into_iter()
            .find(|d| d.display_name.eq_ignore_ascii_case(name)))
    }

    /// Devices whose display name contains `name`, ignoring case.
    pub async fn get_devices_matching_name(&self, name: &str) -> Result<Vec<Device>> {
        let needle = name.to_lowercase();
        let devices = self.get_devices(None, None).await?;
        Ok(devices
            .into_iter()
            .filter(|d| d.display_name.to_lowercase().contains(&needle))
            .collect())
    }

    /// Devices tagged with `label`.
    pub async fn get_devices_with_label(&self, label: &Label) -> Result<Vec<Device>> {
        let payload = Payload::new()
            .with("limit", 0u32)
            .with("label_ids_arr", label.id);

        let page: Page<Device> = self
            .requester
            .get("devices", payload)
            .await?
            .into_json(&format!("get devices with label '{}'", label.display_name))?;
        Ok(page.data)
    }

    pub async fn get_device_properties(&self, device: &Device) -> Result<Vec<DeviceProperty>> {
        let path = format!("devices/{}/properties", device.id);
        let page: Page<DeviceProperty> = self
            .requester
            .get(&path, Payload::new().with("limit", 0u32))
            .await?
            .into_json(&format!("get properties of device {}", device.id))?;
        Ok(page.data)
    }

    // =========================================================================
    // Labels
    // =========================================================================

    pub async fn get_label_groups(&self) -> Result<Vec<LabelGroup>> {
        let page: Page<LabelGroup> = self
            .requester
            .get("label-groups", Payload::new().with("limit", 0u32))
            .await?
            .into_json("get label groups")?;
        Ok(page.data)
    }

    /// Label group by name. Matching ignores case.
    pub async fn get_label_group(&self, name: &str) -> Result<Option<LabelGroup>> {
        let groups = self.get_label_groups().await?;
        Ok(groups.into_iter().find(|g| g.matches_name(name)))
    }

    pub async fn get_labels_in_group(&self, group: &LabelGroup) -> Result<Vec<Label>> {
        let path = format!("label-groups/{}/labels", group.id);
        let page: Page<Label> = self
            .requester
            .get(&path, Payload::new().with("limit", 0u32))
            .await?
            .into_json(&format!("get labels in group '{}'", group.display_name))?;
        Ok(page.data)
    }

    /// Label in `group` whose value is exactly `name`.
    pub async fn get_label_in_group(&self, name: &str, group: &LabelGroup) -> Result<Option<Label>> {
        let labels = self.get_labels_in_group(group).await?;
        Ok(labels.into_iter().find(|l| l.display_name == name))
    }

    // =========================================================================
    // Projects and test runs
    // =========================================================================

    pub async fn get_projects(&self) -> Result<Vec<Project>> {
        let page: Page<Project> = self
            .requester
            .get("me/projects", Payload::new().with("limit", 0u32))
            .await?
            .into_json("get projects")?;
        Ok(page.data)
    }

    /// Project by exact name.
    pub async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        let projects = self.get_projects().await?;
        Ok(projects.into_iter().find(|p| p.name == name))
    }

    pub async fn get_project_by_id(&self, project_id: i64) -> Result<Project> {
        self.requester
            .get(&format!("me/projects/{}", project_id), Payload::new())
            .await?
            .into_json(&format!("get project {}", project_id))
    }

    pub async fn create_test_run(&self, project: &Project) -> Result<TestRun> {
        let run: TestRun = self
            .requester
            .post("runs", Payload::new().with("projectId", project.id))
            .await?
            .into_json(&format!("create a test run in '{}'", project.name))?;
        info!("Created test run {} in project '{}'", run.id, project.name);
        Ok(run)
    }

    fn run_path(project: &Project, run: &TestRun) -> String {
        format!("me/projects/{}/runs/{}", project.id, run.id)
    }

    pub async fn get_test_run(&self, project: &Project, run: &TestRun) -> Result<TestRun> {
        self.requester
            .get(&Self::run_path(project, run), Payload::new())
            .await?
            .into_json(&format!(
                "retrieve test run {} in project {}",
                run.id, project.name
            ))
    }

    /// Configuration of a test run as seen from its project.
    pub async fn get_test_run_config(
        &self,
        project: &Project,
        run: &TestRun,
    ) -> Result<serde_json::Value> {
        let path = format!("{}/config", Self::run_path(project, run));
        self.requester
            .get(&path, Payload::new())
            .await?
            .into_body(&format!(
                "retrieve config of test run {} in project {}",
                run.id, project.name
            ))
    }

    /// Configuration of a test run, addressed by run id only.
    pub async fn get_run_config(&self, run: &TestRun) -> Result<serde_json::Value> {
        let body = self
            .requester
            .get(&format!("runs/{}/config", run.id), Payload::new())
            .await?
            .into_body(&format!("retrieve config for test run {}", run.id))?;
        Ok(body.get("data").cloned().unwrap_or(body))
    }

    pub async fn get_test_run_parameters(&self, run: &TestRun) -> Result<Vec<TestRunParameter>> {
        let page: Page<TestRunParameter> = self
            .requester
            .get(&format!("runs/{}/config/parameters", run.id), Payload::new())
            .await?
            .into_json(&format!(
                "retrieve config parameters for test run {}",
                run.id
            ))?;
        Ok(page.data)
    }

    pub async fn create_test_run_parameter(
        &self,
        project: &Project,
        run: &TestRun,
        key: &str,
        value: &str,
    ) -> Result<TestRunParameter> {
        debug!("Creating parameter '{}' for test run {}", key, run.id);
        let path = format!("{}/config/parameters", Self::run_path(project, run));
        self.requester
            .post(&path, Payload::new().with("key", key).with("value", value))
            .await?
            .into_json(&format!("create parameter '{}' for test run {}", key, run.id))
    }

    pub async fn delete_test_run_parameter(
        &self,
        project: &Project,
        run: &TestRun,
        parameter: &TestRunParameter,
    ) -> Result<()> {
        debug!("Deleting parameter '{}' of test run {}", parameter.key, run.id);
        let path = format!(
            "{}/config/parameters/{}",
            Self::run_path(project, run),
            parameter.id
        );
        self.requester
            .delete(&path)
            .await?
            .ensure_ok(&format!("delete parameter '{}'", parameter.key))
    }

    /// Start a run on the given device ids.
    pub async fn start_test_run(&self, run: &TestRun, device_ids: &[i64]) -> Result<()> {
        let payload = Payload::new().with("usedDeviceIds[]", device_ids.to_vec());
        self.requester
            .post(&format!("runs/{}/start", run.id), payload)
            .await?
            .ensure_ok(&format!("start test run {}", run.id))?;
        info!("Test run {} started on {} device(s)", run.id, device_ids.len());
        Ok(())
    }

    pub async fn abort_test_run(&self, run: &TestRun) -> Result<()> {
        self.requester
            .post(&format!("runs/{}/abort", run.id), Payload::new())
            .await?
            .ensure_ok(&format!("abort test run {}", run.id))?;
        info!("Test run {} aborted", run.id);
        Ok(())
    }

    /// Poll a run until it reports `FINISHED`.
    ///
    /// When the policy runs out the run is aborted and
    /// [`TestdroidError::PollTimeout`] is returned.
    pub async fn wait_for_test_run(
        &self,
        project: &Project,
        run: &TestRun,
        policy: PollPolicy,
    ) -> Result<TestRun> {
        let resource = format!("test run {} to finish", run.id);
        let result = poll_until(
            &resource,
            policy,
            || self.get_test_run(project, run),
            TestRun::is_finished,
        )
        .await;

        if let Err(TestdroidError::PollTimeout { .. }) = &result {
            if let Err(e) = self.abort_test_run(run).await {
                warn!("Failed to abort timed out test run {}: {}", run.id, e);
            }
        }
        result
    }

    // =========================================================================
    // Device sessions and proxies
    // =========================================================================

    /// Allocate a device model to the caller.
    pub async fn start_device_session(&self, device_model_id: i64) -> Result<DeviceSession> {
        debug!("Creating a device session for '{}'", device_model_id);
        let session: DeviceSession = self
            .requester
            .post(
                "me/device-sessions",
                Payload::new().with("deviceModelId", device_model_id),
            )
            .await?
            .into_json(&format!("start device session for device {}", device_model_id))?;
        info!("Started device session {}", session.id);
        Ok(session)
    }

    pub async fn stop_device_session(&self, session_id: i64) -> Result<()> {
        self.requester
            .post(
                &format!("me/device-sessions/{}/release", session_id),
                Payload::new(),
            )
            .await?
            .ensure_ok(&format!("release device session {}", session_id))?;
        info!("Released device session {}", session_id);
        Ok(())
    }

    /// Proxies currently provisioned for a session. Empty until ready.
    pub async fn get_proxies(
        &self,
        proxy_type: ProxyType,
        session_id: i64,
    ) -> Result<Vec<ProxySession>> {
        let payload = Payload::new()
            .with("type", proxy_type.as_str())
            .with("sessionId", session_id);

        let operation = format!("get {} proxy for session {}", proxy_type, session_id);
        let mut body = self
            .requester
            .get("proxy-plugin/proxies", payload)
            .await?
            .into_body(&operation)?;

        // Records may leave out what was asked for
        if let Some(records) = body.as_array_mut() {
            for record in records.iter_mut().filter_map(|r| r.as_object_mut()) {
                record
                    .entry("type")
                    .or_insert_with(|| proxy_type.as_str().into());
                record
                    .entry("sessionId")
                    .or_insert_with(|| session_id.into());
            }
        }

        serde_json::from_value(body).map_err(|e| {
            TestdroidError::Serialization(format!("{}: unexpected response: {}", operation, e))
        })
    }

    /// Wait for the server to provision a proxy, using the client's poll policy.
    pub async fn get_proxy(&self, proxy_type: ProxyType, session_id: i64) -> Result<ProxySession> {
        self.get_proxy_with_policy(proxy_type, session_id, self.options.proxy_poll)
            .await
    }

    pub async fn get_proxy_with_policy(
        &self,
        proxy_type: ProxyType,
        session_id: i64,
        policy: PollPolicy,
    ) -> Result<ProxySession> {
        debug!(
            "Creating {} proxied session, waiting up to {:?}",
            proxy_type,
            policy.budget()
        );
        let resource = format!("{} proxy for session {}", proxy_type, session_id);
        let proxies = poll_until(
            &resource,
            policy,
            || self.get_proxies(proxy_type, session_id),
            |proxies| !proxies.is_empty(),
        )
        .await?;

        proxies
            .into_iter()
            .next()
            .ok_or_else(|| TestdroidError::not_found("Proxy", resource))
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
