use crate::config::{AccountEntry, Config};
use crate::workers::{FetchEvent, Fetcher};
use cfdeck_cache::{DeploymentCacheEntry, FetchOutcome, Registry};
use cfdeck_core::{Binding, BoundReference, ComputeUnit, LineBatch, LogLine, Resource, ServiceKind};
use cfdeck_tail::{PaneId, TailEvent, TailSessionManager, TailState, TailUpdate};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

const ALL_SCRIPTS_ENV: &str = "all";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Services,
    Detail,
    Tail,
    Grid,
}

impl View {
    pub fn title(self) -> &'static str {
        match self {
            View::Services => "Services",
            View::Detail => "Detail",
            View::Tail => "Tail",
            View::Grid => "Grid",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppSettings {
    pub accounts: Vec<AccountEntry>,
    pub environments: BTreeMap<String, Vec<String>>,
    pub max_pane_lines: usize,
    pub idle_after: Duration,
}

impl AppSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accounts: config.accounts.clone(),
            environments: config.environments.clone(),
            max_pane_lines: config.max_pane_lines,
            idle_after: config.idle_after,
        }
    }
}

/// Most recent lines of one tail pane.
#[derive(Clone, Debug)]
pub struct PaneBuffer {
    pub script_name: String,
    lines: VecDeque<LogLine>,
    cap: usize,
    dropped: u64,
}

impl PaneBuffer {
    pub fn new(script_name: impl Into<String>, cap: usize) -> Self {
        Self {
            script_name: script_name.into(),
            lines: VecDeque::new(),
            cap: cap.max(1),
            dropped: 0,
        }
    }

    pub fn push_batch(&mut self, batch: LineBatch) {
        for line in batch {
            if self.lines.len() == self.cap {
                self.lines.pop_front();
                self.dropped += 1;
            }
            self.lines.push_back(line);
        }
    }

    pub fn lines(&self) -> impl DoubleEndedIterator<Item = &LogLine> + ExactSizeIterator {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRow {
    pub name: String,
    pub key: String,
    pub note: String,
}

#[derive(Clone, Debug)]
pub struct DetailView {
    pub service: ServiceKind,
    pub name: String,
    pub key: String,
    pub bindings: Vec<Binding>,
    pub deployment: Option<DeploymentCacheEntry>,
    /// `None` while no binding index exists for the account.
    pub bound_by: Option<Vec<BoundReference>>,
}

#[derive(Clone, Debug)]
struct DetailTarget {
    service: ServiceKind,
    key: String,
    name: String,
}

pub struct App {
    settings: AppSettings,
    registry: Registry,
    tails: TailSessionManager,
    fetcher: Fetcher,
    pub view: View,
    pub service: ServiceKind,
    pub selected: usize,
    pub grid_focus: usize,
    pub help_open: bool,
    pub status_note: Option<String>,
    detail: Option<DetailTarget>,
    grid_env: Option<String>,
    in_flight_resources: HashSet<(String, ServiceKind)>,
    in_flight_deployments: HashSet<(String, String)>,
    index_building: Option<String>,
    index_wanted: bool,
    panes: BTreeMap<PaneId, PaneBuffer>,
}

impl App {
    pub fn new(
        settings: AppSettings,
        registry: Registry,
        tails: TailSessionManager,
        fetcher: Fetcher,
    ) -> Self {
        Self {
            settings,
            registry,
            tails,
            fetcher,
            view: View::Services,
            service: ServiceKind::Workers,
            selected: 0,
            grid_focus: 0,
            help_open: false,
            status_note: None,
            detail: None,
            grid_env: None,
            in_flight_resources: HashSet::new(),
            in_flight_deployments: HashSet::new(),
            index_building: None,
            index_wanted: false,
            panes: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tails(&self) -> &TailSessionManager {
        &self.tails
    }

    pub fn account_id(&self) -> &str {
        self.registry.account_id()
    }

    pub fn account_label(&self) -> &str {
        let account_id = self.registry.account_id();
        self.settings
            .accounts
            .iter()
            .find(|entry| entry.id == account_id)
            .map(AccountEntry::label)
            .unwrap_or(account_id)
    }

    pub fn grid_env(&self) -> Option<&str> {
        self.grid_env.as_deref()
    }

    pub fn start(&mut self) {
        self.show_service(ServiceKind::Workers);
    }

    pub fn show_service(&mut self, service: ServiceKind) {
        self.view = View::Services;
        self.service = service;
        self.selected = 0;
        self.detail = None;
        self.refresh_service(service, false);
        if service == ServiceKind::Workers {
            self.sweep_deployments();
        }
    }

    pub fn next_service(&mut self) {
        let position = ServiceKind::ALL
            .iter()
            .position(|service| *service == self.service)
            .unwrap_or(0);
        let next = ServiceKind::ALL[(position + 1) % ServiceKind::ALL.len()];
        self.show_service(next);
    }

    /// Back to the Workers list; stale deployment entries are refreshed in
    /// the background.
    pub fn go_home(&mut self) {
        self.show_service(ServiceKind::Workers);
    }

    /// Issues a listing fetch unless the cache is fresh (and `force` is off)
    /// or one is already in flight for this account.
    pub fn refresh_service(&mut self, service: ServiceKind, force: bool) -> bool {
        if !force && !self.registry.is_cache_stale(service) {
            return false;
        }
        let account_id = self.registry.account_id().to_string();
        if !self
            .in_flight_resources
            .insert((account_id.clone(), service))
        {
            return false;
        }
        self.fetcher.spawn_resources(&account_id, service);
        true
    }

    pub fn refresh_deployment(&mut self, script_name: &str, force: bool) -> bool {
        if !force && !self.registry.is_deployment_cache_stale(script_name) {
            return false;
        }
        let account_id = self.registry.account_id().to_string();
        if !self
            .in_flight_deployments
            .insert((account_id.clone(), script_name.to_string()))
        {
            return false;
        }
        self.fetcher.spawn_deployment(&account_id, script_name);
        true
    }

    pub fn refresh_current(&mut self) {
        match self.view {
            View::Detail => {
                if let Some(target) = self.detail.clone() {
                    if target.service == ServiceKind::Workers {
                        self.refresh_deployment(&target.name, true);
                    } else {
                        // A fresh Workers listing rebuilds the index.
                        self.refresh_service(target.service, true);
                        self.refresh_service(ServiceKind::Workers, true);
                    }
                }
            }
            _ => {
                self.refresh_service(self.service, true);
            }
        }
    }

    fn sweep_deployments(&mut self) -> usize {
        if !self.registry.any_deployment_cache_stale() {
            return 0;
        }
        let mut issued = 0;
        for script_name in self.registry.stale_deployment_scripts() {
            if self.refresh_deployment(&script_name, true) {
                issued += 1;
            }
        }
        if issued > 0 {
            debug!(event = "deployment_sweep", issued);
        }
        issued
    }

    pub fn switch_account(&mut self, account_id: &str) {
        if self.registry.is_current_account(account_id) {
            return;
        }
        self.tails.stop_all();
        self.panes.clear();
        self.registry.clear_services();
        self.registry.set_account_id(account_id);
        self.index_building = None;
        self.index_wanted = false;
        self.detail = None;
        self.grid_env = None;
        self.view = View::Services;
        self.service = ServiceKind::Workers;
        self.selected = 0;

        let cached = self.registry.get_all_deployment_caches().len();
        info!(event = "account_view_reset", account_id, cached_deployments = cached);
        self.status_note = Some(format!(
            "switched to {}; {cached} cached deployments",
            self.account_label()
        ));
        self.refresh_service(ServiceKind::Workers, true);
        self.sweep_deployments();
    }

    pub fn cycle_account(&mut self) {
        let accounts = &self.settings.accounts;
        if accounts.len() < 2 {
            self.status_note = Some("only one account configured".to_string());
            return;
        }
        let current = self.registry.account_id();
        let position = accounts
            .iter()
            .position(|entry| entry.id == current)
            .unwrap_or(0);
        let next = accounts[(position + 1) % accounts.len()].id.clone();
        self.switch_account(&next);
    }

    /// Rows of the active service list. While the Workers listing is absent
    /// (right after an account switch) rows come from cached deployments.
    pub fn service_rows(&self) -> Vec<ServiceRow> {
        match self.registry.get_cache(self.service) {
            Some(entry) => entry
                .resources
                .iter()
                .map(|resource| self.service_row(resource))
                .collect(),
            None if self.service == ServiceKind::Workers => {
                let mut cached: Vec<DeploymentCacheEntry> = self
                    .registry
                    .get_all_deployment_caches()
                    .into_values()
                    .collect();
                cached.sort_by(|a, b| a.script_name.cmp(&b.script_name));
                cached
                    .into_iter()
                    .map(|entry| ServiceRow {
                        name: entry.script_name.clone(),
                        key: entry.script_name.clone(),
                        note: format!("{} (cached)", deployment_note(Some(&entry))),
                    })
                    .collect()
            }
            None => Vec::new(),
        }
    }

    fn service_row(&self, resource: &Resource) -> ServiceRow {
        let name = resource.display_name().to_string();
        let key = resource.lookup_key(self.service).to_string();
        let note = if self.service == ServiceKind::Workers {
            deployment_note(self.registry.get_deployment_cache(&name))
        } else if key != name {
            key.clone()
        } else {
            String::new()
        };
        ServiceRow { name, key, note }
    }

    pub fn is_loading(&self, service: ServiceKind) -> bool {
        self.in_flight_resources
            .contains(&(self.registry.account_id().to_string(), service))
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.view == View::Grid {
            let cells = self.tails.grid_len();
            let next = self.grid_focus as isize + delta;
            self.grid_focus = next.clamp(0, cells.saturating_sub(1) as isize) as usize;
            return;
        }
        let len = self.service_rows().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        let next = self.selected as isize + delta;
        self.selected = next.clamp(0, len as isize - 1) as usize;
    }

    fn clamp_selection(&mut self) {
        let len = self.service_rows().len();
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }

    fn selected_row(&self) -> Option<ServiceRow> {
        self.service_rows().into_iter().nth(self.selected)
    }

    pub fn open_detail(&mut self) {
        let Some(row) = self.selected_row() else {
            return;
        };
        let service = self.service;
        self.detail = Some(DetailTarget {
            service,
            key: row.key.clone(),
            name: row.name.clone(),
        });
        self.view = View::Detail;
        if service == ServiceKind::Workers {
            self.refresh_deployment(&row.name, false);
        } else if self.registry.needs_binding_index() {
            self.request_binding_index();
        }
    }

    /// Builds the index from the Workers listing in hand, fetching the
    /// listing first when it is missing.
    fn request_binding_index(&mut self) {
        let account_id = self.registry.account_id().to_string();
        if self.index_building.as_deref() == Some(account_id.as_str()) {
            self.index_wanted = true;
            return;
        }
        match self.registry.get_cache(ServiceKind::Workers) {
            Some(entry) => {
                let units: Vec<ComputeUnit> = entry
                    .resources
                    .iter()
                    .map(ComputeUnit::from_resource)
                    .collect();
                self.index_wanted = false;
                self.index_building = Some(account_id.clone());
                self.fetcher.spawn_binding_index(&account_id, units);
            }
            None => {
                self.index_wanted = true;
                self.refresh_service(ServiceKind::Workers, false);
            }
        }
    }

    pub fn detail_view(&self) -> Option<DetailView> {
        let target = self.detail.as_ref()?;
        let resource = self
            .registry
            .get_cache(target.service)
            .and_then(|entry| entry.find_by_key(target.service, &target.key).cloned());
        let bound_by = self
            .registry
            .get_binding_index()
            .map(|index| index.lookup(target.service, &target.key).to_vec());
        let deployment = if target.service == ServiceKind::Workers {
            self.registry.get_deployment_cache(&target.name).cloned()
        } else {
            None
        };
        Some(DetailView {
            service: target.service,
            name: target.name.clone(),
            key: target.key.clone(),
            bindings: resource.map(|r| r.bindings).unwrap_or_default(),
            deployment,
            bound_by,
        })
    }

    pub fn apply_fetch_event(&mut self, event: FetchEvent) -> FetchOutcome {
        match event {
            FetchEvent::Resources {
                account_id,
                service,
                result,
            } => {
                self.in_flight_resources
                    .remove(&(account_id.clone(), service));
                let outcome = self
                    .registry
                    .apply_resource_fetch(&account_id, service, result);
                match &outcome {
                    FetchOutcome::Stored => {
                        if service == self.service {
                            self.clamp_selection();
                        }
                        if service == ServiceKind::Workers {
                            self.sweep_deployments();
                            if self.index_wanted || self.registry.get_binding_index().is_some() {
                                self.request_binding_index();
                            }
                        }
                    }
                    FetchOutcome::Failed(message) => {
                        self.status_note = Some(message.clone());
                    }
                    FetchOutcome::Discarded => {}
                }
                outcome
            }
            FetchEvent::Deployment {
                account_id,
                script_name,
                result,
            } => {
                self.in_flight_deployments
                    .remove(&(account_id.clone(), script_name.clone()));
                let outcome = self
                    .registry
                    .apply_deployment_fetch(&account_id, &script_name, result);
                if let FetchOutcome::Failed(message) = &outcome {
                    self.status_note = Some(message.clone());
                }
                outcome
            }
            FetchEvent::BindingIndex { account_id, index } => {
                if self.index_building.as_deref() == Some(account_id.as_str()) {
                    self.index_building = None;
                }
                let outcome = self.registry.apply_binding_index(&account_id, index);
                if outcome == FetchOutcome::Stored && self.index_wanted {
                    self.request_binding_index();
                }
                outcome
            }
        }
    }

    fn selected_script(&self) -> Option<String> {
        match (self.view, self.detail.as_ref()) {
            (View::Detail, Some(target)) if target.service == ServiceKind::Workers => {
                Some(target.name.clone())
            }
            _ if self.service == ServiceKind::Workers => self.selected_row().map(|row| row.name),
            _ => None,
        }
    }

    pub fn tail_selected(&mut self) {
        let Some(script_name) = self.selected_script() else {
            self.status_note = Some("select a Worker to tail".to_string());
            return;
        };
        let account_id = self.registry.account_id().to_string();
        self.tails.start_tail(&account_id, &script_name);
        self.panes.insert(
            PaneId::Single,
            PaneBuffer::new(&script_name, self.settings.max_pane_lines),
        );
        self.view = View::Tail;
    }

    /// Opens the next configured environment in the grid, or every listed
    /// Worker when none are configured.
    pub fn tail_grid(&mut self) {
        let (env_name, targets) = self.next_grid_targets();
        if targets.is_empty() {
            self.status_note = Some("no Workers to tail".to_string());
            return;
        }
        let account_id = self.registry.account_id().to_string();
        let handles = self
            .tails
            .start_parallel_tail(&env_name, &account_id, &targets);
        self.panes.retain(|pane, _| *pane == PaneId::Single);
        for handle in &handles {
            self.panes.insert(
                handle.pane,
                PaneBuffer::new(&handle.script_name, self.settings.max_pane_lines),
            );
        }
        if handles.len() < targets.len() {
            self.status_note = Some(format!(
                "{env_name}: showing {} of {} scripts",
                handles.len(),
                targets.len()
            ));
        }
        self.grid_env = Some(env_name);
        self.grid_focus = 0;
        self.view = View::Grid;
    }

    fn next_grid_targets(&self) -> (String, Vec<String>) {
        let environments = &self.settings.environments;
        if environments.is_empty() {
            return (
                ALL_SCRIPTS_ENV.to_string(),
                self.registry.known_scripts().into_iter().collect(),
            );
        }
        let next = match self.grid_env.as_deref() {
            Some(current) => environments
                .range::<str, _>((
                    std::ops::Bound::Excluded(current),
                    std::ops::Bound::Unbounded,
                ))
                .next()
                .or_else(|| environments.iter().next()),
            None => environments.iter().next(),
        };
        match next {
            Some((name, scripts)) => (name.clone(), scripts.clone()),
            None => (ALL_SCRIPTS_ENV.to_string(), Vec::new()),
        }
    }

    pub fn stop_tails(&mut self) {
        match self.view {
            View::Tail => {
                self.tails.stop_single_tail();
            }
            View::Grid => self.tails.stop_all_parallel_tails(),
            View::Services | View::Detail => self.tails.stop_all(),
        }
    }

    pub fn stop_focused_grid_cell(&mut self) {
        if self.view == View::Grid {
            self.tails.stop_grid_cell(self.grid_focus);
        }
    }

    pub fn apply_tail_event(&mut self, event: TailEvent) {
        let account_id = self.registry.account_id().to_string();
        let Some(update) = self.tails.handle_event(event, &account_id) else {
            return;
        };
        match update {
            TailUpdate::Connected { session_id, .. } => {
                self.tails.poll_next(&session_id);
            }
            TailUpdate::Batch {
                pane,
                script_name,
                session_id,
                lines,
            } => {
                if let Some(buffer) = self.panes.get_mut(&pane) {
                    if buffer.script_name == script_name {
                        buffer.push_batch(lines);
                    }
                }
                self.tails.poll_next(&session_id);
            }
            TailUpdate::ConnectFailed {
                script_name, error, ..
            } => {
                self.status_note = Some(format!("tail {script_name} failed: {error}"));
            }
            TailUpdate::StreamFailed {
                script_name, error, ..
            } => {
                self.status_note = Some(format!("tail {script_name} dropped: {error}"));
            }
            TailUpdate::Closed { script_name, .. } => {
                self.status_note = Some(format!("tail {script_name} closed"));
            }
            TailUpdate::TornDown {
                script_name,
                error: Some(error),
            } => {
                self.status_note = Some(format!("closing tail {script_name} failed: {error}"));
            }
            TailUpdate::TornDown { error: None, .. } | TailUpdate::Discarded { .. } => {}
        }
    }

    pub fn pane_buffer(&self, pane: PaneId) -> Option<&PaneBuffer> {
        self.panes.get(&pane)
    }

    pub fn pane_state(&self, pane: PaneId) -> Option<TailState> {
        self.tails.pane_state(pane)
    }

    pub fn tick(&mut self) {
        self.tails.refresh_idle(self.settings.idle_after);
        self.tails.reap_teardowns();
    }

    pub async fn shutdown(self) {
        self.tails.shutdown().await;
    }
}

fn deployment_note(entry: Option<&DeploymentCacheEntry>) -> String {
    let Some(entry) = entry else {
        return "checking".to_string();
    };
    match &entry.deployment {
        None => "not deployed".to_string(),
        Some(info) if info.is_split() => info
            .versions
            .iter()
            .map(|split| format!("{} {}%", short_id(&split.version_id), split.percentage))
            .collect::<Vec<_>>()
            .join(" / "),
        Some(info) => match info.primary_version() {
            Some(version) => format!("deployed {}", short_id(&version.version_id)),
            None => "deployed".to_string(),
        },
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cfdeck_cache::StalenessPolicy;
    use cfdeck_core::client::{
        ClientError, DeploymentSource, DeploymentStatus, LineSender, OpenedTail, ResourceLister,
        TailClient,
    };
    use cfdeck_core::clock::ManualClock;
    use cfdeck_core::{DeploymentInfo, LogLevel, SessionId, VersionSplit};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeApi {
        listings: Mutex<HashMap<(String, ServiceKind), Vec<Resource>>>,
        failing: Mutex<HashSet<ServiceKind>>,
    }

    impl FakeApi {
        fn list(&self, account_id: &str, service: ServiceKind, resources: Vec<Resource>) {
            self.listings
                .lock()
                .expect("listings lock")
                .insert((account_id.to_string(), service), resources);
        }

        fn fail(&self, service: ServiceKind) {
            self.failing.lock().expect("failing lock").insert(service);
        }
    }

    #[async_trait]
    impl ResourceLister for FakeApi {
        async fn list_resources(
            &self,
            account_id: &str,
            service: ServiceKind,
        ) -> Result<Vec<Resource>, ClientError> {
            if self.failing.lock().expect("failing lock").contains(&service) {
                return Err(ClientError::Unavailable("api down".to_string()));
            }
            Ok(self
                .listings
                .lock()
                .expect("listings lock")
                .get(&(account_id.to_string(), service))
                .cloned()
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl DeploymentSource for FakeApi {
        async fn fetch_deployment(
            &self,
            _account_id: &str,
            script_name: &str,
        ) -> Result<DeploymentStatus, ClientError> {
            let deployment = (script_name == "api").then(|| DeploymentInfo {
                deployment_id: "dep-1".to_string(),
                created_on: None,
                versions: vec![VersionSplit {
                    version_id: "0123456789abcdef".to_string(),
                    percentage: 100.0,
                }],
            });
            Ok(DeploymentStatus {
                deployment,
                subdomain: "acme".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FakeTails {
        senders: Mutex<Vec<LineSender>>,
    }

    #[async_trait]
    impl TailClient for FakeTails {
        async fn open_tail(
            &self,
            _account_id: &str,
            script_name: &str,
        ) -> Result<OpenedTail, ClientError> {
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().expect("senders lock").push(tx);
            Ok(OpenedTail {
                id: SessionId::new(format!("{script_name}-session")),
                lines: rx,
            })
        }

        async fn close_tail(&self, _session: &SessionId) -> Result<(), ClientError> {
            Ok(())
        }
    }

    struct Harness {
        app: App,
        fetch_rx: mpsc::Receiver<FetchEvent>,
        tail_rx: mpsc::UnboundedReceiver<TailEvent>,
        api: Arc<FakeApi>,
        tails: Arc<FakeTails>,
    }

    impl Harness {
        fn new(accounts: &[&str]) -> Self {
            let api = Arc::new(FakeApi::default());
            let tails = Arc::new(FakeTails::default());
            let clock = ManualClock::shared(
                Utc.timestamp_opt(1_760_000_000, 0).single().expect("ts"),
            );
            let registry = Registry::new(accounts[0], StalenessPolicy::from_secs(30), clock);
            let (manager, tail_rx) = TailSessionManager::new(tails.clone());
            let (fetcher, fetch_rx) = Fetcher::new(api.clone(), api.clone(), Duration::from_secs(5));
            let settings = AppSettings {
                accounts: accounts
                    .iter()
                    .map(|id| AccountEntry {
                        id: id.to_string(),
                        ..AccountEntry::default()
                    })
                    .collect(),
                environments: BTreeMap::new(),
                max_pane_lines: 3,
                idle_after: Duration::from_secs(15),
            };
            Self {
                app: App::new(settings, registry, manager, fetcher),
                fetch_rx,
                tail_rx,
                api,
                tails,
            }
        }

        async fn pump_fetch(&mut self) -> FetchOutcome {
            let event = self.fetch_rx.recv().await.expect("fetch event");
            self.app.apply_fetch_event(event)
        }

        async fn pump_tail(&mut self) {
            let event = self.tail_rx.recv().await.expect("tail event");
            self.app.apply_tail_event(event);
        }
    }

    fn worker(name: &str, bindings: Vec<Binding>) -> Resource {
        Resource::new(name, name).with_bindings(bindings)
    }

    #[tokio::test]
    async fn listing_from_previous_account_never_lands() {
        let mut h = Harness::new(&["acct-A", "acct-B"]);
        h.api.list("acct-A", ServiceKind::Workers, vec![worker("a-only", vec![])]);
        h.api.list("acct-B", ServiceKind::Workers, vec![worker("b-api", vec![])]);

        h.app.start();
        h.app.switch_account("acct-B");

        let mut outcomes = Vec::new();
        while outcomes.len() < 2 {
            let event = h.fetch_rx.recv().await.expect("fetch event");
            if let FetchEvent::Resources { .. } = event {
                outcomes.push(h.app.apply_fetch_event(event));
            } else {
                h.app.apply_fetch_event(event);
            }
        }
        assert!(outcomes.contains(&FetchOutcome::Discarded));
        let workers = h
            .app
            .registry()
            .get_cache(ServiceKind::Workers)
            .expect("workers listing");
        assert_eq!(workers.names().collect::<Vec<_>>(), vec!["b-api"]);
    }

    #[tokio::test]
    async fn refresh_is_not_reissued_while_in_flight() {
        let mut h = Harness::new(&["acct-A"]);
        h.api.list("acct-A", ServiceKind::Kv, vec![Resource::new("ns-1", "SESSIONS")]);

        h.app.show_service(ServiceKind::Kv);
        assert!(h.app.is_loading(ServiceKind::Kv));
        assert!(!h.app.refresh_service(ServiceKind::Kv, true));

        assert_eq!(h.pump_fetch().await, FetchOutcome::Stored);
        assert!(!h.app.is_loading(ServiceKind::Kv));
        assert!(!h.app.refresh_service(ServiceKind::Kv, false));
        assert!(h.app.refresh_service(ServiceKind::Kv, true));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_listing_and_sets_status() {
        let mut h = Harness::new(&["acct-A"]);
        h.api.list("acct-A", ServiceKind::Kv, vec![Resource::new("ns-1", "SESSIONS")]);
        h.app.show_service(ServiceKind::Kv);
        h.pump_fetch().await;

        h.api.fail(ServiceKind::Kv);
        h.app.refresh_current();
        assert!(matches!(h.pump_fetch().await, FetchOutcome::Failed(_)));

        let rows = h.app.service_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "SESSIONS");
        assert!(h
            .app
            .status_note
            .as_deref()
            .unwrap_or_default()
            .contains("KV refresh failed"));
    }

    #[tokio::test]
    async fn detail_builds_binding_index_on_first_use() {
        let mut h = Harness::new(&["acct-A"]);
        h.api.list("acct-A", ServiceKind::Kv, vec![Resource::new("ns-1", "SESSIONS")]);
        h.api.list(
            "acct-A",
            ServiceKind::Workers,
            vec![worker(
                "api",
                vec![Binding::KvNamespace {
                    name: "SESSIONS".to_string(),
                    namespace_id: "ns-1".to_string(),
                }],
            )],
        );

        h.app.show_service(ServiceKind::Kv);
        h.pump_fetch().await;
        h.app.open_detail();
        let detail = h.app.detail_view().expect("detail");
        assert_eq!(detail.key, "ns-1");
        assert!(detail.bound_by.is_none());

        while h.app.registry().get_binding_index().is_none() {
            h.pump_fetch().await;
        }
        let detail = h.app.detail_view().expect("detail");
        assert_eq!(
            detail.bound_by,
            Some(vec![BoundReference {
                script_name: "api".to_string(),
                binding_name: "SESSIONS".to_string(),
            }])
        );
    }

    #[tokio::test]
    async fn switching_back_shows_cached_deployments_immediately() {
        let mut h = Harness::new(&["acct-A", "acct-B"]);
        h.api.list("acct-A", ServiceKind::Workers, vec![worker("api", vec![])]);

        h.app.start();
        // Workers listing, then the deployment sweep it triggers.
        h.pump_fetch().await;
        h.pump_fetch().await;
        assert_eq!(h.app.service_rows()[0].note, "deployed 01234567");

        h.app.cycle_account();
        assert_eq!(h.app.account_id(), "acct-B");
        assert!(h.app.service_rows().is_empty());

        h.app.cycle_account();
        assert_eq!(h.app.account_id(), "acct-A");
        let rows = h.app.service_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "api");
        assert_eq!(rows[0].note, "deployed 01234567 (cached)");
    }

    #[tokio::test]
    async fn tail_batches_fill_the_pane_buffer() {
        let mut h = Harness::new(&["acct-A"]);
        h.api.list("acct-A", ServiceKind::Workers, vec![worker("api", vec![])]);
        h.app.start();
        h.pump_fetch().await;

        h.app.tail_selected();
        assert_eq!(h.app.view, View::Tail);
        h.pump_tail().await;
        assert_eq!(h.app.pane_state(PaneId::Single), Some(TailState::Connected));

        let sender = h.tails.senders.lock().expect("senders lock")[0].clone();
        let batch: LineBatch = (0..4)
            .map(|i| LogLine {
                timestamp: Utc.timestamp_opt(1_760_000_000 + i, 0).single().expect("ts"),
                level: LogLevel::Log,
                text: format!("line {i}"),
            })
            .collect();
        sender.send(Ok(batch)).await.expect("send batch");
        h.pump_tail().await;

        let buffer = h.app.pane_buffer(PaneId::Single).expect("pane buffer");
        let texts: Vec<&str> = buffer.lines().map(|line| line.text.as_str()).collect();
        assert_eq!(texts, vec!["line 1", "line 2", "line 3"]);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(h.app.pane_state(PaneId::Single), Some(TailState::Streaming));
    }
}
