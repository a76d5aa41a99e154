use crate::binding_index::BindingIndex;
use crate::deployment_cache::{DeploymentCache, DeploymentCacheEntry};
use crate::resource_cache::{ResourceCache, ResourceCacheEntry};
use crate::staleness::StalenessPolicy;
use cfdeck_core::client::{ClientError, DeploymentStatus};
use cfdeck_core::clock::SharedClock;
use cfdeck_core::{BoundReference, DeploymentInfo, Resource, ServiceKind};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a completed background fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Stored,
    /// Issued under an account that is no longer active; nothing was written.
    Discarded,
    /// The fetch failed; any existing entry was left in place.
    Failed(String),
}

/// Single owner of all cached server state for the active account.
#[derive(Debug)]
pub struct Registry {
    account_id: String,
    resources: ResourceCache,
    deployments: DeploymentCache,
    binding_index: Option<Arc<BindingIndex>>,
    policy: StalenessPolicy,
    clock: SharedClock,
}

impl Registry {
    pub fn new(account_id: impl Into<String>, policy: StalenessPolicy, clock: SharedClock) -> Self {
        Self {
            account_id: account_id.into(),
            resources: ResourceCache::default(),
            deployments: DeploymentCache::default(),
            binding_index: None,
            policy,
            clock,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn is_current_account(&self, account_id: &str) -> bool {
        self.account_id == account_id
    }

    /// Changes the active account. Does not clear anything; callers run
    /// [`Registry::clear_services`] first.
    pub fn set_account_id(&mut self, account_id: impl Into<String>) {
        let account_id = account_id.into();
        if account_id != self.account_id {
            info!(event = "account_switched", from = %self.account_id, to = %account_id);
        }
        self.account_id = account_id;
    }

    pub fn set_cache(&mut self, service: ServiceKind, resources: Vec<Resource>) {
        let now = self.clock.now();
        self.resources.insert(service, resources, now);
    }

    pub fn get_cache(&self, service: ServiceKind) -> Option<Arc<ResourceCacheEntry>> {
        self.resources.get(service)
    }

    pub fn is_cache_stale(&self, service: ServiceKind) -> bool {
        self.policy
            .is_stale(self.resources.fetched_at(service), self.clock.now())
    }

    /// Empties every listing and drops the binding index.
    pub fn clear_services(&mut self) {
        self.resources.clear();
        self.binding_index = None;
    }

    pub fn set_deployment_cache(
        &mut self,
        script_name: &str,
        deployment: Option<DeploymentInfo>,
        subdomain: impl Into<String>,
    ) {
        let entry = DeploymentCacheEntry {
            script_name: script_name.to_string(),
            deployment,
            subdomain: subdomain.into(),
            fetched_at: self.clock.now(),
        };
        self.deployments.insert(&self.account_id, entry);
    }

    pub fn get_deployment_cache(&self, script_name: &str) -> Option<&DeploymentCacheEntry> {
        self.deployments.get(&self.account_id, script_name)
    }

    pub fn is_deployment_cache_stale(&self, script_name: &str) -> bool {
        let fetched_at = self
            .deployments
            .get(&self.account_id, script_name)
            .map(|entry| entry.fetched_at);
        self.policy.is_stale(fetched_at, self.clock.now())
    }

    /// Scripts whose deployment status the active account knows about: the
    /// Workers listing plus anything already in the deployment cache.
    pub fn known_scripts(&self) -> BTreeSet<String> {
        let mut scripts: BTreeSet<String> = self
            .deployments
            .scripts(&self.account_id)
            .map(str::to_string)
            .collect();
        if let Some(workers) = self.resources.get(ServiceKind::Workers) {
            scripts.extend(workers.names().map(str::to_string));
        }
        scripts
    }

    pub fn stale_deployment_scripts(&self) -> Vec<String> {
        self.known_scripts()
            .into_iter()
            .filter(|script| self.is_deployment_cache_stale(script))
            .collect()
    }

    pub fn any_deployment_cache_stale(&self) -> bool {
        self.known_scripts()
            .iter()
            .any(|script| self.is_deployment_cache_stale(script))
    }

    /// Point-in-time copy of the active account's deployment entries.
    pub fn get_all_deployment_caches(&self) -> HashMap<String, DeploymentCacheEntry> {
        self.deployments.snapshot(&self.account_id)
    }

    /// Drops deployment entries for scripts the active account no longer lists.
    pub fn prune_deployment_caches(&mut self, live_scripts: &HashSet<&str>) -> usize {
        let removed = self.deployments.retain_scripts(&self.account_id, live_scripts);
        if removed > 0 {
            debug!(
                event = "deployment_cache_pruned",
                account_id = %self.account_id,
                removed
            );
        }
        removed
    }

    pub fn get_binding_index(&self) -> Option<Arc<BindingIndex>> {
        self.binding_index.clone()
    }

    pub fn set_binding_index(&mut self, index: BindingIndex) {
        self.binding_index = Some(Arc::new(index));
    }

    pub fn needs_binding_index(&self) -> bool {
        self.binding_index.is_none()
    }

    /// Empty both when nothing references the key and when no index has been
    /// built; use [`Registry::get_binding_index`] to tell the two apart.
    pub fn lookup_bindings(&self, service: ServiceKind, key: &str) -> Vec<BoundReference> {
        self.binding_index
            .as_ref()
            .map(|index| index.lookup(service, key).to_vec())
            .unwrap_or_default()
    }

    pub fn apply_resource_fetch(
        &mut self,
        account_id: &str,
        service: ServiceKind,
        result: Result<Vec<Resource>, ClientError>,
    ) -> FetchOutcome {
        if !self.is_current_account(account_id) {
            debug!(
                event = "fetch_discarded",
                kind = "resources",
                service = %service,
                issued_under = %account_id,
                active = %self.account_id
            );
            return FetchOutcome::Discarded;
        }
        match result {
            Ok(resources) => {
                debug!(
                    event = "fetch_stored",
                    kind = "resources",
                    service = %service,
                    count = resources.len()
                );
                if service == ServiceKind::Workers {
                    let live: HashSet<&str> =
                        resources.iter().map(Resource::display_name).collect();
                    self.prune_deployment_caches(&live);
                }
                self.set_cache(service, resources);
                FetchOutcome::Stored
            }
            Err(err) => {
                warn!(
                    event = "fetch_failed",
                    kind = "resources",
                    service = %service,
                    error = %err
                );
                FetchOutcome::Failed(format!("{service} refresh failed: {err}"))
            }
        }
    }

    pub fn apply_deployment_fetch(
        &mut self,
        account_id: &str,
        script_name: &str,
        result: Result<DeploymentStatus, ClientError>,
    ) -> FetchOutcome {
        if !self.is_current_account(account_id) {
            debug!(
                event = "fetch_discarded",
                kind = "deployment",
                script = %script_name,
                issued_under = %account_id
            );
            return FetchOutcome::Discarded;
        }
        match result {
            Ok(status) => {
                self.set_deployment_cache(script_name, status.deployment, status.subdomain);
                FetchOutcome::Stored
            }
            Err(err) => {
                warn!(
                    event = "fetch_failed",
                    kind = "deployment",
                    script = %script_name,
                    error = %err
                );
                FetchOutcome::Failed(format!("deployment lookup for {script_name} failed: {err}"))
            }
        }
    }

    pub fn apply_binding_index(&mut self, account_id: &str, index: BindingIndex) -> FetchOutcome {
        if !self.is_current_account(account_id) {
            debug!(event = "fetch_discarded", kind = "binding_index", issued_under = %account_id);
            return FetchOutcome::Discarded;
        }
        info!(
            event = "binding_index_built",
            units = index.unit_count(),
            resources = index.len()
        );
        self.set_binding_index(index);
        FetchOutcome::Stored
    }
}
