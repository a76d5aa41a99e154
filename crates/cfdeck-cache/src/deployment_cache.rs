use cfdeck_core::{public_url, DeploymentInfo};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Deployment status of one script. An entry with `deployment == None` is a
/// confirmed negative, not a miss.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentCacheEntry {
    pub script_name: String,
    pub deployment: Option<DeploymentInfo>,
    pub subdomain: String,
    pub fetched_at: DateTime<Utc>,
}

impl DeploymentCacheEntry {
    pub fn is_deployed(&self) -> bool {
        self.deployment.is_some()
    }

    pub fn public_url(&self) -> Option<String> {
        self.deployment.as_ref()?;
        public_url(&self.script_name, &self.subdomain)
    }
}

/// Per-script deployment entries, partitioned by the account they were
/// fetched under. Partitions outlive account switches and are pruned lazily.
#[derive(Debug, Clone, Default)]
pub struct DeploymentCache {
    partitions: HashMap<String, HashMap<String, DeploymentCacheEntry>>,
}

impl DeploymentCache {
    pub fn insert(&mut self, account_id: &str, entry: DeploymentCacheEntry) {
        self.partitions
            .entry(account_id.to_string())
            .or_default()
            .insert(entry.script_name.clone(), entry);
    }

    pub fn get(&self, account_id: &str, script_name: &str) -> Option<&DeploymentCacheEntry> {
        self.partitions.get(account_id)?.get(script_name)
    }

    pub fn snapshot(&self, account_id: &str) -> HashMap<String, DeploymentCacheEntry> {
        self.partitions.get(account_id).cloned().unwrap_or_default()
    }

    pub fn scripts<'a>(&'a self, account_id: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.partitions
            .get(account_id)
            .into_iter()
            .flat_map(|partition| partition.keys().map(String::as_str))
    }

    /// Drops entries of `account_id` whose script is not in `live`. Returns
    /// the number of entries removed.
    pub fn retain_scripts(&mut self, account_id: &str, live: &HashSet<&str>) -> usize {
        let Some(partition) = self.partitions.get_mut(account_id) else {
            return 0;
        };
        let before = partition.len();
        partition.retain(|script, _| live.contains(script.as_str()));
        before - partition.len()
    }

    pub fn len(&self, account_id: &str) -> usize {
        self.partitions.get(account_id).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(script: &str, deployed: bool) -> DeploymentCacheEntry {
        DeploymentCacheEntry {
            script_name: script.to_string(),
            deployment: deployed.then(|| DeploymentInfo {
                deployment_id: format!("dep-{script}"),
                created_on: None,
                versions: Vec::new(),
            }),
            subdomain: "acme".to_string(),
            fetched_at: Utc.timestamp_opt(1_760_000_000, 0).single().expect("ts"),
        }
    }

    #[test]
    fn partitions_are_isolated_by_account() {
        let mut cache = DeploymentCache::default();
        cache.insert("acct-1", entry("api", true));
        cache.insert("acct-2", entry("api", false));

        assert!(cache.get("acct-1", "api").expect("acct-1").is_deployed());
        assert!(!cache.get("acct-2", "api").expect("acct-2").is_deployed());
        assert_eq!(cache.snapshot("acct-3").len(), 0);
    }

    #[test]
    fn retain_scripts_prunes_only_the_named_account() {
        let mut cache = DeploymentCache::default();
        cache.insert("acct-1", entry("api", true));
        cache.insert("acct-1", entry("cron", true));
        cache.insert("acct-2", entry("cron", true));

        let live: HashSet<&str> = ["api"].into_iter().collect();
        assert_eq!(cache.retain_scripts("acct-1", &live), 1);
        assert_eq!(cache.scripts("acct-1").collect::<Vec<_>>(), vec!["api"]);
        assert_eq!(cache.len("acct-2"), 1);
    }

    #[test]
    fn public_url_only_for_deployed_scripts() {
        assert_eq!(
            entry("api", true).public_url().as_deref(),
            Some("https://api.acme.workers.dev")
        );
        assert_eq!(entry("api", false).public_url(), None);
    }
}
