use cfdeck_core::{Resource, ServiceKind};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// One successful listing. Never mutated after it is written; a refresh
/// replaces the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCacheEntry {
    pub resources: Vec<Resource>,
    pub fetched_at: DateTime<Utc>,
}

impl ResourceCacheEntry {
    pub fn find_by_key(&self, service: ServiceKind, key: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|resource| resource.lookup_key(service) == key)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(Resource::display_name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceCache {
    entries: HashMap<ServiceKind, Arc<ResourceCacheEntry>>,
}

impl ResourceCache {
    pub fn insert(&mut self, service: ServiceKind, resources: Vec<Resource>, now: DateTime<Utc>) {
        self.entries.insert(
            service,
            Arc::new(ResourceCacheEntry {
                resources,
                fetched_at: now,
            }),
        );
    }

    pub fn get(&self, service: ServiceKind) -> Option<Arc<ResourceCacheEntry>> {
        self.entries.get(&service).cloned()
    }

    pub fn fetched_at(&self, service: ServiceKind) -> Option<DateTime<Utc>> {
        self.entries.get(&service).map(|entry| entry.fetched_at)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
