//! Account-scoped caches backing the dashboard views.
//!
//! Everything here is owned by the consumer loop and mutated synchronously;
//! background workers deliver results as events and the loop applies them
//! through [`Registry`].

pub mod binding_index;
pub mod deployment_cache;
pub mod registry;
pub mod resource_cache;
pub mod staleness;

pub use binding_index::BindingIndex;
pub use deployment_cache::{DeploymentCache, DeploymentCacheEntry};
pub use registry::{FetchOutcome, Registry};
pub use resource_cache::{ResourceCache, ResourceCacheEntry};
pub use staleness::{StalenessPolicy, DEFAULT_CACHE_TTL_SECS};
