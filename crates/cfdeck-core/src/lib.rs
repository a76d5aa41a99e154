pub mod client;
pub mod clock;
pub mod tail_wire;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A platform service whose resources can be listed and cached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    Workers,
    #[serde(rename = "KV")]
    Kv,
    R2,
    D1,
    Queues,
    #[serde(rename = "Durable Objects")]
    DurableObjects,
    Hyperdrive,
    Vectorize,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 8] = [
        ServiceKind::Workers,
        ServiceKind::Kv,
        ServiceKind::R2,
        ServiceKind::D1,
        ServiceKind::Queues,
        ServiceKind::DurableObjects,
        ServiceKind::Hyperdrive,
        ServiceKind::Vectorize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Workers => "Workers",
            ServiceKind::Kv => "KV",
            ServiceKind::R2 => "R2",
            ServiceKind::D1 => "D1",
            ServiceKind::Queues => "Queues",
            ServiceKind::DurableObjects => "Durable Objects",
            ServiceKind::Hyperdrive => "Hyperdrive",
            ServiceKind::Vectorize => "Vectorize",
        }
    }

    /// Services whose resources are referenced by name rather than by id.
    fn keyed_by_name(&self) -> bool {
        matches!(
            self,
            ServiceKind::Workers | ServiceKind::R2 | ServiceKind::Queues | ServiceKind::Vectorize
        )
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace(&['_', '-'][..], " ");
        match normalized.as_str() {
            "workers" | "worker" | "scripts" => Ok(ServiceKind::Workers),
            "kv" | "kv namespaces" | "workers kv" => Ok(ServiceKind::Kv),
            "r2" | "r2 buckets" => Ok(ServiceKind::R2),
            "d1" | "d1 databases" => Ok(ServiceKind::D1),
            "queues" | "queue" => Ok(ServiceKind::Queues),
            "durable objects" | "durableobjects" | "do" => Ok(ServiceKind::DurableObjects),
            "hyperdrive" => Ok(ServiceKind::Hyperdrive),
            "vectorize" => Ok(ServiceKind::Vectorize),
            other => Err(format!("Unknown service: {other}")),
        }
    }
}

/// One entry of a service listing, in API order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    #[serde(default, alias = "uuid", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "title", alias = "script_name")]
    pub name: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl Resource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            bindings: Vec::new(),
            extra: HashMap::new(),
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<Binding>) -> Self {
        self.bindings = bindings;
        self
    }

    /// The identifier bindings use to point at this resource.
    pub fn lookup_key(&self, service: ServiceKind) -> &str {
        if service.keyed_by_name() || self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// A declared reference from a script to another resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Binding {
    KvNamespace {
        name: String,
        namespace_id: String,
    },
    R2Bucket {
        name: String,
        bucket_name: String,
    },
    D1 {
        name: String,
        #[serde(alias = "database_id")]
        id: String,
    },
    Queue {
        name: String,
        queue_name: String,
    },
    Service {
        name: String,
        service: String,
    },
    DurableObjectNamespace {
        name: String,
        class_name: String,
    },
    Hyperdrive {
        name: String,
        id: String,
    },
    Vectorize {
        name: String,
        index_name: String,
    },
    #[serde(other)]
    Other,
}

impl Binding {
    /// `(service, resource key, binding name)` for bindings that reference a
    /// listable resource; `None` for vars, secrets and unknown kinds.
    pub fn target(&self) -> Option<(ServiceKind, &str, &str)> {
        match self {
            Binding::KvNamespace { name, namespace_id } => {
                Some((ServiceKind::Kv, namespace_id.as_str(), name.as_str()))
            }
            Binding::R2Bucket { name, bucket_name } => {
                Some((ServiceKind::R2, bucket_name.as_str(), name.as_str()))
            }
            Binding::D1 { name, id } => Some((ServiceKind::D1, id.as_str(), name.as_str())),
            Binding::Queue { name, queue_name } => {
                Some((ServiceKind::Queues, queue_name.as_str(), name.as_str()))
            }
            Binding::Service { name, service } => {
                Some((ServiceKind::Workers, service.as_str(), name.as_str()))
            }
            Binding::DurableObjectNamespace { name, class_name } => Some((
                ServiceKind::DurableObjects,
                class_name.as_str(),
                name.as_str(),
            )),
            Binding::Hyperdrive { name, id } => {
                Some((ServiceKind::Hyperdrive, id.as_str(), name.as_str()))
            }
            Binding::Vectorize { name, index_name } => {
                Some((ServiceKind::Vectorize, index_name.as_str(), name.as_str()))
            }
            Binding::Other => None,
        }
    }
}

/// A script together with the bindings it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeUnit {
    pub script_name: String,
    pub bindings: Vec<Binding>,
}

impl ComputeUnit {
    pub fn new(script_name: impl Into<String>, bindings: Vec<Binding>) -> Self {
        Self {
            script_name: script_name.into(),
            bindings,
        }
    }

    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            script_name: resource.display_name().to_string(),
            bindings: resource.bindings.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BoundReference {
    pub script_name: String,
    pub binding_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionSplit {
    pub version_id: String,
    pub percentage: f64,
}

/// The active deployment of a script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentInfo {
    #[serde(alias = "id")]
    pub deployment_id: String,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub versions: Vec<VersionSplit>,
}

impl DeploymentInfo {
    /// True when traffic is divided across more than one version.
    pub fn is_split(&self) -> bool {
        self.versions.len() > 1
    }

    pub fn primary_version(&self) -> Option<&VersionSplit> {
        self.versions
            .iter()
            .max_by(|a, b| a.percentage.total_cmp(&b.percentage))
    }
}

pub fn public_url(script_name: &str, subdomain: &str) -> Option<String> {
    let subdomain = subdomain.trim();
    if subdomain.is_empty() || script_name.is_empty() {
        return None;
    }
    Some(format!("https://{script_name}.{subdomain}.workers.dev"))
}

/// Session identifier assigned by the streaming client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
    Request,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Log
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Request => "request",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "log" => Ok(LogLevel::Log),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "request" => Ok(LogLevel::Request),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub text: String,
}

/// Lines decoded from one stream read, in stream order.
pub type LineBatch = Vec<LogLine>;

/// Accept ids that arrive as strings or numbers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_kind_parses_aliases() {
        assert_eq!("workers".parse::<ServiceKind>(), Ok(ServiceKind::Workers));
        assert_eq!("KV".parse::<ServiceKind>(), Ok(ServiceKind::Kv));
        assert_eq!(
            "durable_objects".parse::<ServiceKind>(),
            Ok(ServiceKind::DurableObjects)
        );
        assert!("pages".parse::<ServiceKind>().is_err());
        for kind in ServiceKind::ALL {
            assert_eq!(kind.as_str().parse::<ServiceKind>(), Ok(kind));
        }
    }

    #[test]
    fn worker_listing_decodes_bindings_and_skips_unknown_kinds() {
        let raw = serde_json::json!({
            "id": "api-gateway",
            "bindings": [
                {"type": "kv_namespace", "name": "SESSIONS", "namespace_id": "ns-1"},
                {"type": "d1", "name": "DB", "database_id": "db-9"},
                {"type": "secret_text", "name": "TOKEN"},
                {"type": "service", "name": "AUTH", "service": "auth-worker"}
            ],
            "created_on": "2026-01-02T00:00:00Z"
        });
        let resource: Resource = serde_json::from_value(raw).expect("decode worker");
        assert_eq!(resource.id, "api-gateway");
        assert_eq!(resource.display_name(), "api-gateway");
        assert_eq!(resource.bindings.len(), 4);
        assert_eq!(resource.bindings[2], Binding::Other);
        assert!(resource.extra.contains_key("created_on"));

        let targets: Vec<_> = resource
            .bindings
            .iter()
            .filter_map(Binding::target)
            .collect();
        assert_eq!(
            targets,
            vec![
                (ServiceKind::Kv, "ns-1", "SESSIONS"),
                (ServiceKind::D1, "db-9", "DB"),
                (ServiceKind::Workers, "auth-worker", "AUTH"),
            ]
        );
    }

    #[test]
    fn lookup_key_uses_name_for_name_keyed_services() {
        let bucket = Resource::new("", "assets");
        assert_eq!(bucket.lookup_key(ServiceKind::R2), "assets");
        let namespace = Resource::new("ns-1", "SESSIONS");
        assert_eq!(namespace.lookup_key(ServiceKind::Kv), "ns-1");
        let numeric: Resource =
            serde_json::from_value(serde_json::json!({"id": 42, "name": "db"})).expect("decode");
        assert_eq!(numeric.id, "42");
    }

    #[test]
    fn deployment_split_and_primary_version() {
        let info = DeploymentInfo {
            deployment_id: "dep-1".to_string(),
            created_on: None,
            versions: vec![
                VersionSplit {
                    version_id: "v1".to_string(),
                    percentage: 10.0,
                },
                VersionSplit {
                    version_id: "v2".to_string(),
                    percentage: 90.0,
                },
            ],
        };
        assert!(info.is_split());
        assert_eq!(
            info.primary_version().map(|v| v.version_id.as_str()),
            Some("v2")
        );
    }

    #[test]
    fn public_url_requires_subdomain() {
        assert_eq!(
            public_url("api", "acme"),
            Some("https://api.acme.workers.dev".to_string())
        );
        assert_eq!(public_url("api", "  "), None);
    }
}
