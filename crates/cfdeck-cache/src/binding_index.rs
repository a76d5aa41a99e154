use cfdeck_core::{BoundReference, ComputeUnit, ServiceKind};
use std::collections::HashMap;

/// Inverted view of declared bindings: which scripts reference a resource.
///
/// Built in one pass from data already in hand; an index is immutable and is
/// replaced wholesale on rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingIndex {
    mapping: HashMap<(ServiceKind, String), Vec<BoundReference>>,
    unit_count: usize,
}

impl BindingIndex {
    pub fn build(units: &[ComputeUnit]) -> Self {
        let mut mapping: HashMap<(ServiceKind, String), Vec<BoundReference>> = HashMap::new();
        for unit in units {
            for binding in &unit.bindings {
                let Some((service, key, binding_name)) = binding.target() else {
                    continue;
                };
                mapping
                    .entry((service, key.to_string()))
                    .or_default()
                    .push(BoundReference {
                        script_name: unit.script_name.clone(),
                        binding_name: binding_name.to_string(),
                    });
            }
        }
        Self {
            mapping,
            unit_count: units.len(),
        }
    }

    /// Scripts referencing `(service, key)`, in listing order. Empty when
    /// nothing references the key.
    pub fn lookup(&self, service: ServiceKind, key: &str) -> &[BoundReference] {
        self.mapping
            .get(&(service, key.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn unit_count(&self) -> usize {
        self.unit_count
    }

    /// Number of distinct referenced resources.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfdeck_core::Binding;

    fn kv(name: &str, id: &str) -> Binding {
        Binding::KvNamespace {
            name: name.to_string(),
            namespace_id: id.to_string(),
        }
    }

    #[test]
    fn build_inverts_bindings_in_listing_order() {
        let units = vec![
            ComputeUnit::new("api", vec![kv("SESSIONS", "ns-1"), Binding::Other]),
            ComputeUnit::new(
                "auth",
                vec![
                    kv("SESSION_STORE", "ns-1"),
                    Binding::Service {
                        name: "API".to_string(),
                        service: "api".to_string(),
                    },
                ],
            ),
        ];
        let index = BindingIndex::build(&units);

        assert_eq!(index.unit_count(), 2);
        assert_eq!(index.len(), 2);
        let refs = index.lookup(ServiceKind::Kv, "ns-1");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].script_name, "api");
        assert_eq!(refs[0].binding_name, "SESSIONS");
        assert_eq!(refs[1].script_name, "auth");
        assert_eq!(index.lookup(ServiceKind::Workers, "api")[0].binding_name, "API");
    }

    #[test]
    fn lookup_of_unreferenced_key_is_empty() {
        let index = BindingIndex::build(&[ComputeUnit::new("api", Vec::new())]);
        assert!(index.is_empty());
        assert!(index.lookup(ServiceKind::R2, "assets").is_empty());
        assert!(index.lookup(ServiceKind::Kv, "ns-1").is_empty());
    }
}
