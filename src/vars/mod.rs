//! Variable system for kubeplay.
//!
//! The [`VariableStore`] is a single shared object logically partitioned by
//! host name. Each host sees a layered view (lowest to highest precedence):
//!
//! 1. inventory parameters (`all` vars, then group vars, then host vars)
//! 2. special variables (`inventory_hostname`, `inventory_hosts`, `groups`)
//! 3. gathered facts ("remote" variables, written once per host)
//! 4. runtime variables (play/role/block vars, `set_fact`, registered results,
//!    the transient loop `item`)
//! 5. extra variables from the command line
//!
//! Writes are serialized behind a `parking_lot::RwLock` and always address an
//! explicit host list, so a write for one host never becomes visible to another.

pub mod template;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::inventory::{Inventory, ALL_GROUP, LOCALHOST};

pub use template::TemplateEngine;

/// Ordered JSON object used for every variable map.
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// Errors that can occur in the variable system
#[derive(Debug, Error)]
pub enum VarsError {
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("cannot evaluate expression '{expr}': {message}")]
    Expression { expr: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid host pattern '{0}'")]
    InvalidPattern(String),
}

/// Result type for variable operations
pub type VarsResult<T> = Result<T, VarsError>;

#[derive(Debug, Default, Clone)]
struct HostVars {
    /// Facts gathered from the host
    remote: JsonMap,
    /// Variables produced while the playbook runs
    runtime: JsonMap,
}

#[derive(Debug)]
struct Inner {
    inventory: Inventory,
    extra: JsonMap,
    hosts: RwLock<HashMap<String, HostVars>>,
}

/// Per-host variable state shared by every executor of a run.
#[derive(Debug, Clone)]
pub struct VariableStore {
    inner: Arc<Inner>,
}

impl VariableStore {
    /// Create a store for an inventory, seeding an entry for every host plus
    /// `localhost`.
    pub fn new(inventory: Inventory, extra: JsonMap) -> Self {
        let mut hosts: HashMap<String, HostVars> = inventory
            .host_names()
            .into_iter()
            .map(|h| (h, HostVars::default()))
            .collect();
        hosts.entry(LOCALHOST.to_string()).or_default();

        Self {
            inner: Arc::new(Inner {
                inventory,
                extra,
                hosts: RwLock::new(hosts),
            }),
        }
    }

    /// The inventory backing this store
    pub fn inventory(&self) -> &Inventory {
        &self.inner.inventory
    }

    /// Deep-merge `vars` into the runtime layer of each listed host.
    pub fn merge_runtime(&self, vars: &JsonMap, hosts: &[String]) {
        if vars.is_empty() {
            return;
        }
        let mut guard = self.inner.hosts.write();
        for host in hosts {
            let entry = guard.entry(host.clone()).or_default();
            combine_variables(&mut entry.runtime, vars);
        }
    }

    /// Store gathered facts for a host. Facts are written only the first time
    /// they are gathered; returns whether this call stored them.
    pub fn merge_remote(&self, vars: JsonMap, host: &str) -> bool {
        let mut guard = self.inner.hosts.write();
        let entry = guard.entry(host.to_string()).or_default();
        if !entry.remote.is_empty() {
            debug!(host, "facts already gathered, keeping first result");
            return false;
        }
        entry.remote = vars;
        true
    }

    /// Whether facts were already gathered for a host
    pub fn has_remote(&self, host: &str) -> bool {
        self.inner
            .hosts
            .read()
            .get(host)
            .map(|h| !h.remote.is_empty())
            .unwrap_or(false)
    }

    /// Remove runtime variables from one host.
    pub fn remove_runtime(&self, keys: &[&str], host: &str) {
        if let Some(entry) = self.inner.hosts.write().get_mut(host) {
            for key in keys {
                entry.runtime.remove(*key);
            }
        }
    }

    /// Look up a single runtime variable of a host
    pub fn runtime_var(&self, host: &str, key: &str) -> Option<JsonValue> {
        self.inner
            .hosts
            .read()
            .get(host)
            .and_then(|h| h.runtime.get(key).cloned())
    }

    /// Inventory parameters of a host: `all` vars, then group vars, then host vars.
    fn inventory_params(&self, host: &str) -> JsonMap {
        let inventory = &self.inner.inventory;
        let mut params = inventory.vars.clone();
        for group in inventory.groups_of(host) {
            if let Some(g) = inventory.groups.get(&group) {
                combine_variables(&mut params, &g.vars);
            }
        }
        combine_variables(&mut params, &inventory.host_vars(host));
        params
    }

    /// The complete variable view of a host.
    pub fn all_vars(&self, host: &str) -> JsonMap {
        let mut vars = self.inventory_params(host);

        let inventory = &self.inner.inventory;
        let mut inventory_hosts = JsonMap::new();
        for name in inventory.host_names() {
            let mut params = self.inventory_params(&name);
            params.insert(
                "inventory_hostname".to_string(),
                JsonValue::String(name.clone()),
            );
            inventory_hosts.insert(name, JsonValue::Object(params));
        }
        vars.insert(
            "inventory_hostname".to_string(),
            JsonValue::String(host.to_string()),
        );
        vars.insert(
            "inventory_hosts".to_string(),
            JsonValue::Object(inventory_hosts),
        );
        vars.insert(
            "groups".to_string(),
            JsonValue::Object(inventory.group_map()),
        );

        if let Some(entry) = self.inner.hosts.read().get(host) {
            combine_variables(&mut vars, &entry.remote);
            combine_variables(&mut vars, &entry.runtime);
        }
        combine_variables(&mut vars, &self.inner.extra);
        vars
    }

    /// Resolve host patterns to an ordered, de-duplicated host list.
    ///
    /// Each pattern may be a comma separated list of host names, group names,
    /// `all`, `localhost`, `group[N]` or `group | random`. Unknown names are
    /// reported and skipped.
    pub fn resolve_hosts(&self, patterns: &[String]) -> VarsResult<Vec<String>> {
        let mut hosts: Vec<String> = Vec::new();
        let mut push = |name: String, hosts: &mut Vec<String>| {
            if !hosts.contains(&name) {
                hosts.push(name);
            }
        };

        for pattern in patterns.iter().flat_map(|p| p.split(',')) {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            for host in self.resolve_pattern(pattern)? {
                push(host, &mut hosts);
            }
        }
        Ok(hosts)
    }

    fn resolve_pattern(&self, pattern: &str) -> VarsResult<Vec<String>> {
        let inventory = &self.inner.inventory;

        if let Some((group, modifier)) = pattern.split_once('|') {
            let (group, modifier) = (group.trim(), modifier.trim());
            if modifier != "random" {
                return Err(VarsError::InvalidPattern(pattern.to_string()));
            }
            let members = self.resolve_pattern(group)?;
            return Ok(members
                .choose(&mut rand::thread_rng())
                .cloned()
                .into_iter()
                .collect());
        }

        if let Some(open) = pattern.find('[') {
            let index = pattern[open + 1..]
                .strip_suffix(']')
                .and_then(|i| i.trim().parse::<usize>().ok())
                .ok_or_else(|| VarsError::InvalidPattern(pattern.to_string()))?;
            let members = self.resolve_pattern(&pattern[..open])?;
            return Ok(match members.get(index) {
                Some(host) => vec![host.clone()],
                None => {
                    warn!(pattern, size = members.len(), "host index out of range");
                    Vec::new()
                }
            });
        }

        if pattern == ALL_GROUP {
            return Ok(inventory.host_names());
        }
        if inventory.has_host(pattern) {
            return Ok(vec![pattern.to_string()]);
        }
        if inventory.has_group(pattern) {
            return Ok(inventory.hosts_in_group(pattern));
        }
        warn!(pattern, "host pattern matches no host or group");
        Ok(Vec::new())
    }

    /// Length of the longest known host name, for aligned progress output
    pub fn host_max_len(&self) -> usize {
        self.inner
            .hosts
            .read()
            .keys()
            .map(|h| h.len())
            .max()
            .unwrap_or(0)
    }
}

/// Deep-merge `overlay` into `base`: nested objects merge key by key, any
/// other value replaces the existing one.
pub fn combine_variables(base: &mut JsonMap, overlay: &JsonMap) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(JsonValue::Object(existing)), JsonValue::Object(incoming)) => {
                combine_variables(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Convert a YAML mapping into a JSON variable map.
pub fn yaml_to_vars(value: &serde_yaml::Value) -> VarsResult<JsonMap> {
    match serde_json::to_value(value)? {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(JsonMap::new()),
        other => Err(VarsError::Expression {
            expr: other.to_string(),
            message: "vars must be a mapping".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Group;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: JsonValue) -> JsonMap {
        match value {
            JsonValue::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn store() -> VariableStore {
        let mut inv = Inventory::new();
        inv.add_host("node1", map(json!({"ip": "10.0.0.1", "role": "host"})));
        inv.add_host("node2", JsonMap::new());
        inv.add_host("node3", JsonMap::new());
        inv.add_group(
            "etcd",
            Group {
                hosts: vec!["node1".into(), "node2".into()],
                vars: map(json!({"role": "group", "etcd_port": 2379})),
                ..Default::default()
            },
        );
        inv.vars = map(json!({"role": "all", "cluster": "demo"}));
        VariableStore::new(inv, map(json!({"cluster": "override"})))
    }

    #[test]
    fn test_layer_precedence() {
        let vars = store().all_vars("node1");
        assert_eq!(vars["role"], "host");
        assert_eq!(vars["etcd_port"], 2379);
        assert_eq!(vars["cluster"], "override");
        assert_eq!(vars["inventory_hostname"], "node1");
        assert_eq!(vars["groups"]["etcd"], json!(["node1", "node2"]));
        assert_eq!(vars["inventory_hosts"]["node2"]["etcd_port"], 2379);
    }

    #[test]
    fn test_runtime_merge_is_per_host() {
        let store = store();
        store.merge_runtime(&map(json!({"x": 1})), &["node1".to_string()]);
        assert_eq!(store.all_vars("node1")["x"], 1);
        assert!(store.all_vars("node2").get("x").is_none());

        store.remove_runtime(&["x"], "node1");
        assert!(store.all_vars("node1").get("x").is_none());
    }

    #[test]
    fn test_runtime_deep_merge() {
        let store = store();
        let hosts = vec!["node1".to_string()];
        store.merge_runtime(&map(json!({"cfg": {"a": 1, "b": 1}})), &hosts);
        store.merge_runtime(&map(json!({"cfg": {"b": 2}})), &hosts);
        assert_eq!(store.all_vars("node1")["cfg"], json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_remote_written_once() {
        let store = store();
        assert!(store.merge_remote(map(json!({"os": {"kernel": "6.1"}})), "node1"));
        assert!(!store.merge_remote(map(json!({"os": {"kernel": "5.0"}})), "node1"));
        assert_eq!(store.all_vars("node1")["os"]["kernel"], "6.1");
    }

    #[test]
    fn test_resolve_hosts() {
        let store = store();
        let resolve = |p: &[&str]| {
            store
                .resolve_hosts(&p.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .unwrap()
        };
        assert_eq!(resolve(&["all"]), vec!["node1", "node2", "node3"]);
        assert_eq!(resolve(&["etcd", "node3"]), vec!["node1", "node2", "node3"]);
        assert_eq!(resolve(&["node2,etcd"]), vec!["node2", "node1"]);
        assert_eq!(resolve(&["etcd[1]"]), vec!["node2"]);
        assert!(resolve(&["etcd[7]"]).is_empty());
        assert_eq!(resolve(&["localhost"]), vec!["localhost"]);
        assert!(resolve(&["missing"]).is_empty());

        let random = resolve(&["etcd | random"]);
        assert_eq!(random.len(), 1);
        assert!(random[0] == "node1" || random[0] == "node2");
    }

    #[test]
    fn test_invalid_pattern() {
        let store = store();
        assert!(store.resolve_hosts(&["etcd[x]".to_string()]).is_err());
        assert!(store.resolve_hosts(&["etcd | first".to_string()]).is_err());
    }

    #[test]
    fn test_host_max_len() {
        assert_eq!(store().host_max_len(), "localhost".len());
    }
}
