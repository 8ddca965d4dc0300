//! Inventory management for kubeplay.
//!
//! An inventory names the hosts a playbook may target, arranges them into
//! (possibly nested) groups and attaches variables at three levels: global,
//! per group and per host.
//!
//! ```yaml
//! hosts:
//!   node1:
//!     connector:
//!       type: local
//!   node2: {}
//! groups:
//!   etcd:
//!     hosts: [node1]
//!   k8s_cluster:
//!     groups: [etcd]
//!     hosts: [node2]
//!     vars:
//!       kube_version: v1.30.0
//! vars:
//!   cluster_name: demo
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::vars::JsonMap;

/// Name of the implicit group containing every host.
pub const ALL_GROUP: &str = "all";

/// Host that is always addressable, even when absent from the inventory.
pub const LOCALHOST: &str = "localhost";

/// Errors that can occur during inventory operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("group '{group}' references unknown group '{child}'")]
    UnknownChildGroup { group: String, child: String },

    #[error("group '{group}' references unknown host '{host}'")]
    UnknownHost { group: String, host: String },
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

/// A named group of hosts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    /// Hosts listed directly in this group
    pub hosts: Vec<String>,
    /// Child groups whose hosts belong to this group as well
    pub groups: Vec<String>,
    /// Variables shared by every host of the group
    pub vars: JsonMap,
}

/// The set of hosts and groups a playbook runs against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    /// Host name to host variables. A bare `node:` entry has no variables.
    pub hosts: IndexMap<String, JsonValue>,
    /// Group name to group definition
    pub groups: IndexMap<String, Group>,
    /// Variables applied to every host
    pub vars: JsonMap,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an inventory from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> InventoryResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse an inventory from YAML text and validate group references
    pub fn from_yaml(content: &str) -> InventoryResult<Self> {
        let inventory: Inventory = serde_yaml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Add a host with its variables
    pub fn add_host(&mut self, name: impl Into<String>, vars: JsonMap) {
        self.hosts.insert(name.into(), JsonValue::Object(vars));
    }

    /// Add a group
    pub fn add_group(&mut self, name: impl Into<String>, group: Group) {
        self.groups.insert(name.into(), group);
    }

    fn validate(&self) -> InventoryResult<()> {
        for (name, group) in &self.groups {
            if let Some(child) = group
                .groups
                .iter()
                .find(|c| !self.groups.contains_key(c.as_str()))
            {
                return Err(InventoryError::UnknownChildGroup {
                    group: name.clone(),
                    child: child.clone(),
                });
            }
            if let Some(host) = group
                .hosts
                .iter()
                .find(|h| !self.hosts.contains_key(h.as_str()) && h.as_str() != LOCALHOST)
            {
                return Err(InventoryError::UnknownHost {
                    group: name.clone(),
                    host: host.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether a host name is addressable
    pub fn has_host(&self, name: &str) -> bool {
        name == LOCALHOST || self.hosts.contains_key(name)
    }

    /// Whether a group is defined (the implicit `all` group always is)
    pub fn has_group(&self, name: &str) -> bool {
        name == ALL_GROUP || self.groups.contains_key(name)
    }

    /// Every inventory host in declaration order
    pub fn host_names(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    /// Variables declared on a host, empty when none are set
    pub fn host_vars(&self, host: &str) -> JsonMap {
        match self.hosts.get(host) {
            Some(JsonValue::Object(map)) => map.clone(),
            _ => JsonMap::new(),
        }
    }

    /// Hosts of a group, child groups first, without duplicates.
    pub fn hosts_in_group(&self, name: &str) -> Vec<String> {
        if name == ALL_GROUP {
            return self.host_names();
        }
        let mut visited = HashSet::new();
        let mut hosts = Vec::new();
        self.collect_group_hosts(name, &mut visited, &mut hosts);
        hosts
    }

    fn collect_group_hosts(&self, name: &str, visited: &mut HashSet<String>, out: &mut Vec<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        let Some(group) = self.groups.get(name) else {
            return;
        };
        for child in &group.groups {
            self.collect_group_hosts(child, visited, out);
        }
        for host in &group.hosts {
            if !out.contains(host) {
                out.push(host.clone());
            }
        }
    }

    /// Names of the groups a host belongs to, directly or through a child group
    pub fn groups_of(&self, host: &str) -> Vec<String> {
        self.groups
            .keys()
            .filter(|g| self.hosts_in_group(g).iter().any(|h| h == host))
            .cloned()
            .collect()
    }

    /// Group name to member hosts, including `all`
    pub fn group_map(&self) -> JsonMap {
        let mut groups = JsonMap::new();
        groups.insert(ALL_GROUP.to_string(), JsonValue::from(self.host_names()));
        for name in self.groups.keys() {
            groups.insert(name.clone(), JsonValue::from(self.hosts_in_group(name)));
        }
        groups
    }
}
