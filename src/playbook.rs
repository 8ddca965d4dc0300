//! Playbook hierarchy model.
//!
//! A playbook is an ordered list of plays. A play selects hosts and runs four
//! phases (`pre_tasks`, `roles`, `tasks`, `post_tasks`). Roles and phases are
//! made of [`Block`]s, a recursive control-flow unit:
//!
//! ```text
//! Block
//!  ├── Task          leaf: one module call plus register/loop/failed_when/retries
//!  ├── Composite     nested block / rescue / always lists
//!  └── IncludeTasks  marker, expanded into its following siblings at load time
//! ```
//!
//! Tags, `when` and `ignore_errors` are inherited down the tree. Blocks are
//! decoded in two phases: known keys into typed fields, every remaining key
//! into [`TaskBlock::unknown_fields`] where the module name is found later.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use thiserror::Error;

use crate::tags::Tags;
use crate::vars::JsonMap;

/// Errors raised while loading the hierarchy from source files
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in '{path}': {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid playbook structure: {0}")]
    InvalidStructure(String),

    #[error("role '{role}' not found under '{path}'")]
    RoleNotFound { role: String, path: PathBuf },

    #[error("role dependency cycle: {0}")]
    RoleCycle(String),

    #[error("include error: {0}")]
    Include(String),
}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Parse a boolean the way playbook authors write them (`yes`, `on`, `1`, ...)
pub(crate) fn parse_flexible_bool(value: &JsonValue) -> Result<Option<bool>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::Bool(b) => Ok(Some(*b)),
        JsonValue::String(s) => match s.to_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(Some(true)),
            "no" | "false" | "off" | "0" | "" => Ok(Some(false)),
            _ => Err(format!("invalid boolean string: {}", s)),
        },
        JsonValue::Number(n) => n
            .as_i64()
            .map(|i| Some(i != 0))
            .ok_or_else(|| "invalid boolean number".to_string()),
        other => Err(format!("invalid boolean value: {:?}", other)),
    }
}

fn deserialize_flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    parse_flexible_bool(&value)
        .map(|b| b.unwrap_or(false))
        .map_err(D::Error::custom)
}

fn deserialize_option_flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(v) => parse_flexible_bool(&v).map_err(D::Error::custom),
    }
}

fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::One(s)) => vec![s],
        Some(Raw::Many(v)) => v,
    })
}

/// Conditions that must all hold; a child's list is appended to its parent's.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct When(Vec<String>);

impl When {
    /// Create an empty condition list
    pub fn new() -> Self {
        Self::default()
    }

    /// The conditions in evaluation order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Whether there are no conditions
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parent conditions followed by this node's own, without duplicates.
    pub fn join(&self, parent: &When) -> When {
        let mut joined = parent.0.clone();
        for cond in &self.0 {
            if !joined.contains(cond) {
                joined.push(cond.clone());
            }
        }
        When(joined)
    }
}

impl<S: Into<String>> From<Vec<S>> for When {
    fn from(conds: Vec<S>) -> Self {
        When(Vec::new()).join(&When(conds.into_iter().map(Into::into).collect()))
    }
}

impl<'de> Deserialize<'de> for When {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        fn condition<E: serde::de::Error>(value: JsonValue) -> Result<String, E> {
            match value {
                JsonValue::String(s) => Ok(s),
                JsonValue::Bool(b) => Ok(b.to_string()),
                JsonValue::Number(n) => Ok(n.to_string()),
                other => Err(E::custom(format!("invalid when condition: {}", other))),
            }
        }

        let conds = match Option::<JsonValue>::deserialize(deserializer)? {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items
                .into_iter()
                .map(condition::<D::Error>)
                .collect::<Result<Vec<_>, D::Error>>()?,
            Some(other) => vec![condition::<D::Error>(other)?],
        };
        Ok(When::from(conds))
    }
}

/// One entry of a play's `serial` list
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SerialSize {
    /// Fixed number of hosts
    Count(usize),
    /// Percentage of the play's hosts, rounded up
    Percent(f64),
}

impl SerialSize {
    fn parse(value: &JsonValue) -> Result<Self, String> {
        match value {
            JsonValue::Number(n) => n
                .as_u64()
                .map(|n| SerialSize::Count(n as usize))
                .ok_or_else(|| format!("invalid serial size: {}", n)),
            JsonValue::String(s) => {
                let s = s.trim();
                match s.strip_suffix('%') {
                    Some(pct) => pct
                        .trim()
                        .parse::<f64>()
                        .map(SerialSize::Percent)
                        .map_err(|_| format!("invalid serial percentage: {}", s)),
                    None => s
                        .parse::<usize>()
                        .map(SerialSize::Count)
                        .map_err(|_| format!("invalid serial size: {}", s)),
                }
            }
            other => Err(format!("invalid serial size: {}", other)),
        }
    }
}

/// Batch sizes of a play; empty means a single batch with every host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Serial(pub Vec<SerialSize>);

impl Serial {
    /// Whether batching is disabled
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Serial {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sizes = match Option::<JsonValue>::deserialize(deserializer)? {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(SerialSize::parse)
                .collect::<Result<Vec<_>, _>>()
                .map_err(D::Error::custom)?,
            Some(other) => vec![SerialSize::parse(&other).map_err(D::Error::custom)?],
        };
        Ok(Serial(sizes))
    }
}

/// Modifiers shared by every block shape
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockCommon {
    pub name: String,
    pub tags: Tags,
    pub when: When,
    /// `None` inherits the parent's resolved value
    pub ignore_errors: Option<bool>,
    pub run_once: bool,
    pub vars: JsonMap,
}

/// Fields of a leaf block that become a task work order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskBlock {
    pub register: Option<String>,
    pub loop_spec: Option<JsonValue>,
    pub failed_when: When,
    pub retries: u32,
    /// Every key not recognized above, in document order. One of them names
    /// the module.
    pub unknown_fields: IndexMap<String, JsonValue>,
}

/// The shape of a block
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Task(TaskBlock),
    Composite {
        block: Vec<Block>,
        rescue: Vec<Block>,
        always: Vec<Block>,
    },
    /// Marker left where `include_tasks` appeared
    IncludeTasks(String),
}

/// Recursive control-flow unit
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub common: BlockCommon,
    pub kind: BlockKind,
}

impl Block {
    /// Create a leaf block calling `module` with `args`
    pub fn task(name: impl Into<String>, module: impl Into<String>, args: JsonValue) -> Self {
        let mut unknown_fields = IndexMap::new();
        unknown_fields.insert(module.into(), args);
        Self {
            common: BlockCommon {
                name: name.into(),
                ..Default::default()
            },
            kind: BlockKind::Task(TaskBlock {
                unknown_fields,
                ..Default::default()
            }),
        }
    }

    /// Whether the block is a leaf task
    pub fn is_task(&self) -> bool {
        matches!(self.kind, BlockKind::Task(_))
    }
}

const BLOCK_KEYS: &[&str] = &[
    "name",
    "tags",
    "when",
    "ignore_errors",
    "run_once",
    "vars",
    "block",
    "rescue",
    "always",
    "include_tasks",
    "register",
    "loop",
    "failed_when",
    "retries",
];

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut raw = IndexMap::<String, serde_yaml::Value>::deserialize(deserializer)?;

        fn take<T, E>(raw: &mut IndexMap<String, serde_yaml::Value>, key: &str) -> Result<Option<T>, E>
        where
            T: serde::de::DeserializeOwned,
            E: serde::de::Error,
        {
            match raw.shift_remove(key) {
                None => Ok(None),
                Some(v) => serde_yaml::from_value(v)
                    .map(Some)
                    .map_err(|e| E::custom(format!("field '{}': {}", key, e))),
            }
        }

        fn take_bool<E: serde::de::Error>(
            raw: &mut IndexMap<String, serde_yaml::Value>,
            key: &str,
        ) -> Result<Option<bool>, E> {
            match take::<JsonValue, E>(raw, key)? {
                None => Ok(None),
                Some(v) => parse_flexible_bool(&v).map_err(E::custom),
            }
        }

        let common = BlockCommon {
            name: take::<Option<String>, D::Error>(&mut raw, "name")?
                .flatten()
                .unwrap_or_default(),
            tags: take::<Tags, D::Error>(&mut raw, "tags")?.unwrap_or_default(),
            when: take::<When, D::Error>(&mut raw, "when")?.unwrap_or_default(),
            ignore_errors: take_bool::<D::Error>(&mut raw, "ignore_errors")?,
            run_once: take_bool::<D::Error>(&mut raw, "run_once")?.unwrap_or(false),
            vars: take::<Option<JsonMap>, D::Error>(&mut raw, "vars")?
                .flatten()
                .unwrap_or_default(),
        };

        if raw.contains_key("block") {
            let block = take::<Option<Vec<Block>>, D::Error>(&mut raw, "block")?
                .flatten()
                .unwrap_or_default();
            let rescue = take::<Option<Vec<Block>>, D::Error>(&mut raw, "rescue")?
                .flatten()
                .unwrap_or_default();
            let always = take::<Option<Vec<Block>>, D::Error>(&mut raw, "always")?
                .flatten()
                .unwrap_or_default();
            if let Some(extra) = raw.keys().find(|k| !BLOCK_KEYS.contains(&k.as_str())) {
                return Err(D::Error::custom(format!(
                    "block '{}' cannot also declare '{}'",
                    common.name, extra
                )));
            }
            return Ok(Block {
                common,
                kind: BlockKind::Composite {
                    block,
                    rescue,
                    always,
                },
            });
        }

        if let Some(file) = take::<String, D::Error>(&mut raw, "include_tasks")? {
            return Ok(Block {
                common,
                kind: BlockKind::IncludeTasks(file),
            });
        }

        for key in ["rescue", "always"] {
            if raw.contains_key(key) {
                return Err(D::Error::custom(format!("'{}' requires a 'block'", key)));
            }
        }

        let task = TaskBlock {
            register: take::<Option<String>, D::Error>(&mut raw, "register")?.flatten(),
            loop_spec: take::<JsonValue, D::Error>(&mut raw, "loop")?.filter(|v| !v.is_null()),
            failed_when: take::<When, D::Error>(&mut raw, "failed_when")?.unwrap_or_default(),
            retries: take::<Option<u32>, D::Error>(&mut raw, "retries")?
                .flatten()
                .unwrap_or(0),
            unknown_fields: raw
                .into_iter()
                .map(|(k, v)| {
                    serde_json::to_value(v)
                        .map(|v| (k.clone(), v))
                        .map_err(|e| D::Error::custom(format!("field '{}': {}", k, e)))
                })
                .collect::<Result<_, _>>()?,
        };

        Ok(Block {
            common,
            kind: BlockKind::Task(task),
        })
    }
}

/// A reusable collection of blocks with its own variables and dependencies.
///
/// In a play's `roles:` list a role is written either as its bare name or as
/// a mapping with a `role` key plus modifiers. Blocks, defaults and
/// dependencies are filled in by the project loader.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Role {
    #[serde(alias = "role")]
    pub name: String,
    pub vars: JsonMap,
    pub tags: Tags,
    pub when: When,
    #[serde(deserialize_with = "deserialize_option_flexible_bool")]
    pub ignore_errors: Option<bool>,
    #[serde(skip)]
    pub dependencies: Vec<Role>,
    #[serde(skip)]
    pub blocks: Vec<Block>,
}

impl Role {
    /// Create an empty role
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a role reference from a play's `roles:` list
    pub fn from_reference(value: JsonValue) -> Result<Self, serde_json::Error> {
        match value {
            JsonValue::String(name) => Ok(Role::new(name)),
            other => serde_json::from_value(other),
        }
    }
}

fn deserialize_roles<'de, D>(deserializer: D) -> Result<Vec<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<JsonValue>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .map(|v| Role::from_reference(v).map_err(D::Error::custom))
        .collect()
}

/// A host selection plus ordered phases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Play {
    pub name: String,
    #[serde(deserialize_with = "deserialize_string_or_list")]
    pub hosts: Vec<String>,
    #[serde(deserialize_with = "deserialize_flexible_bool")]
    pub gather_facts: bool,
    pub serial: Serial,
    #[serde(deserialize_with = "deserialize_flexible_bool")]
    pub run_once: bool,
    #[serde(deserialize_with = "deserialize_option_flexible_bool")]
    pub ignore_errors: Option<bool>,
    pub when: When,
    pub tags: Tags,
    pub vars: JsonMap,
    pub pre_tasks: Vec<Block>,
    #[serde(deserialize_with = "deserialize_roles")]
    pub roles: Vec<Role>,
    pub tasks: Vec<Block>,
    pub post_tasks: Vec<Block>,
    /// Another playbook whose plays replace this entry
    pub import_playbook: Option<String>,
}

/// Root automation unit: an ordered list of plays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playbook {
    pub name: String,
    pub plays: Vec<Play>,
}

impl Playbook {
    /// Parse the plays of a playbook document without resolving roles or
    /// includes.
    pub fn parse_plays(content: &str, path: impl Into<PathBuf>) -> ParseResult<Vec<Play>> {
        let path = path.into();
        let plays: Option<Vec<Play>> =
            serde_yaml::from_str(content).map_err(|source| ParseError::Yaml { path, source })?;
        Ok(plays.unwrap_or_default())
    }

    /// Every leaf task block of the playbook, in document order
    pub fn task_blocks(&self) -> Vec<&Block> {
        fn walk<'a>(blocks: &'a [Block], out: &mut Vec<&'a Block>) {
            for block in blocks {
                match &block.kind {
                    BlockKind::Task(_) => out.push(block),
                    BlockKind::Composite {
                        block,
                        rescue,
                        always,
                    } => {
                        walk(block, out);
                        walk(rescue, out);
                        walk(always, out);
                    }
                    BlockKind::IncludeTasks(_) => {}
                }
            }
        }
        fn walk_role<'a>(role: &'a Role, out: &mut Vec<&'a Block>) {
            for dep in &role.dependencies {
                walk_role(dep, out);
            }
            walk(&role.blocks, out);
        }

        let mut out = Vec::new();
        for play in &self.plays {
            walk(&play.pre_tasks, &mut out);
            for role in &play.roles {
                walk_role(role, &mut out);
            }
            walk(&play.tasks, &mut out);
            walk(&play.post_tasks, &mut out);
        }
        out
    }
}
