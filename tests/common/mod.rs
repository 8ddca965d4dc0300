//! Shared test utilities for the kubeplay test suite.
//!
//! This module provides:
//! - A mock connector factory that records commands and files per host
//! - A scripted `probe` module driven by its arguments
//! - A store wrapper that injects status patch conflicts
//! - A harness wiring an executor context to an in-memory store and a
//!   captured progress log
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use kubeplay::connection::{
    CommandOutput, ConnectionError, ConnectionResult, Connector, ConnectorFactory,
};
use kubeplay::executor::{ExecutorConfig, ExecutorContext};
use kubeplay::inventory::Inventory;
use kubeplay::modules::{ExecOptions, Module, ModuleError, ModuleOutput, ModuleRegistry, ModuleResult};
use kubeplay::output::{ProgressLog, SharedBuffer};
use kubeplay::playbook::{Block, BlockKind, Play, Playbook};
use kubeplay::project::Project;
use kubeplay::resources::{Task, TaskSpec, TaskStatus};
use kubeplay::store::{self, MemoryStore, ObjectKey, ObjectStore, RawObject, StoreError, StoreResult};
use kubeplay::tags::TagFilter;
use kubeplay::vars::{JsonMap, VariableStore};

// ============================================================================
// Mock Connector
// ============================================================================

/// Everything the mock connectors saw, keyed by host
#[derive(Debug, Default)]
pub struct ConnectorLog {
    pub commands: Mutex<Vec<(String, String)>>,
    pub files: Mutex<HashMap<(String, String), (Vec<u8>, u32)>>,
    pub fail_commands: Mutex<Vec<String>>,
}

/// Connector factory handing out in-memory connectors
#[derive(Debug, Clone, Default)]
pub struct MockConnectorFactory {
    pub log: Arc<ConnectorLog>,
}

impl MockConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `needle` exit with code 1
    pub fn fail_on(&self, needle: &str) {
        self.log.fail_commands.lock().push(needle.to_string());
    }

    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.log
            .commands
            .lock()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn file(&self, host: &str, path: &str) -> Option<(Vec<u8>, u32)> {
        self.log
            .files
            .lock()
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }
}

impl ConnectorFactory for MockConnectorFactory {
    fn connector(&self, host: &str, _vars: &JsonMap) -> ConnectionResult<Arc<dyn Connector>> {
        Ok(Arc::new(MockConnector {
            host: host.to_string(),
            log: Arc::clone(&self.log),
        }))
    }
}

pub struct MockConnector {
    host: String,
    log: Arc<ConnectorLog>,
}

#[async_trait]
impl Connector for MockConnector {
    fn host(&self) -> &str {
        &self.host
    }

    async fn init(&self) -> ConnectionResult<()> {
        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }

    async fn execute_command(&self, cmd: &str) -> ConnectionResult<CommandOutput> {
        self.log
            .commands
            .lock()
            .push((self.host.clone(), cmd.to_string()));
        let fails = self
            .log
            .fail_commands
            .lock()
            .iter()
            .any(|needle| cmd.contains(needle.as_str()));
        if fails {
            return Err(ConnectionError::CommandFailed {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("{}: failed", cmd),
            });
        }
        Ok(CommandOutput::success(format!("{}@{}\n", cmd, self.host), ""))
    }

    async fn put_file(&self, content: &[u8], dst: &str, mode: u32) -> ConnectionResult<()> {
        self.log
            .files
            .lock()
            .insert((self.host.clone(), dst.to_string()), (content.to_vec(), mode));
        Ok(())
    }

    async fn fetch_file(&self, src: &str) -> ConnectionResult<Vec<u8>> {
        self.log
            .files
            .lock()
            .get(&(self.host.clone(), src.to_string()))
            .map(|(content, _)| content.clone())
            .ok_or_else(|| ConnectionError::TransferFailed(format!("{} not found", src)))
    }
}

// ============================================================================
// Scripted Module
// ============================================================================

/// One recorded invocation of the probe module
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCall {
    pub host: String,
    pub task: String,
    pub args: JsonValue,
}

/// Module named `probe` that records its calls.
///
/// Arguments:
/// - `stdout`: text to report (default `ok`)
/// - `fail`: fail when truthy
/// - `sleep_ms`: wait before answering
#[derive(Debug, Clone, Default)]
pub struct ProbeModule {
    pub calls: Arc<Mutex<Vec<ProbeCall>>>,
}

impl ProbeModule {
    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().clone()
    }

    pub fn hosts_for(&self, task: &str) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .calls()
            .into_iter()
            .filter(|c| c.task == task)
            .map(|c| c.host)
            .collect();
        hosts.sort();
        hosts
    }
}

#[async_trait]
impl Module for ProbeModule {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        self.calls.lock().push(ProbeCall {
            host: opts.host.clone(),
            task: opts.task_name.clone(),
            args: opts.args.clone(),
        });
        if let Some(ms) = opts.args.get("sleep_ms").and_then(JsonValue::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let fail = matches!(opts.args.get("fail"), Some(JsonValue::Bool(true)))
            || opts.args.get("fail").and_then(JsonValue::as_str) == Some("true");
        if fail {
            return Err(ModuleError::Failed(format!("probe failed on {}", opts.host)));
        }
        let stdout = opts
            .args
            .get("stdout")
            .and_then(JsonValue::as_str)
            .unwrap_or("ok");
        Ok(ModuleOutput::stdout(stdout))
    }
}

// ============================================================================
// Conflict-injecting Store
// ============================================================================

/// Memory store whose next `conflicts` status patches fail with a conflict
#[derive(Debug, Default)]
pub struct ConflictStore {
    pub inner: MemoryStore,
    pub conflicts: AtomicU32,
    pub injected: AtomicU32,
}

impl ConflictStore {
    pub fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            conflicts: AtomicU32::new(conflicts),
            injected: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore for ConflictStore {
    async fn create(&self, obj: RawObject) -> StoreResult<RawObject> {
        self.inner.create(obj).await
    }

    async fn get(&self, key: &ObjectKey) -> StoreResult<RawObject> {
        self.inner.get(key).await
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        base_version: u64,
        patch: &JsonValue,
    ) -> StoreResult<RawObject> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: base_version,
                actual: base_version + 1,
            });
        }
        self.inner.patch_status(key, base_version, patch).await
    }

    async fn list(&self, kind: &str, namespace: &str) -> StoreResult<Vec<RawObject>> {
        self.inner.list(kind, namespace).await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// An executor context with observable collaborators
pub struct Harness {
    pub ctx: ExecutorContext,
    pub store: Arc<dyn ObjectStore>,
    pub vars: VariableStore,
    pub probe: ProbeModule,
    pub connectors: MockConnectorFactory,
    pub output: SharedBuffer,
}

impl Harness {
    /// Hosts `names` in one inventory, all in group `nodes`
    pub fn new(names: &[&str]) -> Self {
        Self::with_store(names, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(names: &[&str], store: Arc<dyn ObjectStore>) -> Self {
        let vars = VariableStore::new(inventory(names), JsonMap::new());
        let probe = ProbeModule::default();
        let mut registry = ModuleRegistry::with_builtins();
        registry.register(Arc::new(probe.clone()));
        let connectors = MockConnectorFactory::new();
        let output = SharedBuffer::new();
        let project = Arc::new(Project::from_playbook(".", Playbook::default()));

        let mut ctx = ExecutorContext::new(Arc::clone(&store), vars.clone(), project)
            .with_modules(registry)
            .with_connectors(Arc::new(connectors.clone()))
            .with_log(ProgressLog::new(output.clone(), false));
        ctx.playbook = ObjectKey {
            kind: "Playbook".to_string(),
            namespace: "default".to_string(),
            name: "test".to_string(),
        };

        Self {
            ctx,
            store,
            vars,
            probe,
            connectors,
            output,
        }
    }

    pub fn with_tags(mut self, tags: &[&str], skip: &[&str]) -> Self {
        self.ctx = self.ctx.with_tag_filter(
            TagFilter::new()
                .with_tags(tags.iter().map(|t| t.to_string()).collect())
                .with_skip_tags(skip.iter().map(|t| t.to_string()).collect()),
        );
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.ctx = self.ctx.with_config(config);
        self
    }

    /// Every task work order created so far, oldest first
    pub async fn tasks(&self) -> Vec<Task> {
        store::list::<TaskSpec, TaskStatus>(self.store.as_ref(), "default")
            .await
            .unwrap()
    }

    pub fn log(&self) -> String {
        self.output.contents()
    }
}

/// Inventory with `names` as hosts and a `nodes` group holding all of them
pub fn inventory(names: &[&str]) -> Inventory {
    let mut inventory = Inventory::new();
    for name in names {
        inventory.add_host(*name, JsonMap::new());
    }
    inventory.add_group(
        "nodes",
        kubeplay::inventory::Group {
            hosts: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        },
    );
    inventory
}

pub fn hosts(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

// ============================================================================
// Block Builders
// ============================================================================

/// Leaf running the probe module
pub fn probe(name: &str, args: JsonValue) -> Block {
    Block::task(name, "probe", args)
}

/// Mutable access to the task fields of a leaf
pub fn task_fields(block: &mut Block) -> &mut kubeplay::playbook::TaskBlock {
    match &mut block.kind {
        BlockKind::Task(task) => task,
        _ => panic!("not a task block"),
    }
}

/// Composite block with block/rescue/always lists
pub fn composite(name: &str, body: Vec<Block>, rescue: Vec<Block>, always: Vec<Block>) -> Block {
    let mut block = Block::task(name, "probe", JsonValue::Null);
    block.kind = BlockKind::Composite {
        block: body,
        rescue,
        always,
    };
    block
}

/// One play on group `nodes` running `tasks`
pub fn play(tasks: Vec<Block>) -> Play {
    Play {
        name: "test play".to_string(),
        hosts: vec!["nodes".to_string()],
        tasks,
        ..Default::default()
    }
}

pub fn playbook(plays: Vec<Play>) -> Playbook {
    Playbook {
        name: "test".to_string(),
        plays,
    }
}
