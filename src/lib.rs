//! # kubeplay - a playbook execution engine
//!
//! kubeplay runs playbooks against an inventory of hosts. A playbook is an
//! ordered list of plays; a play selects hosts and runs pre-tasks, roles,
//! tasks and post-tasks; roles and blocks nest further blocks down to single
//! tasks, each of which invokes a module on every selected host.
//!
//! ## Core Concepts
//!
//! - **Playbooks / Plays / Roles / Blocks**: the hierarchy in [`playbook`],
//!   loaded from disk by [`project`]
//! - **Work orders**: every task and every playbook run is persisted as an
//!   object in an [`store::ObjectStore`] and advanced through its status
//! - **Variables**: a per-host layered [`vars::VariableStore`]
//! - **Modules**: units of work such as `command`, `copy` or `set_fact`
//! - **Connectors**: transport to a host; `local` is built in
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CLI (clap)                            │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │   PlaybookExecutor → RoleExecutor → BlockExecutor → Task     │
//! └──────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌─────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │  Object store   │  │  Variable store  │  │ Module registry  │
//! │ (work orders)   │  │ (per-host vars)  │  │ (minijinja args) │
//! └─────────────────┘  └──────────────────┘  └──────────────────┘
//!                                                     │
//!                                                     ▼
//!                                            ┌──────────────────┐
//!                                            │    Connectors    │
//!                                            └──────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use kubeplay::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let project = Arc::new(Project::load("site.yml")?);
//!     let vars = VariableStore::new(Inventory::load("hosts.yaml")?, JsonMap::new());
//!     let ctx = ExecutorContext::new(Arc::new(MemoryStore::new()), vars, project.clone());
//!
//!     let report = PlaybookExecutor::new(ctx).exec(project.playbook()).await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::connection::{Connector, ConnectorFactory, DefaultConnectorFactory};
    pub use crate::error::{Error, ErrorContext, Result};
    pub use crate::executor::{
        ExecutorConfig, ExecutorContext, ExecutorError, PlaybookExecutor, PlaybookReport,
    };
    pub use crate::inventory::Inventory;
    pub use crate::modules::{Module, ModuleRegistry};
    pub use crate::output::ProgressLog;
    pub use crate::playbook::{Block, Play, Playbook, Role};
    pub use crate::project::Project;
    pub use crate::store::{MemoryStore, ObjectStore};
    pub use crate::tags::TagFilter;
    pub use crate::vars::{JsonMap, VariableStore};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Crate-level error type and the per-subsystem errors it wraps.
pub mod error;

/// Per-host variable store and template evaluation.
pub mod vars;

/// Tags and the run's tag filter.
pub mod tags;

/// Configuration files and environment overrides.
pub mod config;

// ============================================================================
// Playbook Components
// ============================================================================

/// Playbook, play, role and block model.
pub mod playbook;

/// Loading a playbook with its roles and included task files.
pub mod project;

/// Turning leaf blocks into task work orders; host batching.
pub mod converter;

// ============================================================================
// Infrastructure
// ============================================================================

/// Versioned object store for work orders.
pub mod store;

/// Task and playbook work order types.
pub mod resources;

/// Host inventory.
pub mod inventory;

/// Transport to hosts.
pub mod connection;

/// Host fact probing.
pub mod facts;

// ============================================================================
// Execution Engine
// ============================================================================

/// Playbook, role, block and task executors.
pub mod executor;

/// Built-in modules and the module registry.
pub mod modules;

/// Line-oriented progress output.
pub mod output;

pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
