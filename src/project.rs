//! Project loader.
//!
//! Turns a playbook file and the project tree around it into a fully
//! materialized [`Playbook`]:
//!
//! ```text
//! project/
//! ├── site.yaml                 playbook (may `import_playbook` others)
//! ├── files/                    files for modules outside roles
//! └── roles/
//!     └── <role>/
//!         ├── tasks/main.yaml   role blocks (`include_tasks` resolved here)
//!         ├── defaults/main.yaml
//!         ├── meta/main.yaml    `dependencies:` list of role references
//!         └── files/
//! ```
//!
//! The loaded project also serves as the [`FileSource`] handed to modules.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use crate::playbook::{Block, BlockKind, ParseError, ParseResult, Play, Playbook, Role};
use crate::vars::{combine_variables, JsonMap};

/// File-read capability offered to modules
#[async_trait]
pub trait FileSource: Send + Sync + std::fmt::Debug {
    /// Read a project file. Relative paths are looked up in the role's
    /// `files/` directory first, then in the project root.
    async fn read_file(&self, role: Option<&str>, path: &str) -> std::io::Result<Vec<u8>>;
}

/// A loaded playbook project
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    playbook: Playbook,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoleMeta {
    dependencies: Vec<JsonValue>,
}

impl Project {
    /// Load a playbook and everything it references.
    #[instrument(skip_all, fields(playbook = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> ParseResult<Self> {
        let path = path.as_ref();
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut loader = Loader {
            root: root.clone(),
            playbook_stack: Vec::new(),
        };
        let plays = loader.load_playbook(path)?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "playbook".to_string());

        debug!(plays = plays.len(), "project loaded");
        Ok(Self {
            root,
            playbook: Playbook { name, plays },
        })
    }

    /// Wrap an already built playbook; files resolve against `root`.
    pub fn from_playbook(root: impl Into<PathBuf>, playbook: Playbook) -> Self {
        Self {
            root: root.into(),
            playbook,
        }
    }

    /// The materialized playbook
    pub fn playbook(&self) -> &Playbook {
        &self.playbook
    }

    /// Directory the playbook lives in
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, role: Option<&str>, path: &str) -> Vec<PathBuf> {
        let p = Path::new(path);
        if p.is_absolute() {
            return vec![p.to_path_buf()];
        }
        let mut out = Vec::new();
        if let Some(role) = role {
            for dir in role_dirs(&self.root, role) {
                out.push(dir.join("files").join(p));
            }
        }
        out.push(self.root.join("files").join(p));
        out.push(self.root.join(p));
        out
    }
}

#[async_trait]
impl FileSource for Project {
    async fn read_file(&self, role: Option<&str>, path: &str) -> std::io::Result<Vec<u8>> {
        for candidate in self.candidates(role, path) {
            match tokio::fs::read(&candidate).await {
                Ok(data) => return Ok(data),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("file '{}' not found in project", path),
        ))
    }
}

/// Directories a role may live in: `<root>/roles/<name>`, then `<root>/../roles/<name>`
fn role_dirs(root: &Path, role: &str) -> Vec<PathBuf> {
    let mut dirs = vec![root.join("roles").join(role)];
    if let Some(parent) = root.parent() {
        dirs.push(parent.join("roles").join(role));
    }
    dirs
}

/// `main.yaml` or `main.yml` inside `dir`
fn main_file(dir: &Path) -> Option<PathBuf> {
    ["main.yaml", "main.yml"]
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
}

fn read_yaml<T: serde::de::DeserializeOwned + Default>(path: &Path) -> ParseResult<T> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Option<T> = serde_yaml::from_str(&content).map_err(|source| ParseError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(value.unwrap_or_default())
}

struct Loader {
    root: PathBuf,
    playbook_stack: Vec<PathBuf>,
}

impl Loader {
    fn load_playbook(&mut self, path: &Path) -> ParseResult<Vec<Play>> {
        if self.playbook_stack.iter().any(|p| p == path) {
            return Err(ParseError::Include(format!(
                "playbook '{}' imports itself",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

        self.playbook_stack.push(path.to_path_buf());
        let mut plays = Vec::new();
        for mut play in Playbook::parse_plays(&content, path)? {
            if let Some(import) = play.import_playbook.take() {
                plays.extend(self.load_playbook(&base.join(import))?);
                continue;
            }
            self.resolve_play(&mut play, &base)?;
            plays.push(play);
        }
        self.playbook_stack.pop();
        Ok(plays)
    }

    fn resolve_play(&self, play: &mut Play, base: &Path) -> ParseResult<()> {
        if play.hosts.is_empty() {
            return Err(ParseError::InvalidStructure(format!(
                "play '{}' has no hosts",
                play.name
            )));
        }
        for phase in [&mut play.pre_tasks, &mut play.tasks, &mut play.post_tasks] {
            *phase = expand_includes(std::mem::take(phase), base, &mut Vec::new())?;
        }
        let mut roles = Vec::with_capacity(play.roles.len());
        for role in std::mem::take(&mut play.roles) {
            roles.push(self.load_role(role, &mut Vec::new())?);
        }
        play.roles = roles;
        Ok(())
    }

    fn load_role(&self, mut role: Role, stack: &mut Vec<String>) -> ParseResult<Role> {
        if stack.contains(&role.name) {
            stack.push(role.name.clone());
            return Err(ParseError::RoleCycle(stack.join(" -> ")));
        }
        let dir = role_dirs(&self.root, &role.name)
            .into_iter()
            .find(|d| d.is_dir())
            .ok_or_else(|| ParseError::RoleNotFound {
                role: role.name.clone(),
                path: self.root.join("roles"),
            })?;

        let tasks_dir = dir.join("tasks");
        if let Some(main) = main_file(&tasks_dir) {
            let blocks: Vec<Block> = read_yaml(&main)?;
            role.blocks = expand_includes(blocks, &tasks_dir, &mut Vec::new())?;
        }

        if let Some(defaults) = main_file(&dir.join("defaults")) {
            let mut vars: JsonMap = read_yaml(&defaults)?;
            combine_variables(&mut vars, &role.vars);
            role.vars = vars;
        }

        stack.push(role.name.clone());
        if let Some(meta) = main_file(&dir.join("meta")) {
            let meta: RoleMeta = read_yaml(&meta)?;
            for dep in meta.dependencies {
                let dep = Role::from_reference(dep).map_err(|e| {
                    ParseError::InvalidStructure(format!(
                        "role '{}' has an invalid dependency: {}",
                        role.name, e
                    ))
                })?;
                role.dependencies.push(self.load_role(dep, stack)?);
            }
        }
        stack.pop();

        debug!(role = %role.name, blocks = role.blocks.len(), "role loaded");
        Ok(role)
    }
}

/// Resolve `include_tasks` markers. The included blocks are placed right
/// after their marker and inherit its tags, `when` and `ignore_errors`.
fn expand_includes(blocks: Vec<Block>, base: &Path, stack: &mut Vec<PathBuf>) -> ParseResult<Vec<Block>> {
    let mut out = Vec::with_capacity(blocks.len());
    for mut block in blocks {
        match &mut block.kind {
            BlockKind::Composite {
                block: inner,
                rescue,
                always,
            } => {
                *inner = expand_includes(std::mem::take(inner), base, stack)?;
                *rescue = expand_includes(std::mem::take(rescue), base, stack)?;
                *always = expand_includes(std::mem::take(always), base, stack)?;
                out.push(block);
            }
            BlockKind::IncludeTasks(file) => {
                let path = base.join(&*file);
                if stack.contains(&path) {
                    return Err(ParseError::Include(format!(
                        "'{}' includes itself",
                        path.display()
                    )));
                }
                let included: Vec<Block> = read_yaml(&path)?;
                stack.push(path.clone());
                let included = expand_includes(included, path.parent().unwrap_or(base), stack)?;
                stack.pop();

                let marker = block.common.clone();
                out.push(block);
                out.extend(included.into_iter().map(|mut child| {
                    child.common.tags = child.common.tags.join(&marker.tags);
                    child.common.when = child.common.when.join(&marker.when);
                    if child.common.ignore_errors.is_none() {
                        child.common.ignore_errors = marker.ignore_errors;
                    }
                    child
                }));
            }
            BlockKind::Task(_) => out.push(block),
        }
    }
    Ok(out)
}
