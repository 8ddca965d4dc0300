//! Conversion from the hierarchy model to work orders.
//!
//! A leaf [`Block`] becomes a [`Task`] once the enclosing layers have resolved
//! its hosts and inherited modifiers. Play hosts are split into batches here
//! as well.

use std::collections::BTreeMap;

use crate::executor::{ExecutorContext, ExecutorError, ExecutorResult};
use crate::modules::ModuleRegistry;
use crate::playbook::{Block, BlockKind, Serial, SerialSize, When};
use crate::resources::{ModuleRef, PlaybookSpec, Task, TaskSpec, TaskStatus, ROLE_ANNOTATION};
use crate::store::{ObjectMeta, OwnerReference, Resource};

/// Build the task work order for a leaf block.
///
/// `when` is the full inherited condition list, `ignore_errors` the resolved
/// value. The module is the first of the block's free-form keys that the
/// registry knows, in document order.
pub fn block_to_task(
    ctx: &ExecutorContext,
    role: Option<&str>,
    hosts: &[String],
    when: &When,
    ignore_errors: bool,
    block: &Block,
) -> ExecutorResult<Task> {
    let task = match &block.kind {
        BlockKind::Task(task) => task,
        _ => return Err(ExecutorError::NoModule(block.common.name.clone())),
    };

    let (module, args) = find_module(&ctx.modules, task.unknown_fields.iter())
        .ok_or_else(|| ExecutorError::NoModule(block.common.name.clone()))?;

    let name = if block.common.name.is_empty() {
        module.clone()
    } else {
        block.common.name.clone()
    };

    let mut annotations = BTreeMap::new();
    if let Some(role) = role {
        annotations.insert(ROLE_ANNOTATION.to_string(), role.to_string());
    }

    Ok(Task {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", ctx.playbook_name())),
            namespace: ctx.config.namespace.clone(),
            annotations,
            owner: Some(OwnerReference {
                kind: PlaybookSpec::KIND.to_string(),
                name: ctx.playbook_name().to_string(),
            }),
            ..Default::default()
        },
        spec: TaskSpec {
            name,
            hosts: hosts.to_vec(),
            module: ModuleRef {
                name: module,
                args,
            },
            loop_spec: task.loop_spec.clone(),
            when: when.as_slice().to_vec(),
            failed_when: task.failed_when.as_slice().to_vec(),
            register: task.register.clone(),
            ignore_errors,
            retries: task.retries,
        },
        status: TaskStatus::default(),
    })
}

fn find_module<'a>(
    registry: &ModuleRegistry,
    mut fields: impl Iterator<Item = (&'a String, &'a serde_json::Value)>,
) -> Option<(String, serde_json::Value)> {
    fields
        .find(|(key, _)| registry.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
}

/// Name of the module a leaf block would run, if any
pub fn module_name<'a>(registry: &ModuleRegistry, block: &'a Block) -> Option<&'a str> {
    match &block.kind {
        BlockKind::Task(task) => task
            .unknown_fields
            .keys()
            .find(|key| registry.contains(key))
            .map(String::as_str),
        _ => None,
    }
}

/// Split hosts into batches following a `serial` list.
///
/// The size list is cycled until every host is assigned; a batch that would
/// run past the end takes the remaining hosts. Percentages are rounded up
/// and never yield an empty batch. An empty list gives a single batch.
pub fn group_hosts_by_serial(hosts: &[String], serial: &Serial) -> ExecutorResult<Vec<Vec<String>>> {
    if hosts.is_empty() {
        return Ok(Vec::new());
    }
    if serial.is_empty() {
        return Ok(vec![hosts.to_vec()]);
    }

    let sizes = serial
        .0
        .iter()
        .map(|size| match *size {
            SerialSize::Count(0) => Err(ExecutorError::InvalidSerial(
                "batch size must be greater than zero".to_string(),
            )),
            SerialSize::Count(n) => Ok(n),
            SerialSize::Percent(p) if p.is_nan() || p <= 0.0 => Err(ExecutorError::InvalidSerial(format!(
                "percentage must be greater than zero, got {}%",
                p
            ))),
            SerialSize::Percent(p) => {
                Ok(((hosts.len() as f64 * p / 100.0).ceil() as usize).max(1))
            }
        })
        .collect::<ExecutorResult<Vec<usize>>>()?;

    let mut batches = Vec::new();
    let mut start = 0;
    for size in sizes.iter().cycle() {
        if start >= hosts.len() {
            break;
        }
        let end = (start + size).min(hosts.len());
        batches.push(hosts[start..end].to_vec());
        start = end;
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use crate::project::Project;
    use crate::store::MemoryStore;
    use crate::vars::{JsonMap, VariableStore};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("h{}", i)).collect()
    }

    fn ctx() -> ExecutorContext {
        let mut ctx = ExecutorContext::new(
            Arc::new(MemoryStore::new()),
            VariableStore::new(Inventory::new(), JsonMap::new()),
            Arc::new(Project::from_playbook(".", Default::default())),
        );
        ctx.playbook.name = "site".to_string();
        ctx
    }

    #[test]
    fn test_serial_cycles_whole_list() {
        let serial = Serial(vec![SerialSize::Count(2), SerialSize::Count(1)]);
        let batches = group_hosts_by_serial(&hosts(5), &serial).unwrap();
        assert_eq!(
            batches,
            vec![
                vec!["h1".to_string(), "h2".to_string()],
                vec!["h3".to_string()],
                vec!["h4".to_string(), "h5".to_string()],
            ]
        );
    }

    #[test]
    fn test_serial_percent_rounds_up() {
        let serial = Serial(vec![SerialSize::Percent(30.0)]);
        let batches = group_hosts_by_serial(&hosts(5), &serial).unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_serial_empty_is_one_batch() {
        let batches = group_hosts_by_serial(&hosts(3), &Serial::default()).unwrap();
        assert_eq!(batches, vec![hosts(3)]);
    }

    #[test]
    fn test_serial_zero_rejected() {
        let serial = Serial(vec![SerialSize::Count(0)]);
        assert!(matches!(
            group_hosts_by_serial(&hosts(3), &serial),
            Err(ExecutorError::InvalidSerial(_))
        ));
    }

    #[test]
    fn test_block_to_task_picks_first_known_module() {
        let mut block = Block::task("install", "not_a_module", json!("x"));
        if let BlockKind::Task(task) = &mut block.kind {
            task.unknown_fields.insert("command".into(), json!("echo hi"));
            task.unknown_fields.insert("debug".into(), json!({"msg": "x"}));
            task.retries = 2;
        }
        let when = When::from(vec!["a".to_string()]);
        let task = block_to_task(&ctx(), Some("etcd"), &hosts(2), &when, true, &block).unwrap();

        assert_eq!(task.spec.module.name, "command");
        assert_eq!(task.spec.module.args, json!("echo hi"));
        assert_eq!(task.spec.when, vec!["a".to_string()]);
        assert!(task.spec.ignore_errors);
        assert_eq!(task.spec.retries, 2);
        assert_eq!(task.role(), Some("etcd"));
        assert_eq!(task.metadata.generate_name.as_deref(), Some("site-"));
        assert_eq!(task.metadata.owner.as_ref().unwrap().name, "site");
    }

    #[test]
    fn test_block_to_task_defaults_name_to_module() {
        let block = Block::task("", "debug", json!({"msg": "hi"}));
        let task = block_to_task(&ctx(), None, &hosts(1), &When::new(), false, &block).unwrap();
        assert_eq!(task.spec.name, "debug");
        assert!(task.role().is_none());
    }

    #[test]
    fn test_block_without_module_is_rejected() {
        let block = Block::task("broken", "no_such_module", json!({}));
        let err = block_to_task(&ctx(), None, &hosts(1), &When::new(), false, &block).unwrap_err();
        assert!(matches!(err, ExecutorError::NoModule(name) if name == "broken"));
    }

    proptest! {
        #[test]
        fn prop_serial_partitions_hosts(
            n in 1usize..40,
            sizes in proptest::collection::vec(1usize..6, 1..4),
        ) {
            let all = hosts(n);
            let serial = Serial(sizes.iter().map(|s| SerialSize::Count(*s)).collect());
            let batches = group_hosts_by_serial(&all, &serial).unwrap();
            prop_assert!(batches.iter().all(|b| !b.is_empty()));
            let flat: Vec<String> = batches.into_iter().flatten().collect();
            prop_assert_eq!(flat, all);
        }
    }
}
