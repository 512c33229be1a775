//! Compressed State — the in-memory task DAG rebuilt from the conversation
//! log on every request. An arena of `CompressedTask`s indexed by id; child
//! links are id lists grouped by `run_id`, never pointers, so rebuilding
//! from a log is trivial and safe.

use std::collections::HashMap;

use serde_json::Value;

use crate::log::{ConversationLog, LogEntry, Task};

/// One batch of children sharing a `run_id`, in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct ChildBatch {
    pub run_id: String,
    pub child_unique_ids: Vec<String>,
}

/// A task as seen by the current request, with its children and result
/// filled in from the log.
#[derive(Debug, Clone)]
pub struct CompressedTask {
    pub task: Task,
    /// Ordered batches of children, grouped by `run_id` in dispatch order.
    pub child_batches: Vec<ChildBatch>,
    pub result: Option<Value>,
    pub debug: Option<crate::log::TaskDebug>,
}

impl CompressedTask {
    fn new(task: Task) -> Self {
        Self {
            task,
            child_batches: Vec::new(),
            result: None,
            debug: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.result.is_some()
    }

    pub fn is_pending(&self) -> bool {
        !self.is_completed()
    }

    /// All child ids across every batch, in dispatch order.
    pub fn all_child_ids(&self) -> impl Iterator<Item = &str> {
        self.child_batches
            .iter()
            .flat_map(|b| b.child_unique_ids.iter().map(String::as_str))
    }

    fn append_child(&mut self, run_id: &str, child_id: &str) {
        if let Some(batch) = self.child_batches.iter_mut().find(|b| b.run_id == run_id) {
            batch.child_unique_ids.push(child_id.to_string());
        } else {
            self.child_batches.push(ChildBatch {
                run_id: run_id.to_string(),
                child_unique_ids: vec![child_id.to_string()],
            });
        }
    }
}

/// The rebuilt DAG plus the index at which this request's new entries
/// begin — `log[log_start_index..]` is exactly the diff this request owns.
pub struct Compressed {
    tasks: HashMap<String, CompressedTask>,
    pub log_start_index: usize,
}

impl Compressed {
    /// Walk the log in order, rebuilding the arena. Malformed entries
    /// (results for unknown tasks) are skipped defensively — the rebuilder
    /// never fails.
    pub fn rebuild(log: &ConversationLog) -> Self {
        let mut tasks: HashMap<String, CompressedTask> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for entry in log {
            match entry {
                LogEntry::Task(t) => {
                    order.push(t.unique_id.clone());
                    tasks.insert(t.unique_id.clone(), CompressedTask::new(t.clone()));
                }
                LogEntry::TaskResult(r) => {
                    if let Some(ct) = tasks.get_mut(&r.task_unique_id) {
                        ct.result = Some(r.result.clone());
                    }
                }
                LogEntry::TaskDebug(d) => {
                    if let Some(ct) = tasks.get_mut(&d.task_unique_id) {
                        ct.debug = Some(d.clone());
                    }
                }
            }
        }

        // Second pass: link children to parents, preserving dispatch order.
        for id in &order {
            let (parent_id, run_id) = {
                let t = &tasks[id].task;
                (t.parent_unique_id.clone(), t.run_id.clone())
            };
            if let Some(parent_id) = parent_id {
                if let Some(parent) = tasks.get_mut(&parent_id) {
                    parent.append_child(&run_id, id);
                }
            }
        }

        Self {
            tasks,
            log_start_index: log.len(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&CompressedTask> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CompressedTask> {
        self.tasks.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn insert(&mut self, task: Task) {
        let id = task.unique_id.clone();
        let parent_id = task.parent_unique_id.clone();
        let run_id = task.run_id.clone();
        self.tasks.insert(id.clone(), CompressedTask::new(task));
        if let Some(parent_id) = parent_id {
            if let Some(parent) = self.tasks.get_mut(&parent_id) {
                parent.append_child(&run_id, &id);
            }
        }
    }

    pub fn set_result(&mut self, id: &str, result: Value) {
        if let Some(ct) = self.tasks.get_mut(id) {
            ct.result = Some(result);
        }
    }

    /// Pending leaves reachable from `root_id`: pending tasks whose children
    /// are either absent or all completed, with any pending task that is
    /// itself a parent of another still-pending task removed (a task whose
    /// subtree still has unresolved work below it is not yet a leaf).
    pub fn pending_leaves(&self, root_id: &str) -> Vec<String> {
        let mut subtree: Vec<String> = Vec::new();
        self.collect_subtree(root_id, &mut subtree);

        let mut pending: HashMap<String, ()> = subtree
            .iter()
            .filter(|id| self.tasks.get(*id).map(|t| t.is_pending()).unwrap_or(false))
            .map(|id| (id.clone(), ()))
            .collect();

        // Remove any pending task that is itself a parent of a still-pending
        // child — it is not a leaf yet.
        let parents_of_pending: Vec<String> = subtree
            .iter()
            .filter_map(|id| {
                let ct = self.tasks.get(id)?;
                ct.task.parent_unique_id.clone()
            })
            .filter(|pid| pending.contains_key(pid))
            .collect();
        for pid in parents_of_pending {
            pending.remove(&pid);
        }

        // Preserve dispatch order.
        subtree
            .into_iter()
            .filter(|id| pending.contains_key(id))
            .collect()
    }

    fn collect_subtree(&self, id: &str, out: &mut Vec<String>) {
        out.push(id.to_string());
        if let Some(ct) = self.tasks.get(id) {
            for child in ct.all_child_ids() {
                self.collect_subtree(child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogEntry;
    use chrono::Utc;

    fn task_entry(id: &str, parent: Option<&str>, run_id: &str) -> LogEntry {
        LogEntry::Task(Task {
            unique_id: id.into(),
            parent_unique_id: parent.map(String::from),
            previous_unique_id: None,
            run_id: run_id.into(),
            agent: "DefaultAgent".into(),
            args: serde_json::json!({}),
            created_at: Utc::now(),
        })
    }

    fn result_entry(id: &str, result: Value) -> LogEntry {
        LogEntry::TaskResult(crate::log::TaskResult {
            task_unique_id: id.into(),
            result,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn rebuild_groups_children_by_run_id() {
        let log = vec![
            task_entry("root", None, "run-0"),
            task_entry("c1", Some("root"), "run-1"),
            task_entry("c2", Some("root"), "run-1"),
        ];
        let compressed = Compressed::rebuild(&log);
        let root = compressed.get("root").unwrap();
        assert_eq!(root.child_batches.len(), 1);
        assert_eq!(
            root.child_batches[0].child_unique_ids,
            vec!["c1".to_string(), "c2".to_string()]
        );
    }

    #[test]
    fn pending_leaves_excludes_tasks_with_pending_children() {
        let log = vec![
            task_entry("root", None, "run-0"),
            task_entry("c1", Some("root"), "run-1"),
            task_entry("c2", Some("root"), "run-1"),
        ];
        let compressed = Compressed::rebuild(&log);
        let leaves = compressed.pending_leaves("root");
        // root has pending children, so it is not itself a leaf.
        assert_eq!(leaves, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn pending_leaves_empty_once_all_children_complete() {
        let log = vec![
            task_entry("root", None, "run-0"),
            task_entry("c1", Some("root"), "run-1"),
            result_entry("c1", Value::String("done".into())),
        ];
        let compressed = Compressed::rebuild(&log);
        // root itself is now a leaf: it has one child and that child is done.
        let leaves = compressed.pending_leaves("root");
        assert_eq!(leaves, vec!["root".to_string()]);
    }

    #[test]
    fn result_for_unknown_task_is_ignored_defensively() {
        let log = vec![result_entry("ghost", Value::String("x".into()))];
        let compressed = Compressed::rebuild(&log);
        assert!(!compressed.contains("ghost"));
    }
}
