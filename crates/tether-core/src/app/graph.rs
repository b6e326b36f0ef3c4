//! Prerequisite graph and cycle detection.
//!
//! Edges point from a task to the tasks it waits for. The persisted tasks are the source of truth; a graph is built on demand
//! from the non-terminal part of the store to vet new prerequisite edges.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::domain::TaskId;
use crate::error::SchedulerError;
use crate::repo::TaskRepo;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<TaskId, HashSet<TaskId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `task` depends on `depends_on` ("B waits for A" is `add_dependency(b, a)`).
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
    }

    /// Tasks `task` depends on, in id order.
    pub fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        Self::sorted(self.edges.get(&task))
    }

    fn sorted(set: Option<&HashSet<TaskId>>) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = set.map(|s| s.iter().copied().collect()).unwrap_or_default();
        ids.sort();
        ids
    }

    /// The first cycle found, as a path that starts and ends on the same task.
    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut color = HashMap::new();
        let mut starts: Vec<TaskId> = self.edges.keys().copied().collect();
        starts.sort();
        for start in starts {
            if color.contains_key(&start) {
                continue;
            }
            if let Some(cycle) = self.cycle_from(start, &mut color) {
                return Some(cycle);
            }
        }
        None
    }

    /// Iterative three-colour DFS from `start`.
    fn cycle_from(&self, start: TaskId, color: &mut HashMap<TaskId, Color>) -> Option<Vec<TaskId>> {
        let mut path = vec![start];
        let mut pending = vec![self.get_dependencies(start)];
        color.insert(start, Color::Gray);

        while let Some(frontier) = pending.last_mut() {
            match frontier.pop() {
                Some(dep) => match color.get(&dep) {
                    Some(Color::Gray) => {
                        let from = path.iter().position(|n| *n == dep).unwrap_or(0);
                        let mut cycle = path[from..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Some(Color::Black) => {}
                    None => {
                        color.insert(dep, Color::Gray);
                        path.push(dep);
                        pending.push(self.get_dependencies(dep));
                    }
                },
                None => {
                    pending.pop();
                    if let Some(done) = path.pop() {
                        color.insert(done, Color::Black);
                    }
                }
            }
        }
        None
    }
}

/// Reject `prerequisites` for `task_id` if one does not exist, or if the new
/// edges would close a cycle among non-terminal tasks.
pub async fn check_prerequisites(
    tasks: &TaskRepo,
    task_id: TaskId,
    prerequisites: &BTreeSet<TaskId>,
) -> Result<(), SchedulerError> {
    let mut graph = DependencyGraph::new();
    let mut queue = VecDeque::new();
    let mut seen = HashSet::from([task_id]);

    for &prerequisite in prerequisites {
        if prerequisite != task_id && tasks.get(prerequisite).await?.is_none() {
            return Err(SchedulerError::InvalidTask(format!(
                "prerequisite {prerequisite} does not exist"
            )));
        }
        graph.add_dependency(task_id, prerequisite);
        if seen.insert(prerequisite) {
            queue.push_back(prerequisite);
        }
    }

    while let Some(current) = queue.pop_front() {
        let Some(task) = tasks.get(current).await? else {
            continue;
        };
        if task.is_terminal() {
            continue;
        }
        for &next in &task.prerequisite_task_ids {
            graph.add_dependency(current, next);
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    match graph.detect_cycle() {
        Some(cycle) => Err(SchedulerError::PrerequisiteCycle(cycle)),
        None => Ok(()),
    }
}
