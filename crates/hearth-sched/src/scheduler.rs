use log::{debug, warn};
use thiserror::Error;

/// Error returned by a task action. Task failures are recorded on the task
/// and logged; they never abort the scheduler pass.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

pub type TaskAction<C> = Box<dyn FnMut(&mut C) -> Result<(), TaskError>>;

/// A named periodic task. Owned by the scheduler registry; counters and the
/// last-run stamp are mutated only by `run_once` and the enable/disable calls.
pub struct Task<C> {
    name: String,
    action: TaskAction<C>,
    period_ms: u64,
    enabled: bool,
    last_run_ms: Option<u64>,
    run_count: u64,
    error_count: u64,
}

impl<C> Task<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    fn due(&self, now_ms: u64) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_run_ms {
            // A freshly registered task is eligible on the next pass.
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.period_ms,
        }
    }
}

/// Snapshot of a task's counters, for housekeeping logs and introspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskStats {
    pub name: String,
    pub enabled: bool,
    pub period_ms: u64,
    pub run_count: u64,
    pub error_count: u64,
}

/// Cooperative scheduler over a fixed registry of named periodic tasks.
///
/// Tasks run strictly sequentially in registration order within a pass; a
/// long-running action delays every task after it. Actions must return
/// promptly — that is a caller obligation, not enforced here. Task names are
/// expected to be unique; registering a duplicate is a caller bug.
pub struct Scheduler<C> {
    tasks: Vec<Task<C>>,
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn add_task<F>(&mut self, name: &str, period_ms: u64, action: F)
    where
        F: FnMut(&mut C) -> Result<(), TaskError> + 'static,
    {
        debug!("scheduler: added task '{name}' ({period_ms}ms)");
        self.tasks.push(Task {
            name: name.to_owned(),
            action: Box::new(action),
            period_ms,
            enabled: true,
            last_run_ms: None,
            run_count: 0,
            error_count: 0,
        });
    }

    pub fn remove_task(&mut self, name: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.name != name);
        self.tasks.len() != before
    }

    pub fn enable_task(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_task(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    pub fn get_task(&self, name: &str) -> Option<&Task<C>> {
        self.tasks.iter().find(|task| task.name == name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run one pass: every enabled task whose period has elapsed is invoked,
    /// in registration order. `last_run` is stamped with the invocation time
    /// (not `last_run + period`), so a slow tick delays the next firing
    /// instead of causing catch-up bursts. A failing action is counted and
    /// logged and never prevents the remaining tasks from running.
    pub fn run_once(&mut self, ctx: &mut C, now_ms: u64) {
        for task in &mut self.tasks {
            if !task.due(now_ms) {
                continue;
            }
            task.last_run_ms = Some(now_ms);
            match (task.action)(ctx) {
                Ok(()) => task.run_count = task.run_count.saturating_add(1),
                Err(err) => {
                    task.error_count = task.error_count.saturating_add(1);
                    warn!("scheduler: task '{}' failed: {err}", task.name);
                }
            }
        }
    }

    pub fn stats(&self) -> Vec<TaskStats> {
        self.tasks
            .iter()
            .map(|task| TaskStats {
                name: task.name.clone(),
                enabled: task.enabled,
                period_ms: task.period_ms,
                run_count: task.run_count,
                error_count: task.error_count,
            })
            .collect()
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        for task in &mut self.tasks {
            if task.name == name {
                task.enabled = enabled;
                return true;
            }
        }
        false
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}
