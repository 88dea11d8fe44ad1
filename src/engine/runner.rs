mod diagnostics;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::ResolvedConfig;
use crate::core::{CancelToken, TaskValue};
use crate::engine::{Inputs, TaskContext, TaskGraph};
use crate::error::RunError;
use crate::utils::{RUN_STYLE, TASK_STYLE};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Knobs for a single [`Runner`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of tasks executing at the same time.
    pub jobs: usize,
    /// Checked before every task is started.
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            cancel: CancelToken::new(),
        }
    }
}

impl RunOptions {
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Everything a successful run produced.
#[derive(Debug)]
pub struct RunOutput {
    /// Name of the requested task.
    pub target: String,
    /// The requested task's own result.
    pub value: TaskValue,
    /// Results of every task executed in this run, the target included.
    pub values: BTreeMap<String, TaskValue>,
    pub diagnostics: Diagnostics,
}

impl RunOutput {
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

/// Lifecycle of a single task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// What a worker reports back to the scheduler.
enum Outcome {
    Completed(TaskValue),
    Failed(anyhow::Error),
    Skipped,
}

/// Executes the part of a [`TaskGraph`] a target needs.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    options: RunOptions,
}

impl Runner {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs `target` along with all of its transitive dependencies.
    ///
    /// The calling thread acts as the scheduler while a pool of `jobs`
    /// workers executes the tasks:
    /// 1. Every task of the subgraph starts with a count of its unfinished
    ///    dependencies; those at zero are ready.
    /// 2. Ready tasks are handed to the workers, lowest registration index
    ///    first, as long as fewer than `jobs` are in flight.
    /// 3. The scheduler waits for a result. A completed task decrements the
    ///    counts of its dependents, making some of them ready.
    /// 4. After the first failure, or once cancelled, nothing new is handed
    ///    out and the scheduler only waits for the tasks still in flight.
    pub fn run(
        &self,
        graph: &TaskGraph,
        target: &str,
        config: &ResolvedConfig,
    ) -> Result<RunOutput, RunError> {
        let order = graph.subgraph(target)?;
        let jobs = self.options.jobs.max(1);
        let cancel = &self.options.cancel;

        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut dependency_counts: HashMap<NodeIndex, usize> = HashMap::new();
        for &index in &order {
            let dependencies = graph.dependencies_of(index);
            dependency_counts.insert(index, dependencies.len());
            for dependency in dependencies {
                dependents.entry(dependency).or_default().push(index);
            }
        }

        let states: HashMap<NodeIndex, Mutex<TaskState>> = order
            .iter()
            .map(|&index| (index, Mutex::new(TaskState::NotStarted)))
            .collect();
        let halted = AtomicBool::new(false);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("kiln-worker-{i}"))
            .build()?;

        let root_span = tracing::span!(Level::INFO, "run", task = target);
        root_span.pb_set_length(order.len() as u64);
        root_span.pb_set_style(&RUN_STYLE);
        root_span.pb_set_message(&format!("Running {target}..."));
        let _enter = root_span.enter();

        tracing::info!("Running {} task(s) for '{}' on {} worker(s)", order.len(), target, jobs);

        let mut values: HashMap<NodeIndex, TaskValue> = HashMap::new();
        let mut execution_times = BTreeMap::new();

        let failure = pool.in_place_scope(|s| {
            let (sender, receiver) = channel::<(NodeIndex, Outcome, TaskExecution)>();

            let mut ready: BTreeSet<NodeIndex> = order
                .iter()
                .copied()
                .filter(|index| dependency_counts[index] == 0)
                .collect();
            let mut in_flight = 0usize;
            let mut failure: Option<(NodeIndex, anyhow::Error)> = None;

            loop {
                while failure.is_none() && !cancel.is_cancelled() && in_flight < jobs {
                    let Some(index) = ready.pop_first() else {
                        break;
                    };

                    let task = &graph.graph[index];
                    let inputs = Inputs::new(graph.dependencies_of(index).into_iter().filter_map(
                        |dependency| {
                            values
                                .get(&dependency)
                                .map(|value| (graph.graph[dependency].name().to_string(), value.clone()))
                        },
                    ));

                    let sender = sender.clone();
                    let state = &states[&index];
                    let halted = &halted;

                    in_flight += 1;
                    s.spawn(move |_| {
                        let start = Instant::now();

                        {
                            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

                            if *state != TaskState::NotStarted || halted.load(Ordering::SeqCst) {
                                if *state == TaskState::NotStarted {
                                    *state = TaskState::Skipped;
                                }
                                let _ = sender.send((
                                    index,
                                    Outcome::Skipped,
                                    TaskExecution { start, duration: Duration::ZERO },
                                ));
                                return;
                            }

                            *state = TaskState::InProgress;
                        }

                        let span = tracing::span!(Level::INFO, "task", task = task.name());
                        span.pb_set_style(&TASK_STYLE);
                        span.pb_set_message(&format!("Running {}", task.name()));
                        let _enter = span.enter();

                        let context = TaskContext {
                            config,
                            name: task.name(),
                            cancel,
                            span: span.clone(),
                        };

                        // The task only sees shared immutable data, a panic
                        // cannot leave anything half-updated.
                        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                            || task.execute(&context, &inputs),
                        )) {
                            Ok(result) => result,
                            Err(panic) => {
                                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                                    format!("Task panicked: {s}")
                                } else if let Some(s) = panic.downcast_ref::<String>() {
                                    format!("Task panicked: {s}")
                                } else {
                                    String::from("Task panicked with unknown payload")
                                };

                                Err(anyhow::anyhow!(msg))
                            }
                        };

                        let duration = start.elapsed();

                        let outcome = match result {
                            Ok(value) => {
                                *state.lock().unwrap_or_else(PoisonError::into_inner) =
                                    TaskState::Completed;
                                Outcome::Completed(value)
                            }
                            Err(cause) => {
                                halted.store(true, Ordering::SeqCst);
                                *state.lock().unwrap_or_else(PoisonError::into_inner) =
                                    TaskState::Failed;
                                Outcome::Failed(cause)
                            }
                        };

                        let _ = sender.send((index, outcome, TaskExecution { start, duration }));
                    });
                }

                if in_flight == 0 {
                    break;
                }

                let Ok((index, outcome, execution)) = receiver.recv() else {
                    break;
                };
                in_flight -= 1;

                let name = graph.graph[index].name();
                match outcome {
                    Outcome::Completed(value) => {
                        tracing::debug!("Task '{}' finished in {:.2?}", name, execution.duration);
                        values.insert(index, value);
                        execution_times.insert(name.to_string(), execution);
                        root_span.pb_inc(1);

                        for &dependent in dependents.get(&index).into_iter().flatten() {
                            if let Some(count) = dependency_counts.get_mut(&dependent) {
                                *count -= 1;
                                if *count == 0 {
                                    ready.insert(dependent);
                                }
                            }
                        }
                    }
                    Outcome::Failed(cause) => {
                        tracing::error!("Task '{}' failed: {:#}", name, cause);
                        if failure.is_none() {
                            failure = Some((index, cause));
                        }
                    }
                    Outcome::Skipped => {
                        tracing::warn!("Task '{}' was skipped", name);
                    }
                }
            }

            failure
        });

        let root = graph.index[target];

        // A token set at any point of the run wins, even if the target
        // itself finished.
        if cancel.is_cancelled() {
            tracing::warn!("Run of '{}' was cancelled", target);
            return Err(RunError::Cancelled);
        }

        if let Some((index, cause)) = failure {
            return Err(RunError::TaskFailed {
                task_name: graph.graph[index].name().to_string(),
                cause,
            });
        }

        let value = values.get(&root).cloned().ok_or(RunError::Cancelled)?;
        let values = values
            .into_iter()
            .map(|(index, value)| (graph.graph[index].name().to_string(), value))
            .collect();

        tracing::info!("Finished '{}'", target);

        Ok(RunOutput {
            target: target.to_string(),
            value,
            values,
            diagnostics: Diagnostics { execution_times },
        })
    }
}
