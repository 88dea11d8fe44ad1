use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

use crate::engine::{TaskExecution, TaskGraph};

/// Execution metrics of a single run.
///
/// Returned inside [`RunOutput`](crate::engine::RunOutput); tasks that were
/// not part of the run have no entry.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Start time and duration of every executed task, keyed by task name.
    pub execution_times: BTreeMap<String, TaskExecution>,
}

impl Diagnostics {
    /// Sum of all task durations. Exceeds wall time when tasks ran in parallel.
    pub fn total_task_time(&self) -> Duration {
        self.execution_times.values().map(|t| t.duration).sum()
    }

    /// Wall time from the first task start to the last task end.
    pub fn wall_time(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self.execution_times.values().map(|t| t.start + t.duration).max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by execution duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Grey**: Not part of this run
    pub fn render_mermaid(&self, graph: &TaskGraph) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let (min_time, max_time) = self
            .execution_times
            .values()
            .map(|t| t.duration.as_secs_f64())
            .fold(None, |acc: Option<(f64, f64)>, secs| match acc {
                None => Some((secs, secs)),
                Some((lo, hi)) => Some((lo.min(secs), hi.max(secs))),
            })
            .unwrap_or((0.0, 0.0));

        let span = if (max_time - min_time).abs() < f64::EPSILON {
            1.0
        } else {
            max_time - min_time
        };

        for index in graph.graph.node_indices() {
            let name = graph.graph[index].name();
            let escaped = name.replace('"', "\\\"");

            let (label, color) = match self.execution_times.get(name) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / span;
                    (format!("{:.2?}", exec.duration), heat(t))
                }
                None => ("not run".to_string(), "#D3D3D3".to_string()),
            };

            let _ = writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), escaped, label);
            let _ = writeln!(f, "    style {} fill:{}", index.index(), color);
        }

        for edge in graph.graph.raw_edges() {
            let _ = writeln!(f, "    {} --> {}", edge.source().index(), edge.target().index());
        }

        f
    }
}

/// Maps 0.0 → green, 0.5 → yellow, 1.0 → red.
fn heat(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let (r, g) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
    };

    format!("#{:02X}{:02X}00", r, g)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::engine::{TaskDefinition, TaskGraphBuilder};

    fn graph() -> TaskGraph {
        let mut builder = TaskGraphBuilder::new();
        builder
            .add_task(TaskDefinition::build("compile").run(|_, _| Ok(())))
            .add_task(TaskDefinition::build("test").depends_on(["compile"]).run(|_, _| Ok(())))
            .add_task(TaskDefinition::build("clean").run(|_, _| Ok(())));
        builder.build().unwrap()
    }

    #[test]
    fn test_heat_scale() {
        assert_eq!(heat(0.0), "#00FF00");
        assert_eq!(heat(0.5), "#FFFF00");
        assert_eq!(heat(1.0), "#FF0000");
    }

    #[test]
    fn test_render_mermaid() {
        let start = Instant::now();
        let mut diagnostics = Diagnostics::default();
        diagnostics.execution_times.insert(
            "compile".into(),
            TaskExecution { start, duration: Duration::from_millis(10) },
        );
        diagnostics.execution_times.insert(
            "test".into(),
            TaskExecution {
                start: start + Duration::from_millis(10),
                duration: Duration::from_millis(30),
            },
        );

        let rendered = diagnostics.render_mermaid(&graph());

        assert!(rendered.starts_with("graph LR\n"));
        assert!(rendered.contains("style 0 fill:#00FF00"));
        assert!(rendered.contains("style 1 fill:#FF0000"));
        assert!(rendered.contains("2[\"clean\\nnot run\"]"));
        assert!(rendered.contains("0 --> 1"));

        assert_eq!(diagnostics.total_task_time(), Duration::from_millis(40));
        assert_eq!(diagnostics.wall_time(), Duration::from_millis(40));
    }
}
