use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::engine::node::NodeId;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub name: String,
    pub start: Instant,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    pub execution_times: HashMap<NodeId, TaskExecution>,
}

impl Diagnostics {
    /// Number of tasks whose `compute` ran.
    pub fn computed(&self) -> usize {
        self.execution_times.len()
    }

    pub fn was_computed(&self, id: NodeId) -> bool {
        self.execution_times.contains_key(&id)
    }

    /// Sum of task durations. Nested pulls are counted in their consumer too.
    pub fn total(&self) -> Duration {
        self.execution_times.values().map(|t| t.duration).sum()
    }

    /// Executions in the order they started.
    pub fn timeline(&self) -> Vec<&TaskExecution> {
        let mut executions: Vec<_> = self.execution_times.values().collect();
        executions.sort_by_key(|t| t.start);
        executions
    }

    /// Plain text table of task timings, one task per line.
    pub fn render_summary(&self) -> String {
        use std::fmt::Write;

        let timeline = self.timeline();
        if timeline.is_empty() {
            return "No tasks ran".to_string();
        }

        let width = timeline.iter().map(|t| t.name.len()).max().unwrap_or(0);
        let mut output = String::new();

        for execution in timeline {
            let millis = execution.duration.as_secs_f64() * 1000.0;
            // Writing into a String cannot fail.
            let _ = writeln!(output, "{:<width$}  {millis:>10.3}ms", execution.name);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Inputs, Node, Table, Task};

    struct Noop;

    impl Task for Noop {
        fn compute(&self, _: Inputs) -> anyhow::Result<Table> {
            Ok(Table::new())
        }
    }

    #[test]
    fn test_render_summary_orders_by_start() {
        let now = Instant::now();
        let mut diagnostics = Diagnostics::default();
        let ids: Vec<NodeId> = (0..2)
            .map(|i| Node::detached(format!("n{i}"), Noop).id())
            .collect();

        diagnostics.execution_times.insert(
            ids[0],
            TaskExecution {
                name: "rfm".into(),
                start: now + Duration::from_millis(5),
                duration: Duration::from_millis(2),
            },
        );
        diagnostics.execution_times.insert(
            ids[1],
            TaskExecution {
                name: "read_csv".into(),
                start: now,
                duration: Duration::from_millis(1),
            },
        );

        let summary = diagnostics.render_summary();
        let lines: Vec<_> = summary.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("read_csv"));
        assert!(lines[1].starts_with("rfm     "));
        assert!(lines[1].ends_with("2.000ms"));
        assert_eq!(diagnostics.total(), Duration::from_millis(3));
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(Diagnostics::default().render_summary(), "No tasks ran");
    }
}
