//! Execution Timeline
//!
//! Records task lifecycle events in the order the runner observed them,
//! for ordering checks, duration reports and an ASCII Gantt chart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A try started
    Started,
    /// The task succeeded
    Succeeded,
    /// A try failed and the task will retry
    Retrying,
    /// The task failed for good
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub task_id: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Ordered log of task events for one run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_event(&mut self, task_id: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            task_id: task_id.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Position of the first matching event, in recording order.
    pub fn event_index(&self, task_id: &str, event_type: EventType) -> Option<usize> {
        self.events
            .iter()
            .position(|e| e.task_id == task_id && e.event_type == event_type)
    }

    /// Position of the last matching event, in recording order.
    pub fn last_event_index(&self, task_id: &str, event_type: EventType) -> Option<usize> {
        self.events
            .iter()
            .rposition(|e| e.task_id == task_id && e.event_type == event_type)
    }

    /// Task ids in the order they first started.
    pub fn start_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|e| e.event_type == EventType::Started)
            .fold(Vec::new(), |mut order, e| {
                if !order.contains(&e.task_id) {
                    order.push(e.task_id.clone());
                }
                order
            })
    }

    /// Generates an ASCII Gantt chart.
    ///
    /// Each task is drawn from its first start to its last terminal event,
    /// scaled to 50 columns.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.start_time.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        let scale = 50.0 / total_time as f64;
        let spans = self.spans();

        let mut sorted: Vec<_> = spans.into_iter().collect();
        sorted.sort_by_key(|(_, (start, _))| *start);

        for (task_id, (start, end)) in sorted {
            if end > start {
                let start_pos = (start as f64 * scale) as usize;
                let width = ((end - start) as f64 * scale).max(1.0) as usize;

                let mut bar = " ".repeat(start_pos);
                bar.push_str(&"#".repeat(width));

                output.push_str(&format!(
                    "{:12} |{}| ({} ms)\n",
                    truncate(&task_id, 12),
                    bar,
                    end - start
                ));
            }
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Wall time from first start to final outcome per task, in milliseconds.
    ///
    /// Includes time spent waiting between retries.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .filter(|(_, (start, end))| end >= start)
            .map(|(id, (start, end))| (id, end - start))
            .collect()
    }

    /// (first start, final outcome) offsets for tasks that finished.
    fn spans(&self) -> HashMap<String, (u128, u128)> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut spans: HashMap<String, (u128, u128)> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            match event.event_type {
                EventType::Started => {
                    starts.entry(event.task_id.as_str()).or_insert(elapsed);
                }
                EventType::Succeeded | EventType::Failed => {
                    if let Some(start) = starts.get(event.task_id.as_str()) {
                        spans.insert(event.task_id.clone(), (*start, elapsed));
                    }
                }
                EventType::Retrying => {}
            }
        }

        spans
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.get_events().is_empty());
    }

    #[test]
    fn test_event_index_ordering() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a", EventType::Started);
        timeline.add_event("b", EventType::Started);
        timeline.add_event("b", EventType::Succeeded);
        timeline.add_event("a", EventType::Succeeded);

        assert_eq!(timeline.event_index("a", EventType::Started), Some(0));
        assert_eq!(timeline.event_index("a", EventType::Succeeded), Some(3));
        assert_eq!(timeline.event_index("c", EventType::Started), None);
        assert_eq!(timeline.start_order(), vec!["a", "b"]);
    }

    #[test]
    fn test_last_event_index_with_retry() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a", EventType::Started);
        timeline.add_event("a", EventType::Retrying);
        timeline.add_event("a", EventType::Started);
        timeline.add_event("a", EventType::Succeeded);

        assert_eq!(timeline.event_index("a", EventType::Started), Some(0));
        assert_eq!(timeline.last_event_index("a", EventType::Started), Some(2));
        assert_eq!(timeline.start_order(), vec!["a"]);
    }

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("step1", EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("step1", EventType::Succeeded);

        let durations = timeline.get_durations();
        assert!(durations["step1"] >= 50);
    }

    #[test]
    fn test_get_durations_only_started() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("step1", EventType::Started);
        assert!(!timeline.get_durations().contains_key("step1"));
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("extract", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("extract", EventType::Succeeded);
        timeline.add_event("a_very_long_task_name", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("a_very_long_task_name", EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("extract"));
        assert!(chart.contains("a_very_lo..."));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
