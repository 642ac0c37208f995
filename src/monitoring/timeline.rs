//! Execution Timeline
//!
//! Tracks task start/end times for the Gantt chart written to
//! `.nerunner/timeline.txt` after each run.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

const CHART_WIDTH: usize = 50;
const LABEL_WIDTH: usize = 36;

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// ID of the task
    pub task_id: String,
    /// Type of event
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a run.
///
/// Records when each task starts, completes, or fails. Skipped tasks never
/// appear.
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

    /// Records an event for a task.
    pub fn add_event(&mut self, task_id: String, event_type: EventType) {
        self.events.push(TimelineEvent {
            task_id,
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each task is shown as a bar indicating when it ran
    /// relative to the total execution time. Failed tasks are marked `x`.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();

        if total_time == 0 {
            return output;
        }

        let scale = CHART_WIDTH as f64 / total_time as f64;

        // (start, end, failed) per task
        let mut task_times: HashMap<String, (u128, u128, bool)> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            match event.event_type {
                EventType::Started => {
                    task_times.insert(event.task_id.clone(), (elapsed, elapsed, false));
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(times) = task_times.get_mut(&event.task_id) {
                        times.1 = elapsed;
                        times.2 = event.event_type == EventType::Failed;
                    }
                }
            }
        }

        let mut sorted_tasks: Vec<_> = task_times.into_iter().collect();
        sorted_tasks.sort_by(|a, b| (a.1 .0, &a.0).cmp(&(b.1 .0, &b.0)));

        for (task_id, (start, end, failed)) in sorted_tasks {
            let start_pos = ((start as f64 * scale) as usize).min(CHART_WIDTH - 1);
            let duration = ((end - start) as f64 * scale).max(1.0) as usize;
            let duration = duration.min(CHART_WIDTH - start_pos);

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&(if failed { "x" } else { "#" }).repeat(duration));

            output.push_str(&format!(
                "{} |{:<width$}| ({} ms)\n",
                truncate(&task_id, LABEL_WIDTH),
                bar,
                end - start,
                width = CHART_WIDTH
            ));
        }

        output.push_str("\nTime per rule:\n");
        for (rule, ms) in self.rule_totals() {
            output.push_str(&format!("  {:24} {} ms\n", rule, ms));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Summed task durations grouped by rule name.
    pub fn rule_totals(&self) -> BTreeMap<String, u128> {
        let mut totals = BTreeMap::new();
        for (task_id, ms) in self.get_durations() {
            let rule = task_id.split('[').next().unwrap_or(&task_id).to_string();
            *totals.entry(rule).or_insert(0) += ms;
        }
        totals
    }

    /// Returns task durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        let mut starts: HashMap<String, u128> = HashMap::new();
        let mut durations: HashMap<String, u128> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            match event.event_type {
                EventType::Started => {
                    starts.insert(event.task_id.clone(), elapsed);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.get(&event.task_id) {
                        durations.insert(event.task_id.clone(), elapsed - start);
                    }
                }
            }
        }

        durations
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:<width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("simulation[chrom=chr1,seed=7]".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("simulation[chrom=chr1,seed=7]".to_string(), EventType::Completed);
        timeline.add_event("msmc_run[n=4,seed=7]".to_string(), EventType::Started);

        let durations = timeline.get_durations();
        assert!(durations["simulation[chrom=chr1,seed=7]"] >= 50);
        // Still running
        assert!(!durations.contains_key("msmc_run[n=4,seed=7]"));
        assert_eq!(durations.len(), 1);
    }

    #[test]
    fn test_gantt_chart_marks_failures() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("smcpp_format[chrom=chr1,seed=7]".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("smcpp_format[chrom=chr1,seed=7]".to_string(), EventType::Completed);

        timeline.add_event("smcpp_run[seed=7]".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("smcpp_run[seed=7]".to_string(), EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("smcpp_run[seed=7]"));
        assert!(chart.contains("Total:"));

        let lines: Vec<&str> = chart.lines().filter(|l| l.contains("ms)")).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("smcpp_format"));
        assert!(lines[0].split('|').nth(1).unwrap().contains('#'));
        assert!(lines[1].split('|').nth(1).unwrap().contains('x'));

        // Bars line up behind fixed-width labels
        for line in &lines {
            assert_eq!(line.find('|'), Some(LABEL_WIDTH + 1));
            assert_eq!(line.rfind('|'), Some(LABEL_WIDTH + 2 + CHART_WIDTH));
        }
    }

    #[test]
    fn test_rule_totals_group_wildcards() {
        let mut timeline = ExecutionTimeline::new();
        for seed in [1, 2] {
            let id = format!("stairway_run[seed={}]", seed);
            timeline.add_event(id.clone(), EventType::Started);
            thread::sleep(Duration::from_millis(10));
            timeline.add_event(id, EventType::Completed);
        }
        timeline.add_event("final_plot".to_string(), EventType::Started);
        timeline.add_event("final_plot".to_string(), EventType::Completed);

        let totals = timeline.rule_totals();
        assert_eq!(totals.len(), 2);
        assert!(totals["stairway_run"] >= 20);
        assert!(totals.contains_key("final_plot"));
        assert!(timeline.gantt_chart().contains("Time per rule:"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let timeline = ExecutionTimeline::default();
        assert!(timeline.gantt_chart().contains("Timeline"));
    }

    #[test]
    fn test_truncate_long_ids() {
        let id = "msmc_format[chrom=chr22,n=8,seed=1234567890]";
        let label = truncate(id, LABEL_WIDTH);
        assert_eq!(label.chars().count(), LABEL_WIDTH);
        assert!(label.ends_with("..."));
        assert_eq!(truncate("final_plot", 12), "final_plot  ");
    }
}
