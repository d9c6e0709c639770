//! Human-readable text output
//!
//! Progress is one `.` per completed task; everything else the pool reports
//! (replacements, the end of a run) gets its own lines.

use crate::coordinator::events::PoolEvent;
use crate::stats::RunSummary;
use crate::util::time::{format_duration, format_number, format_optional};
use std::io::Write;

/// Text for one pool event, or None if it prints nothing
///
/// Task completions render as a bare `.` (no newline) unless `quiet` is set.
pub fn render_event(event: &PoolEvent, quiet: bool) -> Option<String> {
    match event {
        PoolEvent::PoolReady { pool_size } => Some(format!("Pool ready: {} workers\n", pool_size)),
        PoolEvent::TaskCompleted { .. } if quiet => None,
        PoolEvent::TaskCompleted { .. } => Some(".".to_string()),
        PoolEvent::WorkerUnresponsive { slot, endpoint } => Some(format!(
            "\n⚠️  Worker in slot {} ({}) did not answer its liveness probe\n",
            slot, endpoint
        )),
        PoolEvent::WorkerReplaced {
            slot,
            old_endpoint,
            new_endpoint,
            lost_label,
            reissued_label,
        } => {
            let mut line = format!("Slot {} replaced: {} -> {}", slot, old_endpoint, new_endpoint);
            if let (Some(lost), Some(reissued)) = (lost_label, reissued_label) {
                line.push_str(&format!(" (task {} lost, re-issued as {})", lost, reissued));
            }
            line.push('\n');
            Some(line)
        }
        PoolEvent::ProbeDiscarded { .. } => None,
        PoolEvent::RunFinished(_) => None,
        PoolEvent::PoolStopped => Some("Pool stopped\n".to_string()),
    }
}

/// Print one pool event to stdout
pub fn print_event(event: &PoolEvent, quiet: bool) {
    if let Some(text) = render_event(event, quiet) {
        print!("{}", text);
        let _ = std::io::stdout().flush();
    }
}

/// Summary block for one finished run
pub fn format_summary(run: u32, summary: &RunSummary) -> String {
    let mut out = String::new();

    out.push_str("═══════════════════════════════════════════════════════════\n");
    out.push_str(&format!("                    RUN {} RESULTS\n", run));
    out.push_str("═══════════════════════════════════════════════════════════\n");
    out.push_str(&format!(
        "Tasks:      {} / {}\n",
        format_number(summary.completed),
        format_number(summary.total_tasks)
    ));
    if summary.reissued > 0 {
        out.push_str(&format!("Re-issued:  {}\n", format_number(summary.reissued)));
    }
    out.push_str(&format!(
        "Magnitude:  {}\n",
        format_number(summary.aggregate_magnitude)
    ));
    out.push_str(&format!("Elapsed:    {}\n", format_duration(summary.elapsed)));
    out.push_str(&format!("Throughput: {}\n", summary.throughput));

    let latency = &summary.latency;
    if latency.samples > 0 {
        out.push_str("Task latency:\n");
        out.push_str(&format!(
            "  min {}  mean {}  max {}\n",
            format_optional(latency.min),
            format_optional(latency.mean),
            format_optional(latency.max)
        ));
        out.push_str(&format!(
            "  p50 {}  p90 {}  p99 {}\n",
            format_optional(latency.p50),
            format_optional(latency.p90),
            format_optional(latency.p99)
        ));
    }

    out
}

/// Print the summary of a finished run
pub fn print_summary(run: u32, summary: &RunSummary) {
    println!();
    print!("{}", format_summary(run, summary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Endpoint;
    use crate::stats::{LatencySummary, Throughput};
    use std::time::Duration;

    #[test]
    fn test_progress_dots() {
        let event = PoolEvent::TaskCompleted {
            slot: 0,
            label: 3,
            magnitude: 7,
            completed: 1,
            total: 5,
        };
        assert_eq!(render_event(&event, false).as_deref(), Some("."));
        assert_eq!(render_event(&event, true), None);
    }

    #[test]
    fn test_replacement_line() {
        let event = PoolEvent::WorkerReplaced {
            slot: 1,
            old_endpoint: Endpoint::new(5001),
            new_endpoint: Endpoint::new(6000),
            lost_label: Some(1),
            reissued_label: Some(5),
        };
        assert_eq!(
            render_event(&event, true).unwrap(),
            "Slot 1 replaced: 5001 -> 6000 (task 1 lost, re-issued as 5)\n"
        );
    }

    #[test]
    fn test_summary_text() {
        let summary = RunSummary {
            total_tasks: 1200,
            completed: 1200,
            aggregate_magnitude: 1_000_000,
            elapsed: Duration::from_secs(2),
            throughput: Throughput::compute(Duration::from_secs(2), 1_000_000),
            latency: LatencySummary {
                samples: 1200,
                min: Some(Duration::from_millis(1)),
                mean: Some(Duration::from_millis(4)),
                p50: Some(Duration::from_millis(3)),
                p90: Some(Duration::from_millis(8)),
                p99: Some(Duration::from_millis(12)),
                max: Some(Duration::from_millis(15)),
            },
            reissued: 0,
        };

        let text = format_summary(1, &summary);
        assert!(text.contains("RUN 1 RESULTS"));
        assert!(text.contains("Tasks:      1,200 / 1,200"));
        assert!(text.contains("Magnitude:  1,000,000"));
        assert!(text.contains("Throughput: 2.000 micro seconds per unit of magnitude"));
        assert!(text.contains("p99 12.00ms"));
        assert!(!text.contains("Re-issued"));
    }
}
