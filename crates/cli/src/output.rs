// Output formatting for CLI

use batchrun_engine::RunSummary;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_value<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value)?);
            }
            OutputFormat::Text => {
                // Text format is handled by the caller
            }
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print the run summary in the requested format
pub fn print_summary(format: OutputFormat, summary: &RunSummary) -> anyhow::Result<()> {
    if !format.is_text() {
        return format.print_value(summary);
    }

    print_field("Run", &summary.run_id.to_string());
    print_field("Outcome", &format!("{:?}", summary.outcome));
    print_field("Elapsed", &format!("{}ms", summary.elapsed.as_millis()));
    print_field(
        "Tasks",
        &format!(
            "{} enqueued, {} dequeued, {} remaining",
            summary.queue.enqueued, summary.queue.dequeued, summary.queue.remaining
        ),
    );
    print_field(
        "Records",
        &format!(
            "{} written, {} failed, {} write errors, {} dropped",
            summary.records_written,
            summary.tasks_failed,
            summary.write_errors,
            summary.tasks_dropped
        ),
    );
    println!();

    let columns = [("WORKER", 8), ("EXIT", 10), ("TAKEN", 7), ("WRITTEN", 7)];
    print_table_header(&columns);
    for report in &summary.workers {
        let worker = report.worker_id.to_string();
        let exit = format!("{:?}", report.exit);
        let taken = report.dequeued.to_string();
        let written = report.written.to_string();
        print_table_row(&[
            (worker.as_str(), 8),
            (exit.as_str(), 10),
            (taken.as_str(), 7),
            (written.as_str(), 7),
        ]);
    }
    Ok(())
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    let header: String = columns
        .iter()
        .map(|(name, width)| format!("{:<width$}", name, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", header);
}

/// Print a table row
pub fn print_table_row(values: &[(&str, usize)]) {
    let row: String = values
        .iter()
        .map(|(val, width)| {
            let s = if val.len() > *width {
                format!("{}...", &val[..(width - 3)])
            } else {
                val.to_string()
            };
            format!("{:<width$}", s, width = width)
        })
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", row);
}
