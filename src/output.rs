//! Result reporting for rossh.
//!
//! Every host outcome emits one structured record; the task emits one
//! summary record. JSON mode renders each record as one object per line,
//! text mode renders a colored key=value line. Records can be duplicated
//! into a file, always uncolored.

use colored::Colorize;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::config::OutputConfig;
use crate::error::Result;
use crate::executor::{HostResult, HostStatus, TaskSummary};

#[derive(Serialize)]
struct HostRecord<'a> {
    task_id: &'a str,
    hostname: &'a str,
    status: HostStatus,
    output: &'a str,
}

/// Writes result and summary records to stdout and the optional file sink.
pub struct Reporter {
    json: bool,
    file: Option<File>,
}

impl Reporter {
    /// Build a reporter from the output settings.
    pub fn new(output: &OutputConfig) -> Result<Self> {
        let file = match &output.file {
            Some(path) => Some(open_sink(path)?),
            None => None,
        };

        Ok(Self {
            json: output.json,
            file,
        })
    }

    /// Emit one host outcome record.
    pub fn host_result(&mut self, task_id: &str, result: &HostResult) {
        let record = HostRecord {
            task_id,
            hostname: &result.alias,
            status: result.status,
            output: &result.message,
        };

        if self.json {
            if let Ok(line) = serde_json::to_string(&record) {
                println!("{}", line);
                self.to_file(&line);
            }
            return;
        }

        let status = match result.status {
            HostStatus::Success => "success".green().bold().to_string(),
            HostStatus::Failed => "failed".red().bold().to_string(),
        };

        println!(
            "{}={} {}={} {}={} {}={:?}",
            "task_id".bright_black(),
            task_id,
            "hostname".bright_black(),
            result.alias.bright_white().bold(),
            "status".bright_black(),
            status,
            "output".bright_black(),
            result.message,
        );

        self.to_file(&format!(
            "task_id={} hostname={} status={} output={:?}",
            task_id, result.alias, result.status, result.message
        ));
    }

    /// Emit the task summary record.
    pub fn summary(&mut self, summary: &TaskSummary) {
        if self.json {
            if let Ok(line) = serde_json::to_string(summary) {
                println!("{}", line);
                self.to_file(&line);
            }
            return;
        }

        println!(
            "{}={} {}={} {}={} {}={:.2}s",
            "task_id".bright_black(),
            summary.task_id,
            "success_count".bright_black(),
            summary.success_count.to_string().green(),
            "failure_count".bright_black(),
            summary.failure_count.to_string().red(),
            "elapsed".bright_black(),
            summary.elapsed,
        );

        self.to_file(&format!(
            "task_id={} success_count={} failure_count={} elapsed={:.2}s",
            summary.task_id, summary.success_count, summary.failure_count, summary.elapsed
        ));
    }

    fn to_file(&mut self, line: &str) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "{}", line);
        }
    }
}

fn open_sink(path: &Path) -> Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_record_json_shape() {
        let record = HostRecord {
            task_id: "20260802120000",
            hostname: "web1",
            status: HostStatus::Success,
            output: "hi",
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"task_id":"20260802120000","hostname":"web1","status":"success","output":"hi"}"#
        );
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = TaskSummary {
            task_id: "t".to_string(),
            success_count: 3,
            failure_count: 0,
            elapsed: 1.2345,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains(r#""success_count":3"#));
        assert!(json.contains(r#""failure_count":0"#));
    }

    #[test]
    fn test_file_sink_receives_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.log");

        let config = OutputConfig {
            file: Some(path.clone()),
            json: false,
            verbose: 0,
            quiet: false,
        };

        let mut reporter = Reporter::new(&config).unwrap();
        reporter.host_result("tid", &HostResult::success("h1", "out"));
        reporter.summary(&TaskSummary {
            task_id: "tid".to_string(),
            success_count: 1,
            failure_count: 0,
            elapsed: 0.5,
        });
        drop(reporter);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("hostname=h1"));
        assert!(content.contains("status=success"));
        assert!(content.contains("success_count=1"));
    }
}
