//! Terminal output: spinners while waiting and colored job status.
//!
//! Uses `indicatif` for the wait spinner and `console` for styling. Status
//! lines go to stderr; stdout carries only results and issued keys.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::auth::Role;
use crate::queue::JobStatus;

/// Spinner shown while a client blocks on a job.
pub struct WaitProgress {
    pb: ProgressBar,
    // Completed
    green: Style,
    // Failed
    red: Style,
    // Gave up waiting
    yellow: Style,
}

impl WaitProgress {
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Waiting for {job_id}"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Stop the spinner and report the final status.
    pub fn finish(&self, status: Option<JobStatus>) {
        self.pb.finish_and_clear();
        match status {
            Some(JobStatus::Completed) => {
                eprintln!("  {} Job completed", self.green.apply_to("✓"));
            }
            Some(JobStatus::Failed) => {
                eprintln!("  {} Job failed", self.red.apply_to("✗"));
            }
            _ => {}
        }
    }

    /// Stop the spinner after the wait gave up.
    pub fn abandon(&self, reason: &str) {
        self.pb.finish_and_clear();
        eprintln!("  {} {reason}", self.yellow.apply_to("…"));
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        JobStatus::Processing => Style::new().cyan(),
        JobStatus::Queued => Style::new().yellow(),
    }
}

pub fn print_submitted(job_id: &str) {
    eprintln!("Job submitted successfully. ID: {}", Style::new().bold().apply_to(job_id));
}

pub fn print_status(status: JobStatus) {
    eprintln!("Status: {}", status_style(status).apply_to(status));
}

/// Pretty JSON on stdout.
pub fn print_result(result: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
    );
}

/// A freshly issued key is only ever shown once.
pub fn print_issued_key(name: &str, role: Role, secret: &str) {
    let yellow = Style::new().yellow();
    eprintln!("Issued {role} key for {name}:");
    println!("{secret}");
    eprintln!("{}", yellow.apply_to("Store it now; it cannot be shown again."));
}
