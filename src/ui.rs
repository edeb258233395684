//! Terminal output for `run`: a spinner while the job is queued, a progress
//! bar while it runs, colored result lines.

use std::time::Duration;

use console::Style;
use cronicle_hooks::{CronicleError, Job};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress display for one job, from queued to finished.
pub struct JobProgress {
    // Spinner while queued, percentage bar once started.
    pb: ProgressBar,
    // Successful completion.
    green: Style,
    // Launch failures and failed jobs.
    red: Style,
    // Warnings and detached runs.
    yellow: Style,
}

impl JobProgress {
    /// Starts a spinner while waiting for the scheduler to start the job.
    pub fn start(title: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("Waiting for {title} to start"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Switches to a percentage bar once the job is running.
    pub fn started(&self, job: &Job) {
        self.pb.println(format!("  Job {} started: {}", job.id(), job.details_url()));
        self.pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        self.pb.set_length(100);
        self.update(job);
    }

    /// Moves the bar to the job's last reported progress.
    pub fn update(&self, job: &Job) {
        self.pb.set_position((job.progress().clamp(0.0, 1.0) * 100.0).round() as u64);
        if let Some(elapsed) = job.elapsed() {
            self.pb.set_message(format!("{elapsed:.0}s"));
        }
    }

    pub fn warn(&self, message: &str) {
        self.pb.println(format!("  {} {message}", self.yellow.apply_to("!")));
    }

    /// Leaves the job running and prints where to follow it.
    pub fn detached(&self, job: &Job) {
        self.pb.finish_and_clear();
        println!("  {} Job {} running: {}", self.yellow.apply_to("→"), job.id(), job.details_url());
    }

    pub fn launch_failed(&self, err: &CronicleError) {
        self.pb.finish_and_clear();
        println!("  {} {err}", self.red.apply_to("✗"));
    }

    pub fn finish(&self, job: &Job) {
        self.pb.finish_and_clear();
        let description = job.description().unwrap_or_default();
        if job.is_failed() {
            let code = job
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "non-numeric".to_string());
            println!("  {} Job {} failed (code {code}) {description}", self.red.apply_to("✗"), job.id());
        } else {
            println!("  {} Job {} completed {description}", self.green.apply_to("✓"), job.id());
        }
    }
}
