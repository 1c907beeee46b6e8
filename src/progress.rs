//! Progress bar for fleet fan-out

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{FleetProgress, HostRef, Outcome};

/// Shows one tick per finished host
pub struct HostProgress {
    bar: ProgressBar,
}

impl HostProgress {
    pub fn new(label: &str, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        let template = "{spinner:.green} {prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}";
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_prefix(label.to_string());
        Self { bar }
    }
}

impl FleetProgress for HostProgress {
    fn on_start(&self, hosts: usize) {
        self.bar.set_length(hosts as u64);
    }

    fn on_host_complete(&self, host: &HostRef, outcome: Outcome) {
        let symbol = match outcome {
            Outcome::Success => "✓".green(),
            Outcome::Warning => "⚠".yellow(),
            Outcome::Error => "✗".red(),
        };
        self.bar.set_message(format!("{symbol} {}", host.name));
        self.bar.inc(1);
    }

    fn on_finish(&self) {
        self.bar.finish_and_clear();
    }
}
