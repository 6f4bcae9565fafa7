//! Terminal rendering of push events

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use pushflow_push::{ProgressSink, PushEvent};
use std::sync::{Mutex, PoisonError};

const UPLOAD_TEMPLATE: &str = "  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})";

/// Prints one line per event and an upload progress bar
#[derive(Default)]
pub struct TerminalSink {
    upload: Mutex<Option<ProgressBar>>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn upload_bar(&self) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
        self.upload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_upload(&self, total: u64) {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar().template(UPLOAD_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        *self.upload_bar() = Some(bar);
    }

    fn finish_upload(&self) {
        if let Some(bar) = self.upload_bar().take() {
            bar.finish_and_clear();
        }
    }
}

impl ProgressSink for TerminalSink {
    fn on_plan_start(&self, app_name: &str) {
        println!();
        println!("{} {}", "Pushing app".bold(), app_name.cyan().bold());
    }

    fn on_event(&self, event: &PushEvent) {
        match event {
            PushEvent::Uploading { total, .. } | PushEvent::UploadingDroplet { total, .. } => {
                println!("  {} {}", "→".blue(), event);
                self.start_upload(*total);
            }
            PushEvent::RetryUpload { .. } => {
                if let Some(bar) = self.upload_bar().as_ref() {
                    bar.set_position(0);
                }
                println!("  {} {}", "⚠".yellow(), event.to_string().yellow());
            }
            PushEvent::UploadComplete | PushEvent::UploadDropletComplete => {
                self.finish_upload();
                println!("  {} {}", "✓".green(), event);
            }
            PushEvent::ResourceCreated { .. }
            | PushEvent::RouteMapped { .. }
            | PushEvent::RouteUnmapped { .. }
            | PushEvent::BoundServices => {
                println!("  {} {}", "✓".green(), event);
            }
            PushEvent::AwaitingPromotion { .. } => {
                println!("  {} {}", "⏸".yellow(), event.to_string().yellow());
            }
            PushEvent::Complete => {
                println!("{}", "  ✓ Push complete".green().bold());
            }
            PushEvent::Error { cause } => {
                self.finish_upload();
                eprintln!("  {} {}", "✗".red(), cause.to_string().red());
            }
            _ => println!("  {} {}", "→".blue(), event),
        }
    }

    fn on_bytes_transferred(&self, sent: u64, _total: u64) {
        if let Some(bar) = self.upload_bar().as_ref() {
            bar.set_position(sent);
        }
    }
}
