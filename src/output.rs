//! Shared terminal rendering for scheduler events, queue summaries and pool status.
//! Used by `reelbatch run` and `reelbatch keys`.

use crate::credentials::{CredentialState, CredentialStatus};
use crate::pipeline::{SchedulerEvent, StageName};
use crate::queue::{ItemStatus, QueueCounts, QueueItem};
use std::time::Duration;

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Clear the current terminal line
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

fn status_color(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Completed => GREEN,
        ItemStatus::Failed => RED,
        ItemStatus::Skipped => YELLOW,
        ItemStatus::Waiting | ItemStatus::Processing => "",
    }
}

/// Whole seconds, rounded up, in humantime form ("4m 59s").
pub fn format_remaining(duration: Duration) -> String {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

/// One line per event; `None` for events not worth a line of their own.
pub fn format_event(event: &SchedulerEvent) -> Option<String> {
    match event {
        SchedulerEvent::ItemStarted { item } => Some(format!("▶ {item}")),
        SchedulerEvent::StageStarted { stage, .. } => {
            Some(format!("  {DIM}{}…{RESET}", stage.label()))
        }
        SchedulerEvent::StageCompleted { .. } => None,
        SchedulerEvent::StageRetried {
            stage,
            attempt,
            blocked_credential,
            ..
        } => Some(format!(
            "  {YELLOW}{stage}: credential {blocked_credential} rejected, attempt {attempt}{RESET}"
        )),
        SchedulerEvent::ItemTerminal {
            item,
            status,
            remark,
        } => {
            let color = status_color(*status);
            Some(format!("{color}{status}{RESET} {item} {DIM}{remark}{RESET}"))
        }
    }
}

pub fn render_event(event: &SchedulerEvent) {
    if let Some(line) = format_event(event) {
        clear_line();
        eprintln!("{line}");
    }
}

/// Queue totals with the overall completion percentage.
pub fn format_counts(counts: &QueueCounts) -> String {
    format!("{counts} ({}% complete)", counts.overall_percent())
}

/// Final per-item table row.
pub fn format_item(item: &QueueItem) -> String {
    let color = status_color(item.status());
    let remark = item
        .visible_status_message()
        .filter(|_| item.status() != ItemStatus::Completed)
        .unwrap_or(item.remarks());
    format!(
        "{color}{:<10}{RESET} {}  {DIM}{remark}{RESET}",
        item.status().as_str(),
        item.id()
    )
}

/// One line per credential: name, masked secret, state, usage.
///
/// `masked_secret` maps a credential name to its masked secret.
pub fn format_pool_status(
    statuses: &[CredentialStatus],
    masked_secret: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    statuses
        .iter()
        .map(|status| {
            let secret = masked_secret(&status.name).unwrap_or_else(|| "****".to_string());
            let state = match &status.state {
                CredentialState::Available => format!("{GREEN}available{RESET}"),
                CredentialState::Blocked { remaining } => {
                    format!("{RED}blocked{RESET} ({} left)", format_remaining(*remaining))
                }
            };
            format!(
                "{:<16} {secret:<10} {state}  {DIM}{} use(s){RESET}",
                status.name, status.uses
            )
        })
        .collect()
}

/// Stage table for `reelbatch stages`.
pub fn format_stages(stages: &[StageName]) -> Vec<String> {
    let total: u32 = stages.iter().map(StageName::weight).sum();
    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            let key = if stage.uses_api_key() { "api key" } else { "" };
            format!(
                "{:>2}. {:<18} {:>3}%  {:<28} {DIM}{key}{RESET}",
                index + 1,
                stage.as_str(),
                (stage.weight() * 100).checked_div(total).unwrap_or(0),
                stage.label()
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_completed_is_silent() {
        let event = SchedulerEvent::StageCompleted {
            item: "u".to_string(),
            stage: StageName::Video,
        };
        assert!(format_event(&event).is_none());
    }

    #[test]
    fn retried_event_names_credential() {
        let event = SchedulerEvent::StageRetried {
            item: "u".to_string(),
            stage: StageName::Tts,
            attempt: 2,
            blocked_credential: "api_1".to_string(),
        };
        let line = format_event(&event).unwrap();
        assert!(line.contains("tts: credential api_1 rejected, attempt 2"));
    }

    #[test]
    fn terminal_event_shows_status_and_remark() {
        let event = SchedulerEvent::ItemTerminal {
            item: "https://example.com/v".to_string(),
            status: ItemStatus::Failed,
            remark: "ocr_analysis: no frames".to_string(),
        };
        let line = format_event(&event).unwrap();
        assert!(line.starts_with(RED));
        assert!(line.contains("failed"));
        assert!(line.contains("ocr_analysis: no frames"));
    }

    #[test]
    fn counts_include_percent() {
        let counts = QueueCounts {
            waiting: 0,
            processing: 0,
            completed: 3,
            failed: 1,
            skipped: 0,
        };
        assert!(format_counts(&counts).ends_with("(75% complete)"));
    }

    #[test]
    fn pool_status_lines() {
        let statuses = vec![
            CredentialStatus {
                name: "api_1".to_string(),
                state: CredentialState::Available,
                uses: 3,
            },
            CredentialStatus {
                name: "api_2".to_string(),
                state: CredentialState::Blocked {
                    remaining: Duration::from_millis(299_500),
                },
                uses: 1,
            },
        ];
        let lines = format_pool_status(&statuses, |name| {
            (name == "api_1").then(|| "AIza****".to_string())
        });
        assert!(lines[0].contains("AIza****"));
        assert!(lines[0].contains("available"));
        assert!(lines[1].contains("blocked"));
        assert!(lines[1].contains("5m left"));
    }

    #[test]
    fn remaining_rounds_up() {
        assert_eq!(format_remaining(Duration::from_millis(1)), "1s");
        assert_eq!(format_remaining(Duration::from_secs(90)), "1m 30s");
    }

    #[test]
    fn stage_table_marks_keyed_stages() {
        let lines = format_stages(&StageName::ALL);
        assert_eq!(lines.len(), 8);
        assert!(lines[0].contains("download"));
        assert!(!lines[0].contains("api key"));
        assert!(lines[4].contains("tts"));
        assert!(lines[4].contains("api key"));
    }
}
