//! Stand-in stages for running a batch without the production tool attached.

use crate::pipeline::stage::{Stage, StageContext, StageName, StageOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Slice length used while sleeping, so a stop request is noticed quickly.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Sleeps for a fixed time and succeeds.
///
/// Keyed stages still go through the credential pool, so a dry run shows the
/// rotation the real stages would see.
#[derive(Debug, Clone)]
pub struct DryRunStage {
    name: StageName,
    delay: Duration,
}

impl DryRunStage {
    pub fn new(name: StageName, delay: Duration) -> Self {
        Self { name, delay }
    }
}

impl Stage for DryRunStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn run(&self, ctx: &StageContext<'_>) -> StageOutcome {
        let mut remaining = self.delay;
        while !remaining.is_zero() {
            if ctx.is_cancelled() {
                break;
            }
            let slice = remaining.min(CANCEL_POLL);
            std::thread::sleep(slice);
            remaining -= slice;
        }

        match (self.name, ctx.credential) {
            (StageName::Finalize, _) => StageOutcome::success_with("dry run"),
            (_, Some(credential)) => {
                StageOutcome::success_with(format!("{} via {}", self.name.label(), credential))
            }
            _ => StageOutcome::success(),
        }
    }
}

/// Builds one dry-run stage per name.
pub fn dry_run_stages(names: &[StageName], delay: Duration) -> Vec<Arc<dyn Stage>> {
    names
        .iter()
        .map(|name| Arc::new(DryRunStage::new(*name, delay)) as Arc<dyn Stage>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::pipeline::stage::CancelToken;
    use std::time::Instant;

    #[test]
    fn test_dry_run_succeeds() {
        let cancel = CancelToken::new();
        let stage = DryRunStage::new(StageName::Download, Duration::ZERO);
        let ctx = StageContext {
            item_id: "u",
            attempt: 1,
            credential: None,
            cancel: &cancel,
        };
        assert!(stage.run(&ctx).is_success());
        assert!(!stage.requires_credential());
    }

    #[test]
    fn test_keyed_stage_names_credential() {
        let cancel = CancelToken::new();
        let credential = Credential::new("api_2", "secret-value-123");
        let stage = DryRunStage::new(StageName::Tts, Duration::ZERO);
        let ctx = StageContext {
            item_id: "u",
            attempt: 1,
            credential: Some(&credential),
            cancel: &cancel,
        };
        assert_eq!(
            stage.run(&ctx),
            StageOutcome::success_with("Generating voice-over via api_2")
        );
        assert!(stage.requires_credential());
    }

    #[test]
    fn test_cancel_cuts_sleep_short() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let stage = DryRunStage::new(StageName::Video, Duration::from_secs(30));
        let ctx = StageContext {
            item_id: "u",
            attempt: 1,
            credential: None,
            cancel: &cancel,
        };
        let started = Instant::now();
        stage.run(&ctx);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_dry_run_stages_preserves_order() {
        let stages = dry_run_stages(&StageName::ALL, Duration::ZERO);
        let names: Vec<StageName> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, StageName::ALL.to_vec());
    }
}
