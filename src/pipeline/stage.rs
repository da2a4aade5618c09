//! Stage interface between the scheduler and the work it drives.
//!
//! A stage is one step of turning a source video into a localized one. The
//! scheduler owns ordering, credentials and retries; a stage only reports what
//! happened through [`StageOutcome`].

use crate::credentials::{Credential, CredentialFailure};
use crate::error::{ReelbatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The fixed pipeline steps, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Download,
    Analysis,
    OcrAnalysis,
    Translation,
    Tts,
    SubtitleOverlay,
    Video,
    Finalize,
}

impl StageName {
    /// Every stage in execution order.
    pub const ALL: [StageName; 8] = [
        StageName::Download,
        StageName::Analysis,
        StageName::OcrAnalysis,
        StageName::Translation,
        StageName::Tts,
        StageName::SubtitleOverlay,
        StageName::Video,
        StageName::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Download => "download",
            StageName::Analysis => "analysis",
            StageName::OcrAnalysis => "ocr_analysis",
            StageName::Translation => "translation",
            StageName::Tts => "tts",
            StageName::SubtitleOverlay => "subtitle_overlay",
            StageName::Video => "video",
            StageName::Finalize => "finalize",
        }
    }

    /// Human-readable label used in status messages.
    pub fn label(&self) -> &'static str {
        match self {
            StageName::Download => "Downloading",
            StageName::Analysis => "Analyzing video",
            StageName::OcrAnalysis => "Reading burned-in subtitles",
            StageName::Translation => "Translating",
            StageName::Tts => "Generating voice-over",
            StageName::SubtitleOverlay => "Applying subtitles",
            StageName::Video => "Rendering video",
            StageName::Finalize => "Finalizing",
        }
    }

    /// Relative share of an item's total work, used for progress percentages.
    pub fn weight(&self) -> u32 {
        match self {
            StageName::Download => 5,
            StageName::Analysis => 15,
            StageName::OcrAnalysis => 10,
            StageName::Translation => 10,
            StageName::Tts => 15,
            StageName::SubtitleOverlay => 10,
            StageName::Video => 10,
            StageName::Finalize => 5,
        }
    }

    /// Whether the stage talks to a keyed API in the production tool.
    pub fn uses_api_key(&self) -> bool {
        matches!(
            self,
            StageName::Analysis
                | StageName::OcrAnalysis
                | StageName::Translation
                | StageName::Tts
        )
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = ReelbatchError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        StageName::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| ReelbatchError::UnknownStage {
                name: wanted.to_string(),
            })
    }
}

/// Checks that `stages` follow the canonical order without repeats.
///
/// Stages may be left out, but never reordered.
pub fn validate_stage_order(stages: &[StageName]) -> Result<()> {
    if stages.is_empty() {
        return Err(ReelbatchError::StageOrder {
            message: "at least one stage is required".to_string(),
        });
    }

    for pair in stages.windows(2) {
        if pair[0] == pair[1] {
            return Err(ReelbatchError::StageOrder {
                message: format!("stage '{}' appears more than once", pair[0]),
            });
        }
        if pair[0] > pair[1] {
            return Err(ReelbatchError::StageOrder {
                message: format!("'{}' must run before '{}'", pair[1], pair[0]),
            });
        }
    }
    Ok(())
}

/// Cooperative cancellation flag shared between the scheduler and stages.
///
/// The scheduler only acts on it between stages; a long-running stage may poll
/// it to return early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What a stage gets to see for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Source URL of the item being processed.
    pub item_id: &'a str,
    /// 1-based attempt number for this stage on this item.
    pub attempt: u32,
    /// Present only for stages that require a credential.
    pub credential: Option<&'a Credential>,
    pub cancel: &'a CancelToken,
}

impl StageContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Stage finished; the optional summary becomes the item's remark if no
    /// later stage reports one.
    Success { summary: Option<String> },
    /// The credential was rejected; the item is retried with another one.
    CredentialError {
        kind: CredentialFailure,
        message: String,
    },
    /// Unrecoverable for this item; the item fails.
    Fatal(String),
    /// Item cannot be processed but this is not an error (e.g. no subtitles found).
    SoftSkip(String),
}

impl StageOutcome {
    pub fn success() -> Self {
        StageOutcome::Success { summary: None }
    }

    pub fn success_with(summary: impl Into<String>) -> Self {
        StageOutcome::Success {
            summary: Some(summary.into()),
        }
    }

    pub fn credential_error(kind: CredentialFailure, message: impl Into<String>) -> Self {
        StageOutcome::CredentialError {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        StageOutcome::Fatal(message.into())
    }

    pub fn soft_skip(reason: impl Into<String>) -> Self {
        StageOutcome::SoftSkip(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success { .. })
    }
}

/// One pipeline step, implemented outside the scheduler.
///
/// `run` is called from the scheduler's worker thread. A panic inside `run` is
/// caught and treated as a fatal error for the item.
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// When true, the scheduler acquires a credential before each invocation.
    fn requires_credential(&self) -> bool {
        self.name().uses_api_key()
    }

    fn run(&self, ctx: &StageContext<'_>) -> StageOutcome;
}

impl<T: Stage + ?Sized> Stage for Arc<T> {
    fn name(&self) -> StageName {
        (**self).name()
    }

    fn requires_credential(&self) -> bool {
        (**self).requires_credential()
    }

    fn run(&self, ctx: &StageContext<'_>) -> StageOutcome {
        (**self).run(ctx)
    }
}
