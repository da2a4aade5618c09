//! Localization pipeline definition.
//!
//! Stages run in a fixed order on the scheduler's worker thread. This module
//! defines the stage interface, progress reporting and the stand-in stages
//! used for dry runs and tests.

pub mod dry_run;
pub mod mock;
pub mod progress;
pub mod stage;

pub use dry_run::{DryRunStage, dry_run_stages};
pub use mock::{MockCall, MockStage};
pub use progress::{
    ChannelSink, CollectorSink, EventSink, FanOutSink, LogSink, ProgressSink, SchedulerEvent,
    item_progress_percent,
};
pub use stage::{
    CancelToken, Stage, StageContext, StageName, StageOutcome, validate_stage_order,
};
