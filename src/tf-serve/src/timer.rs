use chrono::{DateTime, Utc};
use log::info;

/// Wall-clock timer for one stage of the pipeline, feeding `Timings`.
///
/// Logs when the stage starts and how long it took when it stops.
#[must_use = "a timer only reports when stopped"]
pub struct Timer {
    stage: String,
    started: DateTime<Utc>,
}

impl Timer {
    pub fn start(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        info!("{}: starting", stage);

        Timer {
            stage,
            started: Utc::now(),
        }
    }

    /// Stop the timer and return the elapsed milliseconds.
    pub fn stop(self) -> i64 {
        let msec = (Utc::now() - self.started).num_milliseconds().max(0);
        info!("{} duration: {} msec", self.stage, msec);
        msec
    }
}
