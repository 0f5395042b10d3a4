use std::sync::Arc;
use std::time::Duration;

use crate::idle::IdleSpeaker;
use crate::scheduler::Scheduler;

/// Tick the idle speaker on its configured interval
pub async fn register_idle_speaker(
    scheduler: &Scheduler,
    speaker: Arc<IdleSpeaker>,
    interval: Duration,
) -> anyhow::Result<()> {
    scheduler
        .every(interval, "idle-speaker", move || {
            let speaker = speaker.clone();
            async move {
                speaker.tick().await;
            }
        })
        .await
}
