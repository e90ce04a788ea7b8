//! periodic sampling
//!
//! runs on every poll tick that saw no inbound data. a datapoint fires once
//! more than `sampleRate` seconds have passed since its last attempt, and its
//! clock restarts whether or not anything could be sent, so a failing sensor
//! is retried one period later instead of on every tick.

use crate::protocol::data_message;
use crate::state::AgentState;

impl AgentState {
    /// sample every due datapoint, returning the data messages to send
    pub async fn run_due_samples(&mut self, now_ms: u64) -> Vec<String> {
        let mut out = Vec::new();
        for index in self.registry.due(now_ms) {
            let Some(entry) = self.registry.get(index) else { continue };
            let datapoint = entry.datapoint.clone();
            self.registry.mark_sampled(index, now_ms);

            let Some(id) = datapoint.id else {
                tracing::debug!("datapoint {:?} waits for registration", datapoint.name());
                continue;
            };
            match self.take_reading(&datapoint).await {
                Ok(reading) => match data_message(id, now_ms, &reading) {
                    Some(msg) => out.push(msg),
                    None => tracing::warn!("datapoint {}: {:?} can not be sent", id, reading),
                },
                Err(e) => tracing::warn!("datapoint {}: {}", id, e),
            }
        }
        out
    }
}
