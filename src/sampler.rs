//! the sampling capability injected into a session
//!
//! the agent knows nothing about the hardware behind a datapoint. it hands
//! the datapoint's properties to a `Sampler` and gets back a value or a
//! failure. calls are blocking and run on tokio's blocking pool.

use crate::domain::{Datapoint, Sample};

use std::sync::Arc;

pub trait Sampler: Send + Sync + 'static {
    fn sample(&self, datapoint: &Datapoint) -> anyhow::Result<Sample>;
}

/// run a sampler off the async threads
pub async fn sample_blocking(sampler: Arc<dyn Sampler>, datapoint: Datapoint) -> anyhow::Result<Sample> {
    tokio::task::spawn_blocking(move || sampler.sample(&datapoint))
        .await
        .map_err(|e| anyhow::anyhow!("task join error: {}", e))?
}
