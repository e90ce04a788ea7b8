//! ==============================================================================
//! session.rs - the upstream connection and the main loop
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     owns the single connection to the management service and drives the
//!     cooperative loop:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │ while running                                                │
//!     │   wait up to poll_interval for inbound bytes                 │
//!     │   ├── burst received -> dispatcher -> replies sent           │
//!     │   └── timed out      -> buffered burst, if any -> dispatcher │
//!     │                      -> scheduler  -> data messages sent     │
//!     └──────────────────────────────────────────────────────────────┘
//!
//!     a request is fully handled (registry changed, config written, reply
//!     sent) before the next wait starts. uploads run on their own tasks and
//!     never hold up the loop.
//!
//! shutdown:
//!     the running flag is checked at the top of every iteration, so an
//!     interrupt lets the current iteration finish. in-flight uploads are
//!     neither awaited nor cancelled.
//! ```
//!
//! ==============================================================================

use crate::domain::now_ms;
use crate::error::{AgentError, Result};
use crate::framing::FrameReader;
use crate::state::AgentState;

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// open the upstream connection: one attempt, then a single retry
pub async fn connect(addr: &str, reconnect_delay: Duration) -> Result<TcpStream> {
    match TcpStream::connect(addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            tracing::warn!("Can not connect to {}: {}, retrying in {:?}", addr, e, reconnect_delay);
            tokio::time::sleep(reconnect_delay).await;
            TcpStream::connect(addr)
                .await
                .map_err(|source| AgentError::Connect { addr: addr.to_string(), source })
        }
    }
}

pub struct Session<R, W> {
    state: AgentState,
    frames: FrameReader<R>,
    writer: W,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    show_sensor_data: bool,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(state: AgentState, reader: R, writer: W, running: Arc<AtomicBool>) -> Self {
        Self {
            state,
            frames: FrameReader::new(reader),
            writer,
            running,
            poll_interval: Duration::from_millis(10),
            show_sensor_data: true,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_sensor_data = show;
        self
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// announce our datapoints; the answer is picked up by the main loop
    pub async fn register(&mut self) -> Result<()> {
        let msg = self.state.registration_message();
        tracing::info!(
            "registering {} datapoint(s) with the management service",
            self.state.registry().len()
        );
        self.send_value(&msg).await
    }

    /// register, then loop until the running flag drops or the session fails
    pub async fn run(&mut self) -> Result<()> {
        self.register().await?;
        tracing::info!("sensor app successfully connected to agent");
        while self.running.load(Ordering::SeqCst) {
            self.tick().await?;
        }
        tracing::info!("session stopped");
        Ok(())
    }

    /// one poll iteration
    pub async fn tick(&mut self) -> Result<()> {
        match tokio::time::timeout(self.poll_interval, self.frames.read_burst()).await {
            Ok(burst) => self.dispatch(&burst?).await?,
            Err(_idle) => {
                if let Some(burst) = self.frames.take_pending() {
                    self.dispatch(&burst).await?;
                }
                for msg in self.state.run_due_samples(now_ms()).await {
                    if self.show_sensor_data {
                        tracing::info!("sending server data msg: {}", msg);
                    }
                    self.send_text(&msg).await?;
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, burst: &[u8]) -> Result<()> {
        for reply in self.state.handle_burst(burst).await {
            self.send_value(&reply).await?;
        }
        Ok(())
    }

    async fn send_value(&mut self, msg: &Value) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        tracing::debug!("sending: {}", text);
        self.send_text(&text).await
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await.map_err(AgentError::Send)?;
        self.writer.flush().await.map_err(AgentError::Send)
    }
}
