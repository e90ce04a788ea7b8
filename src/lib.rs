//! sensor-agent - device-side bridge between local sensors and a remote
//! management service.
//!
//! one TCP connection carries a small JSON-RPC-like protocol: the agent
//! registers its datapoints, answers set/getData/add/del requests and pushes
//! samples on each datapoint's own schedule. file samples are uploaded to a
//! cloud store over HTTP on detached tasks.

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod fieldbus;
pub mod framing;
pub mod hal;
pub mod protocol;
pub mod registry;
pub mod sampler;
pub mod scheduler;
pub mod sensors;
pub mod session;
pub mod state;
pub mod upload;

pub use config::{AgentConfig, AgentSettings, ConfigStore, SensorDriver};
pub use domain::{DataType, Datapoint, DatapointId, Sample};
pub use error::{AgentError, Result};
pub use sampler::Sampler;
pub use session::Session;
pub use state::AgentState;
