//! ==============================================================================
//! state.rs - everything a session mutates
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     one explicit object in place of process globals: the configuration
//!     document, the datapoint registry, the injected sampler and the upload
//!     queue. the dispatcher (dispatcher.rs) and the scheduler (scheduler.rs)
//!     are methods on it, so both see the same registry and only the main
//!     loop ever writes to it.
//!
//! relationships:
//!     - owned by: session.rs
//!     - extended by: dispatcher.rs, scheduler.rs
//!     - uses: sampler.rs (values), upload.rs (file samples)
//! ```
//!
//! ==============================================================================

use crate::config::{AgentConfig, ConfigStore};
use crate::domain::{now_ms, DataType, Datapoint, Sample};
use crate::error::{AgentError, Result};
use crate::protocol::{self, Reading};
use crate::registry::Registry;
use crate::sampler::{sample_blocking, Sampler};
use crate::upload::{remote_name, UploadTarget, Uploader};

use serde_json::Value;
use std::sync::Arc;

pub struct AgentState {
    /// the document minus its datapoints, which live in `registry`
    pub(crate) config: AgentConfig,
    pub(crate) store: ConfigStore,
    pub(crate) registry: Registry,
    pub(crate) sampler: Arc<dyn Sampler>,
    pub(crate) uploader: Uploader,
    pub(crate) upload_target: UploadTarget,
    /// id of our registration request until its answer arrives
    pub(crate) pending_registration: Option<i64>,
}

impl AgentState {
    /// take over `config`; every datapoint starts its sampling clock now
    pub fn new(mut config: AgentConfig, store: ConfigStore, sampler: Arc<dyn Sampler>, uploader: Uploader) -> Self {
        let datapoints = std::mem::take(&mut config.datapoints);
        let upload_target = config.upload_target();
        Self {
            config,
            store,
            registry: Registry::new(datapoints, now_ms()),
            sampler,
            uploader,
            upload_target,
            pending_registration: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// the full document as it would be written to disk
    pub fn document(&self) -> AgentConfig {
        let mut doc = self.config.clone();
        doc.datapoints = self.registry.datapoints();
        doc
    }

    /// rewrite the configuration file; a failed write is logged, not fatal
    pub fn persist(&self) {
        if let Err(e) = self.store.save(&self.document()) {
            tracing::error!("failed to write {}: {}", self.store.path().display(), e);
        }
    }

    /// the registration request; arms the matching response handler
    pub fn registration_message(&mut self) -> Value {
        self.pending_registration = Some(protocol::REGISTRATION_MSG_ID);
        protocol::registration_message(&self.registry, self.config.app_name.as_deref())
    }

    /// sample one datapoint and turn the result into something reportable
    ///
    /// file samples are handed to the upload queue here; the returned name is
    /// reported before the upload has finished.
    pub(crate) async fn take_reading(&self, datapoint: &Datapoint) -> Result<Reading> {
        let id = datapoint
            .id
            .ok_or_else(|| AgentError::Sample(format!("datapoint {:?} is not registered", datapoint.name())))?;
        let expected = datapoint
            .data_type()
            .ok_or_else(|| AgentError::Sample(format!("datapoint {} has no usable dataType", id)))?;

        let sample = sample_blocking(self.sampler.clone(), datapoint.clone())
            .await
            .map_err(|e| AgentError::Sample(format!("{:#}", e)))?;

        match (expected, sample) {
            (DataType::Numeric, Sample::Numeric(v)) => Ok(Reading::Numeric(v)),
            (DataType::File, Sample::File(path)) => {
                let name = remote_name(&path);
                let handoff = self.upload_target.job(id, path.clone()).and_then(|job| self.uploader.submit(job));
                if let Err(e) = handoff {
                    discard(&path);
                    return Err(e);
                }
                Ok(Reading::FileName(name))
            }
            (_, Sample::File(path)) => {
                discard(&path);
                Err(AgentError::Sample(format!("datapoint {} produced a file, expected a number", id)))
            }
            (_, Sample::Numeric(_)) => Err(AgentError::Sample(format!(
                "datapoint {} produced a number, expected a file",
                id
            ))),
        }
    }
}

fn discard(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!("could not remove {}: {}", path.display(), e);
    }
}

// ==============================================================================
// test fixtures shared by dispatcher / scheduler / session tests
// ==============================================================================
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// numbers by datapoint name; "image" writes a file into `dir`
    pub struct FakeSampler {
        pub values: HashMap<String, f64>,
        pub dir: PathBuf,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeSampler {
        pub fn new(dir: &std::path::Path) -> Self {
            Self { values: HashMap::new(), dir: dir.to_path_buf(), calls: Mutex::new(Vec::new()) }
        }

        pub fn with(mut self, name: &str, value: f64) -> Self {
            self.values.insert(name.to_string(), value);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Sampler for FakeSampler {
        fn sample(&self, datapoint: &Datapoint) -> anyhow::Result<Sample> {
            self.calls.lock().unwrap().push(datapoint.name().to_string());
            if datapoint.name() == "image" {
                let file = self.dir.join("image_1.jpg");
                std::fs::write(&file, b"jpg")?;
                return Ok(Sample::File(file));
            }
            self.values
                .get(datapoint.name())
                .copied()
                .map(Sample::Numeric)
                .ok_or_else(|| anyhow::anyhow!("no value for {}", datapoint.name()))
        }
    }

    /// uploads go to a closed port, one attempt each
    pub fn dead_upload_target() -> UploadTarget {
        UploadTarget {
            host: "127.0.0.1".into(),
            port: 9,
            api: "/api/file/personal".into(),
            api_key: "k".into(),
            retries: 1,
        }
    }

    /// a state backed by a config file in `dir`
    pub fn state(dir: &std::path::Path, doc: Value, sampler: Arc<dyn Sampler>) -> AgentState {
        let path = dir.join("sensor-app.json");
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();
        let store = ConfigStore::new(&path);
        let config = store.load().unwrap();
        let mut state = AgentState::new(config, store, sampler, Uploader::spawn(reqwest::Client::new()));
        state.upload_target = dead_upload_target();
        state
    }

    pub fn on_disk(state: &AgentState) -> Value {
        serde_json::from_str(&std::fs::read_to_string(state.store.path()).unwrap()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "host": "127.0.0.1",
            "port": 1,
            "appName": "test",
            "datapoints": [
                {"id": 7, "props": {"name": "t1", "dataType": "numeric", "sampleRate": 5}},
                {"id": 8, "props": {"name": "image", "dataType": "file", "sampleRate": 5}},
                {"id": 9, "props": {"name": "t1", "dataType": "file", "sampleRate": 5}},
                {"props": {"name": "t1", "dataType": "numeric", "sampleRate": 5}}
            ]
        })
    }

    #[tokio::test]
    async fn test_take_reading_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), doc(), Arc::new(FakeSampler::new(dir.path()).with("t1", 3.5)));
        let dp = state.registry.get(0).unwrap().datapoint.clone();
        assert_eq!(state.take_reading(&dp).await.unwrap(), Reading::Numeric(3.5));
    }

    #[tokio::test]
    async fn test_take_reading_file_reports_name() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), doc(), Arc::new(FakeSampler::new(dir.path())));
        let dp = state.registry.get(1).unwrap().datapoint.clone();
        assert_eq!(state.take_reading(&dp).await.unwrap(), Reading::FileName("image_1.jpg".into()));
    }

    #[tokio::test]
    async fn test_take_reading_type_mismatch_and_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), doc(), Arc::new(FakeSampler::new(dir.path()).with("t1", 1.0)));
        let mismatched = state.registry.get(2).unwrap().datapoint.clone();
        assert!(matches!(state.take_reading(&mismatched).await, Err(AgentError::Sample(_))));
        let unregistered = state.registry.get(3).unwrap().datapoint.clone();
        assert!(matches!(state.take_reading(&unregistered).await, Err(AgentError::Sample(_))));
    }

    #[tokio::test]
    async fn test_document_round_trips_registry() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), doc(), Arc::new(FakeSampler::new(dir.path())));
        assert!(state.config().datapoints.is_empty());
        let written = state.document();
        assert_eq!(written.datapoints.len(), 4);
        state.persist();
        assert_eq!(on_disk(&state)["datapoints"][0]["id"], json!(7));
    }

    #[tokio::test]
    async fn test_registration_arms_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(dir.path(), doc(), Arc::new(FakeSampler::new(dir.path())));
        assert_eq!(state.pending_registration, None);
        let msg = state.registration_message();
        assert_eq!(msg["params"]["Managed"], json!([7, 8, 9]));
        assert_eq!(state.pending_registration, Some(1));
    }
}
