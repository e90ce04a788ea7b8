//! ==============================================================================
//! upload.rs - detached file upload worker
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     moves a sampled file (e.g. a webcam image) to the cloud file store with
//!     an HTTP PUT, off the main loop.
//!
//! behaviour:
//!     - jobs go through an unbounded queue; every job becomes its own task.
//!       no pool, no backpressure.
//!     - each job owns copies of everything it needs (path, url, retries),
//!       it never looks at the live registry.
//!     - success is a "204 No Content" answer. anything else, or a transport
//!       error, is retried until the retry budget is spent.
//!     - the local file is deleted once the job ends, whatever the outcome.
//!     - the outcome is only logged. the caller already reported the file
//!       name upstream when it handed the job over.
//! ```
//!
//! ==============================================================================

use crate::domain::DatapointId;
use crate::error::{AgentError, Result};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// where uploads go, resolved from the configuration document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub host: String,
    pub port: u16,
    /// base path, the datapoint id and file name are appended
    pub api: String,
    pub api_key: String,
    pub retries: u32,
}

impl UploadTarget {
    /// `http://<host>:<port><api>/<id>/<file name>?apiKey=<key>`
    pub fn url_for(&self, id: DatapointId, file: &Path) -> Result<Url> {
        let base = format!("http://{}:{}{}", self.host, self.port, self.api);
        let mut url = Url::parse(&base).map_err(|e| AgentError::Upload(format!("bad upload url {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| AgentError::Upload(format!("bad upload url {}", base)))?
            .pop_if_empty()
            .push(&id.to_string())
            .push(&remote_name(file));
        url.query_pairs_mut().append_pair("apiKey", &self.api_key);
        Ok(url)
    }

    pub fn job(&self, id: DatapointId, file: PathBuf) -> Result<UploadJob> {
        let url = self.url_for(id, &file)?;
        Ok(UploadJob { local_file: file, url, retries: self.retries })
    }
}

/// the name the uploaded file is visible under remotely
pub fn remote_name(file: &Path) -> String {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string_lossy().into_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub local_file: PathBuf,
    pub url: Url,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Delivered { attempts: u32 },
    Abandoned { attempts: u32 },
    Unreadable,
}

/// handle to the upload queue
#[derive(Clone)]
pub struct Uploader {
    tx: mpsc::UnboundedSender<UploadJob>,
}

impl Uploader {
    /// start the queue consumer; must be called inside a tokio runtime
    pub fn spawn(client: Client) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<UploadJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let client = client.clone();
                tokio::spawn(async move {
                    run_upload(&client, job).await;
                });
            }
        });
        Self { tx }
    }

    /// hand a job over; Ok means it was accepted, not that it will succeed
    pub fn submit(&self, job: UploadJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|e| AgentError::Upload(format!("upload queue closed, dropping {}", e.0.local_file.display())))
    }
}

/// run one upload job to completion
pub async fn run_upload(client: &Client, job: UploadJob) -> UploadOutcome {
    let outcome = match tokio::fs::read(&job.local_file).await {
        Ok(body) => put_with_retries(client, &job, body).await,
        Err(e) => {
            tracing::warn!("fail to read file {}: {}", job.local_file.display(), e);
            UploadOutcome::Unreadable
        }
    };

    if let Err(e) = tokio::fs::remove_file(&job.local_file).await {
        tracing::debug!("could not remove {}: {}", job.local_file.display(), e);
    }

    match outcome {
        UploadOutcome::Delivered { attempts } => {
            tracing::info!("uploaded {} ({} attempt(s))", job.local_file.display(), attempts)
        }
        UploadOutcome::Abandoned { attempts } => {
            tracing::warn!("giving up on {} after {} attempt(s)", job.local_file.display(), attempts)
        }
        UploadOutcome::Unreadable => {}
    }
    tracing::info!("--- finished file upload ---");
    outcome
}

async fn put_with_retries(client: &Client, job: &UploadJob, body: Vec<u8>) -> UploadOutcome {
    let mut attempts = 0;
    while attempts < job.retries {
        attempts += 1;
        let res = client
            .put(job.url.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body.clone())
            .send()
            .await;
        match res {
            Ok(resp) if resp.status() == StatusCode::NO_CONTENT => {
                return UploadOutcome::Delivered { attempts };
            }
            Ok(resp) => {
                tracing::warn!("upload attempt {} to {} answered {}", attempts, job.url, resp.status());
            }
            Err(e) => {
                tracing::warn!("upload attempt {} to {} failed: {}", attempts, job.url, e);
            }
        }
    }
    UploadOutcome::Abandoned { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn target(port: u16, retries: u32) -> UploadTarget {
        UploadTarget {
            host: "127.0.0.1".into(),
            port,
            api: "/api/file/personal".into(),
            api_key: "k3y".into(),
            retries,
        }
    }

    /// answers each connection with the next status line, returns the raw requests
    async fn http_stub(statuses: Vec<&'static str>) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for status in statuses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut raw = Vec::new();
                let mut buf = [0u8; 1024];
                // headers
                let head_end = loop {
                    let n = sock.read(&mut buf).await.unwrap();
                    assert!(n > 0, "client hung up early");
                    raw.extend_from_slice(&buf[..n]);
                    if let Some(p) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                        break p + 4;
                    }
                };
                let head = String::from_utf8_lossy(&raw[..head_end]).to_string();
                let len: usize = head
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse().ok())?
                    })
                    .unwrap_or(0);
                while raw.len() < head_end + len {
                    let n = sock.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    raw.extend_from_slice(&buf[..n]);
                }
                requests.push(String::from_utf8_lossy(&raw).to_string());
                let resp = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
                sock.write_all(resp.as_bytes()).await.unwrap();
                sock.shutdown().await.ok();
            }
            requests
        });
        (port, handle)
    }

    #[test]
    fn test_url_building() {
        let t = target(8080, 5);
        let url = t.url_for(DatapointId(7), Path::new("/tmp/cam/image_1.jpg")).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/file/personal/7/image_1.jpg?apiKey=k3y");

        let mut t = target(80, 5);
        t.api = "/v2/".into();
        let url = t.url_for(DatapointId(1), Path::new("a b.jpg")).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1/v2/1/a%20b.jpg?apiKey=k3y");
    }

    #[test]
    fn test_remote_name() {
        assert_eq!(remote_name(Path::new("/var/lib/agent/image_9")), "image_9");
        assert_eq!(remote_name(Path::new("image_9.jpg")), "image_9.jpg");
    }

    #[tokio::test]
    async fn test_delivered_on_204_and_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("image_1");
        std::fs::write(&file, b"abc").unwrap();

        let (port, server) = http_stub(vec!["204 No Content"]).await;
        let job = target(port, 5).job(DatapointId(7), file.clone()).unwrap();
        let outcome = run_upload(&Client::new(), job).await;

        assert_eq!(outcome, UploadOutcome::Delivered { attempts: 1 });
        assert!(!file.exists());
        let requests = server.await.unwrap();
        let req = &requests[0];
        assert!(req.starts_with("PUT /api/file/personal/7/image_1?apiKey=k3y HTTP/1.1\r\n"));
        assert!(req.to_ascii_lowercase().contains("content-type: application/octet-stream"));
        assert!(req.to_ascii_lowercase().contains("content-length: 3"));
        assert!(req.ends_with("abc"));
    }

    #[tokio::test]
    async fn test_retries_until_204() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("image_2");
        std::fs::write(&file, b"xyz").unwrap();

        let (port, server) = http_stub(vec!["500 Internal Server Error", "204 No Content"]).await;
        let job = target(port, 5).job(DatapointId(3), file.clone()).unwrap();
        let outcome = run_upload(&Client::new(), job).await;

        assert_eq!(outcome, UploadOutcome::Delivered { attempts: 2 });
        assert_eq!(server.await.unwrap().len(), 2);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_abandoned_after_retries_still_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("image_3");
        std::fs::write(&file, b"data").unwrap();

        // grab a free port and close it so every connect is refused
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let job = target(port, 2).job(DatapointId(3), file.clone()).unwrap();
        let outcome = run_upload(&Client::new(), job).await;

        assert_eq!(outcome, UploadOutcome::Abandoned { attempts: 2 });
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let job = target(1, 5).job(DatapointId(3), dir.path().join("missing")).unwrap();
        assert_eq!(run_upload(&Client::new(), job).await, UploadOutcome::Unreadable);
    }

    #[tokio::test]
    async fn test_queue_runs_jobs_detached() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("image_4");
        std::fs::write(&file, b"q").unwrap();

        let (port, server) = http_stub(vec!["204 No Content"]).await;
        let uploader = Uploader::spawn(Client::new());
        uploader.submit(target(port, 1).job(DatapointId(5), file.clone()).unwrap()).unwrap();

        server.await.unwrap();
        for _ in 0..100 {
            if !file.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!file.exists());
    }
}
