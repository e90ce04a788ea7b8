//! ==============================================================================
//! framing.rs - message boundaries on the upstream byte stream
//! ==============================================================================
//!
//! ```text
//! the management service sends bare JSON texts with no length prefix or
//! delimiter. a message is considered complete when a read returns fewer
//! bytes than there was room for: the sender's burst is over.
//!
//! the buffer starts at INITIAL_BUFFER_SIZE and doubles whenever a read
//! fills it, keeping what was already read. after a burst is handed out the
//! buffer is reused from the start. a burst that lands exactly on the
//! buffer size has no short read to end it; the session collects it with
//! take_pending once a poll interval passes without more bytes.
//! ```
//!
//! ==============================================================================

use crate::error::{AgentError, Result};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const INITIAL_BUFFER_SIZE: usize = 1024;

pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, INITIAL_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self { reader, buf: vec![0; capacity.max(1)], pos: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// read until the end of the current burst
    ///
    /// cancel safe: progress lives in `self`, so a burst interrupted by a
    /// timeout resumes where it stopped on the next call.
    pub async fn read_burst(&mut self) -> Result<Vec<u8>> {
        loop {
            if self.pos == self.buf.len() {
                let grown = self.buf.len() * 2;
                self.buf.resize(grown, 0);
                tracing::debug!("receive buffer grown to {} bytes", grown);
            }
            let room = self.buf.len() - self.pos;
            let n = self.reader.read(&mut self.buf[self.pos..]).await?;
            if n == 0 && self.pos == 0 {
                return Err(AgentError::ConnectionClosed);
            }
            self.pos += n;
            if n < room {
                break;
            }
        }
        Ok(self.drain())
    }

    /// hand out a burst that exactly filled the buffer
    ///
    /// such a burst has no short read to end it, so `read_burst` keeps
    /// waiting for more. once the line has gone quiet for a poll interval the
    /// bytes gathered so far are the whole message.
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        (self.pos > 0).then(|| self.drain())
    }

    fn drain(&mut self) -> Vec<u8> {
        let burst = self.buf[..self.pos].to_vec();
        self.pos = 0;
        burst
    }
}

/// decode the JSON texts in a burst, in order
///
/// a burst normally holds exactly one message. anything that does not parse
/// ends the list with an error entry.
pub fn split_messages(burst: &[u8]) -> Vec<std::result::Result<Value, serde_json::Error>> {
    let mut out = Vec::new();
    for item in serde_json::Deserializer::from_slice(burst).into_iter::<Value>() {
        let failed = item.is_err();
        out.push(item);
        if failed {
            break;
        }
    }
    out
}
