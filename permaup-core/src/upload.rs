//! Chunk-by-chunk upload driver.
//!
//! A session moves `Created -> InProgress -> Complete`. A failed chunk puts
//! it in `ChunkFailed` without advancing; the next call re-sends the same
//! chunk. Only [`Uploader::upload`] loops and sleeps; `upload_chunk` makes
//! exactly one attempt.

use crate::chunk::{self, ChunkPlan, ChunkSource};
use crate::error::{Error, Result};
use crate::merkle;
use crate::progress::Progress;
use crate::retry::RetryPolicy;
use crate::transport::{ChunkUpload, Transport};
use crate::tx::{Transaction, TxHeader};
use std::io::{Read, Seek};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    InProgress,
    ChunkFailed,
    Complete,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionProgress {
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    /// Truncated integer percentage.
    pub percent: u32,
}

pub struct UploadSession<R> {
    header: TxHeader,
    plan: ChunkPlan,
    hashes: Vec<blake3::Hash>,
    source: ChunkSource<R>,
    total_chunks: u32,
    uploaded_chunks: u32,
    state: SessionState,
    header_posted: bool,
    // bytes of chunk `uploaded_chunks`, kept across network failures
    pending: Option<Vec<u8>>,
    failures: u32,
    rejections: u32,
    last_rejection: Option<String>,
}

impl<R> UploadSession<R> {
    pub fn tx_id(&self) -> &str {
        &self.header.id
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn uploaded_chunks(&self) -> u32 {
        self.uploaded_chunks
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded_chunks == self.total_chunks
    }

    /// Failed attempts on the current chunk since it was last acknowledged.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn progress(&self) -> SessionProgress {
        let percent = (self.uploaded_chunks as u64 * 100 / self.total_chunks as u64) as u32;
        SessionProgress {
            uploaded_chunks: self.uploaded_chunks,
            total_chunks: self.total_chunks,
            percent,
        }
    }

    fn abort(&mut self, reason: String) -> Error {
        self.state = SessionState::Aborted;
        self.pending = None;
        Error::UploadAborted {
            tx_id: self.header.id.clone(),
            attempts: self.failures.max(1),
            reason,
        }
    }
}

pub struct Uploader<'a, T: Transport + ?Sized> {
    transport: &'a T,
    policy: RetryPolicy,
    progress: Option<&'a Progress>,
}

impl<'a, T: Transport + ?Sized> Uploader<'a, T> {
    pub fn new(transport: &'a T, policy: RetryPolicy) -> Self {
        Self { transport, policy, progress: None }
    }

    /// Count uploaded bytes into a run-wide progress tracker.
    pub fn with_progress(mut self, progress: &'a Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a session for a signed transaction. The source must still
    /// match the size and chunking the transaction was built from.
    pub fn new_session<R: Read + Seek>(
        &self,
        tx: &Transaction,
        source: ChunkSource<R>,
    ) -> Result<UploadSession<R>> {
        let header = tx.header()?;
        let content = tx.content();
        if source.size() != content.data_size() {
            return Err(Error::InvalidInput(format!(
                "{}: size changed from {} to {} bytes since signing",
                source.label(),
                content.data_size(),
                source.size()
            )));
        }
        let plan = chunk::plan(source.size(), content.plan.chunk_size)?;
        if plan != content.plan {
            return Err(Error::InvalidInput(format!(
                "{}: chunk plan differs from the signed transaction",
                source.label()
            )));
        }
        let total_chunks = u32::try_from(plan.len())
            .map_err(|_| Error::InvalidInput(format!("{}: too many chunks", source.label())))?;
        debug!(tx_id = %header.id, total_chunks, "upload session created");
        Ok(UploadSession {
            header,
            plan,
            hashes: content.chunk_hashes.clone(),
            source,
            total_chunks,
            uploaded_chunks: 0,
            state: SessionState::Created,
            header_posted: false,
            pending: None,
            failures: 0,
            rejections: 0,
            last_rejection: None,
        })
    }

    /// One attempt at the next chunk (posting the header first if needed).
    pub fn upload_chunk<R: Read + Seek>(
        &self,
        s: &mut UploadSession<R>,
    ) -> Result<SessionProgress> {
        match s.state {
            SessionState::Complete => return Ok(s.progress()),
            SessionState::Aborted => return Err(s.abort("session was aborted".into())),
            _ => {}
        }

        if !s.header_posted {
            if let Err(e) = self.transport.submit_header(&s.header) {
                return Err(self.on_failure(s, e, None));
            }
            s.header_posted = true;
        }

        let idx = s.uploaded_chunks as usize;
        let chunk = s.plan.chunks[idx];
        let data = match s.pending.take() {
            Some(d) => d,
            None => {
                let d = match s.source.read_chunk(&chunk) {
                    Ok(d) => d,
                    Err(e) => return Err(s.abort(format!("re-read chunk {idx}: {e}"))),
                };
                if merkle::leaf(&d) != s.hashes[idx] {
                    return Err(s.abort(format!(
                        "chunk {idx} at offset {} no longer matches the signed data",
                        chunk.offset
                    )));
                }
                d
            }
        };

        let body = ChunkUpload::new(&s.header, chunk.offset, &data);
        match self.transport.upload_chunk(&body) {
            Ok(()) => {
                s.uploaded_chunks += 1;
                s.failures = 0;
                s.rejections = 0;
                s.last_rejection = None;
                s.state = if s.is_complete() {
                    SessionState::Complete
                } else {
                    SessionState::InProgress
                };
                if let Some(p) = self.progress {
                    p.add_bytes(chunk.length as u64);
                }
                let p = s.progress();
                info!(
                    tx_id = %s.header.id,
                    "{}% complete, {}/{}",
                    p.percent,
                    p.uploaded_chunks,
                    p.total_chunks
                );
                Ok(p)
            }
            Err(e) => Err(self.on_failure(s, e, Some(data))),
        }
    }

    fn on_failure<R>(&self, s: &mut UploadSession<R>, err: Error, data: Option<Vec<u8>>) -> Error {
        s.failures += 1;
        match err {
            Error::Network(msg) => {
                s.pending = data;
                if s.header_posted {
                    s.state = SessionState::ChunkFailed;
                }
                Error::Network(msg)
            }
            Error::ServerRejected(reason) => {
                // re-read from the source on the next attempt
                s.pending = None;
                if s.last_rejection.as_deref() == Some(reason.as_str()) {
                    s.rejections += 1;
                } else {
                    s.rejections = 1;
                    s.last_rejection = Some(reason.clone());
                }
                if s.rejections >= self.policy.max_rejections.max(1) {
                    return s.abort(format!(
                        "rejected {} time(s) in a row: {reason}",
                        s.rejections
                    ));
                }
                if s.header_posted {
                    s.state = SessionState::ChunkFailed;
                }
                Error::ServerRejected(reason)
            }
            other => s.abort(other.to_string()),
        }
    }

    /// Drive a whole upload, retrying failed chunks with backoff.
    /// Returns the transaction id.
    pub fn upload<R: Read + Seek>(&self, tx: &Transaction, source: ChunkSource<R>) -> Result<String> {
        let mut s = self.new_session(tx, source)?;
        info!(tx_id = %s.tx_id(), chunks = s.total_chunks(), "uploading");
        while !s.is_complete() {
            match self.upload_chunk(&mut s) {
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    let attempt = s.consecutive_failures();
                    if attempt > self.policy.max_retries {
                        return Err(s.abort(format!("retry budget exhausted: {e}")));
                    }
                    let delay = self.policy.delay(attempt - 1);
                    warn!(
                        tx_id = %s.tx_id(),
                        chunk = s.uploaded_chunks(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "chunk failed, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(s.tx_id().to_string())
    }
}
