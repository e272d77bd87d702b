//! Manifest pipeline: read rows, upload what is missing, write rows back in order.

use crate::chunk::{ChunkSource, DEFAULT_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::manifest::{ManifestReader, ManifestRow, ManifestWriter};
use crate::path_safety::{resolve_upload_file, PathPolicy};
use crate::progress::Progress;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::tx::{ipfs_link, ContentRef, Tags, Transaction};
use crate::upload::Uploader;
use crate::wallet::Wallet;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub upload_dir: PathBuf,
    pub chunk_size: u32,
    pub retry: RetryPolicy,
    /// Look up an existing upload by IPFS tags before uploading.
    pub check_remote: bool,
    /// Rows processed at once; 1 keeps everything sequential.
    pub jobs: usize,
    pub path_policy: PathPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("upload"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            check_remote: false,
            jobs: 1,
            path_policy: PathPolicy::default(),
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
    AlreadyUploaded { ar_hash: String },
    Uploaded { ar_hash: String },
    FoundRemote { ar_hash: String },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Serialize, Clone, Debug)]
pub struct RowOutcome {
    pub line: u64,
    pub filename: Option<String>,
    #[serde(flatten)]
    pub status: RowStatus,
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct RunReport {
    pub created_utc: String,
    pub input: String,
    pub output: String,
    pub rows: usize,
    pub uploaded: usize,
    pub found_remote: usize,
    pub already_uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<RowOutcome>,
}

impl RunReport {
    fn record(&mut self, outcome: RowOutcome) {
        self.rows += 1;
        match outcome.status {
            RowStatus::AlreadyUploaded { .. } => self.already_uploaded += 1,
            RowStatus::Uploaded { .. } => self.uploaded += 1,
            RowStatus::FoundRemote { .. } => self.found_remote += 1,
            RowStatus::Skipped { .. } => self.skipped += 1,
            RowStatus::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let f = File::create(path)?;
        serde_json::to_writer_pretty(f, self)?;
        Ok(())
    }
}

pub struct Pipeline<'a, T: Transport + Sync + ?Sized> {
    wallet: &'a Wallet,
    transport: &'a T,
    cfg: PipelineConfig,
    progress: Progress,
}

impl<'a, T: Transport + Sync + ?Sized> Pipeline<'a, T> {
    pub fn new(wallet: &'a Wallet, transport: &'a T, cfg: PipelineConfig) -> Self {
        Self { wallet, transport, cfg, progress: Progress::new(false) }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Process `input` into `output`, one window of `jobs` rows at a time.
    /// Only a missing or unreadable input manifest (or an unwritable output)
    /// fails the run; row failures are logged and the row is written without
    /// an id.
    pub fn run(&self, input: &Path, output: &Path) -> Result<RunReport> {
        let mut reader = ManifestReader::open(input)?;
        let total = ManifestReader::count_rows(input)?;
        let mut writer = ManifestWriter::create(output, reader.columns())?;
        info!(input = %input.display(), output = %output.display(), rows = total, "processing manifest");

        let mut report = RunReport {
            created_utc: chrono::Utc::now().to_rfc3339(),
            input: input.display().to_string(),
            output: output.display().to_string(),
            ..RunReport::default()
        };
        self.progress.set_rows_total(total);
        self.progress.set_stage("uploading");

        let jobs = self.cfg.jobs.max(1);
        let pool = if jobs > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs)
                    .build()
                    .map_err(|e| Error::InvalidInput(format!("worker pool: {e}")))?,
            )
        } else {
            None
        };

        loop {
            let mut window: Vec<ManifestRow> = reader.by_ref().take(jobs).collect::<Result<_>>()?;
            if window.is_empty() {
                break;
            }
            let statuses: Vec<RowStatus> = match &pool {
                Some(pool) => {
                    pool.install(|| window.par_iter_mut().map(|row| self.process_row(row)).collect())
                }
                None => window.iter_mut().map(|row| self.process_row(row)).collect(),
            };
            // written in input order, one flush per row
            for (row, status) in window.iter().zip(statuses) {
                writer.write_row(row)?;
                self.progress.inc_row();
                report.record(RowOutcome {
                    line: row.line,
                    filename: row.filename().map(str::to_string),
                    status,
                });
            }
        }
        self.progress.set_stage("done");
        info!(
            uploaded = report.uploaded,
            found_remote = report.found_remote,
            already_uploaded = report.already_uploaded,
            skipped = report.skipped,
            failed = report.failed,
            "manifest processed"
        );
        Ok(report)
    }

    /// Decide what to do with one row and do it. Sets `arHash` on success.
    pub fn process_row(&self, row: &mut ManifestRow) -> RowStatus {
        if let Some(reason) = row.invalid() {
            error!("{reason}; row written back unchanged");
            return RowStatus::Skipped { reason: reason.to_string() };
        }
        if let Some(existing) = row.ar_hash() {
            info!("{} - {}", row.filename().unwrap_or(""), existing);
            return RowStatus::AlreadyUploaded { ar_hash: existing.to_string() };
        }
        let Some(filename) = row.filename().map(str::to_string) else {
            let e = Error::InvalidInput(format!("line {}: filename should not be empty", row.line));
            error!("{e}");
            return RowStatus::Skipped { reason: e.to_string() };
        };
        let path = match resolve_upload_file(&self.cfg.upload_dir, &filename, self.cfg.path_policy) {
            Ok(p) => p,
            Err(e) => {
                error!(line = row.line, "upload file skipped: {e}");
                return RowStatus::Skipped { reason: e.to_string() };
            }
        };
        let ipfs = row.ipfs().map(str::to_string);

        if self.cfg.check_remote {
            if let Some(id) = self.find_remote(ipfs.as_deref()) {
                info!(filename = %filename, ipfs = ipfs.as_deref().unwrap_or(""), "already on the network as {id}");
                return match row.set_ar_hash(&id) {
                    Ok(()) => RowStatus::FoundRemote { ar_hash: id },
                    Err(e) => RowStatus::Failed { reason: e.to_string() },
                };
            }
        }

        match self.upload_file(&path, ipfs.as_deref()) {
            Ok(id) => match row.set_ar_hash(&id) {
                Ok(()) => {
                    info!("- {} {}", filename, id);
                    RowStatus::Uploaded { ar_hash: id }
                }
                Err(e) => RowStatus::Failed { reason: e.to_string() },
            },
            Err(e) => {
                error!(filename = %filename, "upload failed: {e}");
                RowStatus::Failed { reason: e.to_string() }
            }
        }
    }

    fn find_remote(&self, ipfs: Option<&str>) -> Option<String> {
        let ipfs = ipfs?;
        match self.transport.find_by_tags(&ipfs_link(ipfs)) {
            Ok(found) => found,
            Err(e) => {
                warn!(ipfs, "remote lookup failed, uploading anyway: {e}");
                None
            }
        }
    }

    /// Build, sign and upload one file; returns the transaction id.
    pub fn upload_file(&self, path: &Path, ipfs: Option<&str>) -> Result<String> {
        let mut source = ChunkSource::open(path)?;
        let mime = mime_guess::from_path(path).first_raw();
        if mime.is_none() {
            warn!(file = %path.display(), "cannot guess MIME type, tagging as application/octet-stream");
        }
        let content = ContentRef::from_source(&mut source, self.cfg.chunk_size)?;
        let tx = Transaction::build(self.wallet, Tags::for_upload(mime, ipfs), content)
            .sign(self.wallet)?;
        Uploader::new(self.transport, self.cfg.retry)
            .with_progress(&self.progress)
            .upload(&tx, source)
    }
}
