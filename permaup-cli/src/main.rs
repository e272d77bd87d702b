use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use permaup_core::chunk::{ChunkSource, DEFAULT_CHUNK_SIZE};
use permaup_core::manifest::default_output_path;
use permaup_core::pipeline::{Pipeline, PipelineConfig, RunReport};
use permaup_core::progress::Progress;
use permaup_core::retry::RetryPolicy;
use permaup_core::transport::{HttpTransport, DEFAULT_GATEWAY};
use permaup_core::tx::ContentRef;
use permaup_core::wallet::Wallet;

#[derive(Parser)]
#[command(name = "permaup", version, about = "Upload manifest files to permanent storage")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Upload every pending row of a manifest and write the output manifest
    Upload {
        #[arg(long, env = "INPUT_FILE", default_value = "list.csv")]
        input: PathBuf,
        /// Defaults to output-<input file name>
        #[arg(long, env = "OUTPUT_FILE")]
        output: Option<PathBuf>,
        #[arg(long, env = "UPLOAD_DIR", default_value = "upload")]
        upload_dir: PathBuf,
        #[arg(long, env = "WALLET_FILE", default_value = "jwk.json")]
        wallet: PathBuf,
        #[arg(long, env = "GATEWAY_URL", default_value = DEFAULT_GATEWAY)]
        gateway: String,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE,
              value_parser = clap::value_parser!(u32).range(1..))]
        chunk_size: u32,
        #[arg(long, default_value_t = 5)]
        max_retries: u32,
        #[arg(long, default_value_t = 3)]
        max_rejections: u32,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        #[arg(long, default_value_t = 1)]
        jobs: usize,
        /// Reuse an existing upload tagged with the row's IPFS id
        #[arg(long, default_value_t = false)]
        check_remote: bool,
        #[arg(long, default_value_t = false)]
        progress: bool,
        /// Write a JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the chunk plan and data root of a file
    Plan {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE,
              value_parser = clap::value_parser!(u32).range(1..))]
        chunk_size: u32,
    },
    /// Print the address of a wallet key file
    Address {
        #[arg(long, env = "WALLET_FILE", default_value = "jwk.json")]
        wallet: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Upload {
            input,
            output,
            upload_dir,
            wallet,
            gateway,
            chunk_size,
            max_retries,
            max_rejections,
            timeout_secs,
            jobs,
            check_remote,
            progress,
            report,
        } => {
            let cfg = PipelineConfig {
                upload_dir,
                chunk_size,
                retry: RetryPolicy { max_retries, max_rejections, ..RetryPolicy::default() },
                check_remote,
                jobs,
                ..PipelineConfig::default()
            };
            let output = output.unwrap_or_else(|| default_output_path(&input));
            let opts = UploadOpts {
                wallet: &wallet,
                gateway: &gateway,
                timeout: Duration::from_secs(timeout_secs),
                progress,
                report: report.as_deref(),
            };
            upload(&input, &output, cfg, &opts)?
        }
        Cmd::Plan { file, chunk_size } => plan(&file, chunk_size)?,
        Cmd::Address { wallet } => address(&wallet)?,
    }
    Ok(())
}

struct UploadOpts<'a> {
    wallet: &'a Path,
    gateway: &'a str,
    timeout: Duration,
    progress: bool,
    report: Option<&'a Path>,
}

fn upload(input: &Path, output: &Path, cfg: PipelineConfig, opts: &UploadOpts<'_>) -> Result<()> {
    if !input.is_file() {
        bail!("input file not found: {}", input.display());
    }
    let wallet = Wallet::load(opts.wallet)
        .with_context(|| format!("load wallet {}", opts.wallet.display()))?;
    tracing::info!(address = %wallet.address(), "wallet loaded");

    let progress = Progress::new(opts.progress);
    progress.start(Duration::from_secs(5));
    let transport = HttpTransport::new(opts.gateway, opts.timeout)?;
    let report =
        Pipeline::new(&wallet, &transport, cfg).with_progress(progress.clone()).run(input, output);
    progress.stop();
    let report = report.with_context(|| format!("process {}", input.display()))?;

    if let Some(path) = opts.report {
        report.write_json(path).with_context(|| format!("write report {}", path.display()))?;
    }
    print_summary(&report);
    Ok(())
}

fn print_summary(r: &RunReport) {
    println!(
        "rows={} uploaded={} found_remote={} already_uploaded={} skipped={} failed={}",
        r.rows, r.uploaded, r.found_remote, r.already_uploaded, r.skipped, r.failed
    );
    println!("Output: {}", r.output);
}

fn plan(file: &Path, chunk_size: u32) -> Result<()> {
    let mut source = ChunkSource::open(file).with_context(|| format!("open {}", file.display()))?;
    let content = ContentRef::from_source(&mut source, chunk_size)?;
    for (i, (c, h)) in content.plan.chunks.iter().zip(&content.chunk_hashes).enumerate() {
        println!("{:6} offset {:12} len {:8} {}", i, c.offset, c.length, h.to_hex());
    }
    println!("Chunks: {}", content.plan.len());
    println!("Size: {}", content.data_size());
    println!("Data root: {}", content.data_root.to_hex());
    Ok(())
}

fn address(wallet: &Path) -> Result<()> {
    let w = Wallet::load(wallet).with_context(|| format!("load wallet {}", wallet.display()))?;
    println!("{}", w.address());
    Ok(())
}
