//! CLI entry point for chunkstream.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chunkstream_core::{DownloadHandle, DownloadRequest, Downloader};
use clap::Parser;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod config_runtime;
mod output;
mod progress;

use cli::{Args, parse_target};
use output::DownloadSummary;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = match args.config.as_deref() {
        Some(path) => app_config::load_explicit_file_config(path)?,
        None => app_config::load_default_file_config()?,
    };
    if let Some(path) = loaded.path.as_deref()
        && loaded.config.is_some()
    {
        debug!(path = %path.display(), "loaded config file");
    }
    let settings = config_runtime::build_runtime_settings(&args, loaded.config.as_ref())?;

    if args.targets.is_empty() {
        info!("{}", output::NO_INPUT_GUIDANCE);
        info!("{}", output::INPUT_ARG_EXAMPLE);
        return Ok(ExitCode::SUCCESS);
    }

    let targets = args
        .targets
        .iter()
        .map(|raw| parse_target(raw, &settings.output_dir))
        .collect::<Result<Vec<_>>>()?;

    let downloader =
        Downloader::new(settings.download).context("Failed to create downloader")?;
    info!(
        downloads = targets.len(),
        max_concurrent = downloader.config().max_concurrent_downloads,
        "starting downloads"
    );

    let handles: Vec<DownloadHandle> = targets
        .into_iter()
        .map(|target| {
            let mut request = DownloadRequest::new(target.url, target.save_path);
            if let Some(content_type) = &args.content_type {
                request = request.with_content_type(content_type.clone());
            }
            downloader.download(request)
        })
        .collect();

    let bars = if progress::should_show_bars(io::stderr().is_terminal(), args.quiet, args.json) {
        progress::spawn_progress_bars(&handles)
    } else {
        Vec::new()
    };

    let interrupt_handles = handles.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling downloads");
            for handle in &interrupt_handles {
                handle.cancel();
            }
        }
    });

    let reports = join_all(handles.iter().map(|handle| handle.wait())).await;
    for bar in bars {
        let _ = bar.await;
    }

    let mut failed = 0_usize;
    for (handle, report) in handles.iter().zip(reports) {
        if !report.status.is_success() {
            failed += 1;
        }
        let summary = DownloadSummary::new(handle.url(), handle.save_path(), report);
        if args.json {
            println!("{}", summary.to_json()?);
        } else if !args.quiet || !report.status.is_success() {
            println!("{}", summary.to_text());
        }
    }

    info!(total = handles.len(), failed, "downloads finished");
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
