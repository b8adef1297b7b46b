use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use paraget::args::Args;
use paraget::manager::{DownloadConfig, DownloadManager};
use paraget::util;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let output = match args.output {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(util::filename_from_url(&args.url)),
    };

    let config = DownloadConfig::new(&args.url, &output)
        .connections(args.connections)
        .retry_limit(args.retry_limit)
        .timeout(Duration::from_secs(args.timeout_secs));

    println!("Downloading {} -> {}", args.url, output.display());

    let manager = Arc::new(DownloadManager::new(config)?);

    // Ctrl-C cancels the session; in-flight fetches stop at their next read.
    let cancel = manager.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, cancelling...");
            cancel.cancel();
        }
    });

    let reporter = tokio::spawn(render_progress(Arc::clone(&manager)));
    let result = manager.run().await;
    reporter.abort();

    let report = result?;
    println!(
        "Downloaded {} bytes in {:.1}s",
        report.bytes_written,
        report.elapsed.as_secs_f64()
    );

    if let Some(expected) = args.verify_sha256 {
        println!("Verifying file integrity...");
        let path = output.clone();
        tokio::task::spawn_blocking(move || util::verify_sha256(&path, &expected))
            .await
            .context("hashing task failed")??;
        println!("Integrity check passed");
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { "paraget=debug" } else { "paraget=warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Polls the session's progress tracker and renders a progress bar.
async fn render_progress(manager: Arc<DownloadManager>) {
    let progress = manager.progress();
    let bar = ProgressBar::hidden();
    let mut styled = false;

    loop {
        let snapshot = progress.snapshot();
        if !styled {
            if let Some(total) = snapshot.total_bytes {
                bar.set_length(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                    )
                    .unwrap()
                    .progress_chars("=>-"),
                );
                bar.set_message("Downloading");
                bar.set_draw_target(ProgressDrawTarget::stderr());
                styled = true;
            }
        }
        bar.set_position(snapshot.bytes_done);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
