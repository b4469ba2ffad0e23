// MediaCore - Download queue and media preloading engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use media_core::download::{AlwaysGranted, FsDirectoryResolver, HttpTransfer};
use media_core::preload::{plan_window, VideoItem};
use media_core::{CoreConfig, DownloadQueueEngine, DownloadStatus, PreloadConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "media-core-cli")]
#[command(about = "MediaCore CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs through the queue
    Download {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,
        /// Output directory (type subfolders are created below it)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Maximum concurrent downloads
        #[arg(short, long)]
        max_concurrent: Option<usize>,
    },
    /// Print the preload window for a position in a feed
    Window {
        /// Feed length
        #[arg(long)]
        len: usize,
        /// Current index
        #[arg(long)]
        index: usize,
        #[arg(long)]
        ahead: Option<usize>,
        #[arg(long)]
        behind: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CoreConfig::load(path)
            .await
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CoreConfig::default(),
    };

    match cli.command {
        Commands::Download {
            urls,
            dir,
            max_concurrent,
        } => {
            let mut download = config.download;
            if let Some(dir) = dir {
                download.output_directory = dir;
            }
            if let Some(max) = max_concurrent {
                download.max_concurrent_downloads = max;
            }
            run_downloads(urls, download).await
        }
        Commands::Window {
            len,
            index,
            ahead,
            behind,
        } => {
            let preload = PreloadConfig {
                preload_ahead: ahead.unwrap_or(config.preload.preload_ahead),
                keep_behind: behind.unwrap_or(config.preload.keep_behind),
                ..config.preload
            };
            print_window(len, index, &preload);
            Ok(())
        }
    }
}

async fn run_downloads(urls: Vec<String>, config: media_core::DownloadConfig) -> anyhow::Result<()> {
    let transfer = Arc::new(HttpTransfer::new(&config)?);
    let resolver = Arc::new(FsDirectoryResolver::new(config.output_directory.clone()));
    let engine = DownloadQueueEngine::new(config, transfer, resolver, Arc::new(AlwaysGranted))?;

    let mut updates = engine.subscribe();
    for url in &urls {
        let id = engine.add_download(url, None, None).await?;
        println!("Queued {} as {}", url, id);
    }

    loop {
        let snapshot = updates.borrow_and_update().clone();
        if !snapshot.items.is_empty() && snapshot.items.iter().all(|item| item.is_terminal()) {
            break;
        }
        println!(
            "{} active, {} queued, {:.1}% overall",
            snapshot.active_count(),
            snapshot.queued().len(),
            snapshot.overall_progress() * 100.0
        );
        updates.changed().await.context("download engine stopped")?;
    }

    let snapshot = engine.snapshot();
    let mut failures = 0;
    for item in &snapshot.items {
        match item.status {
            DownloadStatus::Completed => {
                let path = item.save_path.as_deref().map(|p| p.display().to_string()).unwrap_or_default();
                println!("✓ {} -> {}", item.url, path);
            }
            _ => {
                failures += 1;
                println!(
                    "✗ {} ({} at {:.0}%): {}",
                    item.url,
                    item.status.as_str(),
                    item.percent_complete(),
                    item.error_message.as_deref().unwrap_or("")
                );
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} downloads did not complete", failures, snapshot.items.len());
    }
    Ok(())
}

fn print_window(len: usize, index: usize, config: &PreloadConfig) {
    let items: Vec<VideoItem<()>> = (0..len)
        .map(|i| VideoItem::new(format!("item-{}", i), format!("item://{}", i), ()))
        .collect();
    let plan = plan_window(index, &items, std::iter::empty::<&String>(), config);

    match plan.current_index {
        Some(current) => {
            println!("Current: {}", current);
            println!("Create (closest first): {}", plan.desired.join(", "));
        }
        None => println!("Empty feed, nothing to preload"),
    }
}
