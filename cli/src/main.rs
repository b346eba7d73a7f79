//! Print inotify events for a path.
//!
//! Usage: inwatch [--recursive] [--mask "CREATE | DELETE"] <PATH>

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use futures::{Stream, StreamExt};
use inwatch::{Event, EventSource, InotifyConfig, Mask, RecursiveConfig, RecursiveWatcher};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inwatch")]
#[command(about = "Print inotify events for a file or directory", long_about = None)]
struct Cli {
    /// File or directory to watch
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Watch every directory below PATH as well
    #[arg(short, long)]
    recursive: bool,

    /// Events to report, e.g. "CREATE | DELETE | MOVE"
    #[arg(short, long, default_value_t = Mask::ALL_EVENTS)]
    mask: Mask,

    /// Maximum-size records read at once
    #[arg(long, default_value_t = InotifyConfig::DEFAULT_CACHE_SIZE)]
    cache_size: usize,

    /// Stop after this many events
    #[arg(short = 'n', long)]
    count: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let inotify = InotifyConfig::new().with_cache_size(cli.cache_size);

    if cli.recursive {
        let config = RecursiveConfig::new(&cli.path, cli.mask).with_inotify(inotify);
        let watcher = RecursiveWatcher::new(config)
            .with_context(|| format!("failed to watch tree {}", cli.path.display()))?;
        info!(
            "Watching {} directories under {}",
            watcher.watched_directories().len(),
            cli.path.display()
        );
        print_events(watcher.into_stream(), cli.count).await
    } else {
        let mut source = EventSource::from_config(&inotify).context("failed to create inotify instance")?;
        source
            .add_watch(&cli.path, cli.mask)
            .with_context(|| format!("failed to watch {}", cli.path.display()))?;
        info!("Watching {} for {}", cli.path.display(), cli.mask);
        print_events(source.into_stream(), cli.count).await
    }
}

async fn print_events(events: impl Stream<Item = inwatch::Result<Event>>, count: Option<usize>) -> Result<()> {
    let events = events.take(count.unwrap_or(usize::MAX));
    tokio::pin!(events);

    loop {
        tokio::select! {
            next = events.next() => match next {
                Some(event) => println!("{}", event.context("failed to read events")?),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}
