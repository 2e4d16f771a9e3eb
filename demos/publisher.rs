//! Test-pattern publisher
//!
//! Run with: cargo run --example publisher [WIDTH HEIGHT FPS]
//!
//! Publishes scrolling colour bars on the default broker channel until
//! Ctrl+C. Start one or more `consumer` examples to receive them.

use std::time::Duration;

use framebus::channel::ChannelNamespace;
use framebus::protocol::DEFAULT_BROKER_NAME;
use framebus::raster::{FilterChain, Mirror, NoFilter};
use framebus::stream::{PublishStream, StreamConfig, TestPatternSource};

fn arg(args: &[String], index: usize, default: u32) -> u32 {
    args.get(index)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let width = arg(&args, 1, 640);
    let height = arg(&args, 2, 480);
    let fps = arg(&args, 3, 30);
    let mirror = args.iter().any(|a| a == "--mirror");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framebus=debug".parse()?)
                .add_directive("publisher=info".parse()?),
        )
        .init();

    let namespace = ChannelNamespace::default();
    let stream = PublishStream::new(
        DEFAULT_BROKER_NAME,
        namespace.clone(),
        StreamConfig::default().fps(fps),
    );
    stream.set_source(TestPatternSource::new(width, height).with_fps(fps));
    if mirror {
        stream.set_filter(FilterChain::new().then(Mirror));
    } else {
        stream.set_filter(NoFilter);
    }
    stream.start()?;

    tracing::info!(
        channel = DEFAULT_BROKER_NAME,
        dir = %namespace.dir().display(),
        width,
        height,
        fps,
        "Publishing test pattern"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = stream.stats();
                let broker = stream.broker_stats();
                tracing::info!(
                    published = stats.published,
                    dropped = stats.dropped(),
                    fps = stats.frame_rate(),
                    subscribers = broker.subscriber_count(),
                    connected = broker.connected_count(),
                    deliveries = broker.deliveries,
                    failures = broker.delivery_failures,
                    "Stats"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    stream.stop();
    Ok(())
}
