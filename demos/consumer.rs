//! Device-side consumer
//!
//! Run with: cargo run --example consumer
//!
//! Subscribes to the default broker channel and drains received frames
//! from a ring buffer the way a virtual camera driver would, logging
//! pipeline stats every 5 seconds until Ctrl+C.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framebus::channel::ChannelNamespace;
use framebus::protocol::DEFAULT_BROKER_NAME;
use framebus::stream::{DeviceConfig, DeviceStream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framebus=debug".parse()?)
                .add_directive("consumer=info".parse()?),
        )
        .init();

    let (device, queue) = DeviceStream::with_ring_buffer(
        DEFAULT_BROKER_NAME,
        ChannelNamespace::default(),
        DeviceConfig::default(),
    );

    let drained = Arc::new(AtomicU64::new(0));
    let notify = Arc::new(tokio::sync::Notify::new());
    {
        let notify = Arc::clone(&notify);
        queue.set_queue_altered(move |len| {
            if len > 0 {
                notify.notify_one();
            }
        });
    }

    let drain = {
        let queue = Arc::clone(&queue);
        let drained = Arc::clone(&drained);
        tokio::spawn(async move {
            loop {
                notify.notified().await;
                while let Some(queued) = queue.dequeue() {
                    drained.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(
                        id = %queued.frame.id,
                        sequence = queued.frame.sequence,
                        pts = queued.timing.presentation.as_secs_f64(),
                        "Frame drained"
                    );
                }
            }
        })
    };

    device.start()?;
    tracing::info!(
        channel = %device.subscriber().channel_name(),
        broker = DEFAULT_BROKER_NAME,
        "Waiting for frames"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = device.stats();
                tracing::info!(
                    registered = device.subscriber().is_registered(),
                    received = stats.received,
                    enqueued = stats.enqueued,
                    duplicates = stats.duplicates,
                    dropped = stats.dropped(),
                    drained = drained.load(Ordering::Relaxed),
                    fps = stats.frame_rate(),
                    "Stats"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    drain.abort();
    device.close().await;
    Ok(())
}
