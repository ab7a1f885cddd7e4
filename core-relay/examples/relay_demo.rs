//! Relay demonstration
//!
//! A producer thread publishes an H.264-like stream on a channel while a
//! consumer thread pulls it, then both detach and the collected events are
//! printed.
//!
//! Run with:
//! ```bash
//! cargo run -p core-relay --example relay_demo
//!
//! # With custom filter
//! RUST_LOG=core_relay=trace cargo run -p core-relay --example relay_demo
//! ```

use anyhow::{Context, Result};
use core_relay::{AppSink, AppSrc, Buffer, Caps, ChannelConfig, SurfaceRegistry};
use core_runtime::config::RuntimeConfig;
use core_runtime::events::EventStream;
use core_runtime::logging::{init_logging, LogLevel, LoggingConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

const FRAMES: usize = 12;
const GOP: usize = 4;

fn main() -> Result<()> {
    let config = RuntimeConfig::builder()
        .default_channel("demo")
        .logging(LoggingConfig::default().with_level(LogLevel::Debug))
        .build()?;
    init_logging(config.logging.clone())?;

    let registry = SurfaceRegistry::from_config(&config);
    let mut events = EventStream::new(
        registry
            .event_bus()
            .context("registry built from config has an event bus")?
            .subscribe(),
    );

    let channel =
        ChannelConfig::keyframe_preroll(GOP * 2).with_channel(config.default_channel.clone());

    let sink = AppSink::new(registry.clone(), channel.clone())?;
    let src = Arc::new(AppSrc::new(registry.clone(), channel)?);

    src.start()?;
    let consumer = {
        let src = Arc::clone(&src);
        thread::spawn(move || -> core_relay::Result<usize> {
            let mut received = 0;
            loop {
                match src.create() {
                    Ok(pulled) => {
                        if let Some(caps) = pulled.caps {
                            info!(%caps, "consumer got caps");
                        }
                        received += 1;
                    }
                    Err(e) if e.is_cancellation() => return Ok(received),
                    Err(e) => return Err(e),
                }
            }
        })
    };

    sink.start()?;
    let caps = Caps::builder("video/x-h264")
        .field("stream-format", "byte-stream")
        .stream_headers(vec![Buffer::header(&b"\x00\x00\x00\x01sps"[..])])
        .build();
    sink.set_caps(caps)?;

    for i in 0..FRAMES {
        let payload = format!("frame-{i}").into_bytes();
        let pts = Duration::from_millis(40 * i as u64);
        let frame = if i % GOP == 0 {
            Buffer::new(payload)
        } else {
            Buffer::delta(payload)
        };
        sink.render(frame.with_pts(pts))?;
        thread::sleep(Duration::from_millis(5));
    }

    thread::sleep(Duration::from_millis(20));
    src.unlock();
    let received = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("consumer thread panicked"))??;

    src.stop()?;
    sink.stop()?;

    println!("consumer received {received} buffers (headers included)");
    println!("surfaces left: {}", registry.len());
    println!("events:");
    while let Some(Ok(event)) = events.try_recv() {
        println!("  [{:?}] {}", event.severity(), event.description());
    }

    Ok(())
}
