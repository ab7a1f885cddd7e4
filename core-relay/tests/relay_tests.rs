//! Integration tests for the in-process relay
//!
//! These tests drive the public API the way two pipelines would:
//! - Caps handoff and stream-header replay
//! - Latest and keyframe pre-roll buffering
//! - Surface refcounting in an isolated registry
//! - Flushing, timeouts and blocking overflow
//! - Producer/consumer roles on separate threads

use core_relay::{
    AppSink, AppSrc, Buffer, Caps, ChannelConfig, ClientOptions, DeferredClient, OverflowPolicy,
    RelayError, SurfaceRegistry,
};
use core_runtime::events::{DropReason, EventStream, RelayEvent};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn h264_with_headers(headers: &[&'static [u8]]) -> Caps {
    Caps::builder("video/x-h264")
        .field("stream-format", "byte-stream")
        .stream_headers(headers.iter().map(|h| Buffer::header(*h)).collect())
        .build()
}

fn keyframe_client(depth: usize) -> DeferredClient {
    DeferredClient::new(
        "test",
        ClientOptions::latest_from_keyframe(NonZeroUsize::new(depth)),
    )
}

// ============================================================================
// Caps and Headers
// ============================================================================

#[test]
fn test_single_writer_wins() {
    let client = DeferredClient::new("test", ClientOptions::latest());
    let a = Caps::new("video/x-raw");
    let b = Caps::builder("video/x-raw").field("width", 640).build();

    client.set_caps(a);
    client.push_buffer(Buffer::new(vec![1])).unwrap();
    client.set_caps(b.clone());

    let update = client.get_caps(true).unwrap().unwrap();
    assert_eq!(update.caps, b);
    assert!(client.try_get_buffer().is_none());
}

#[test]
fn test_header_precedence() {
    let client = DeferredClient::new("test", ClientOptions::latest());
    client.set_caps(h264_with_headers(&[b"h1", b"h2"]));
    client.push_buffer(Buffer::new(&b"d1"[..])).unwrap();

    let order: Vec<_> = (0..3)
        .map(|_| client.get_buffer().unwrap().data().clone())
        .collect();
    assert_eq!(order, vec![&b"h1"[..], &b"h2"[..], &b"d1"[..]]);
}

#[test]
fn test_identical_caps_do_not_resend_headers() {
    let client = DeferredClient::new("test", ClientOptions::latest());
    let caps = h264_with_headers(&[b"h1", b"h2"]);

    client.set_caps(caps.clone());
    assert!(client.get_buffer().unwrap().is_header());
    assert!(client.get_buffer().unwrap().is_header());

    client.set_caps(caps);
    client.push_buffer(Buffer::new(&b"d1"[..])).unwrap();

    let next = client.get_buffer().unwrap();
    assert!(!next.is_header());
    assert_eq!(next.data().as_ref(), b"d1");
}

#[test]
fn test_changed_headers_replace_unconsumed_ones() {
    let client = DeferredClient::new("test", ClientOptions::latest());
    client.set_caps(h264_with_headers(&[b"old"]));
    client.set_caps(h264_with_headers(&[b"new1", b"new2"]));

    assert_eq!(client.pending_headers(), 2);
    assert_eq!(client.get_buffer().unwrap().data().as_ref(), b"new1");
}

// ============================================================================
// Buffering
// ============================================================================

#[test]
fn test_latest_mode_replacement() {
    let client = DeferredClient::new("test", ClientOptions::latest());
    client.set_caps(Caps::new("application/x-custom"));
    client.push_buffer(Buffer::new(&b"b1"[..])).unwrap();
    client.push_buffer(Buffer::new(&b"b2"[..])).unwrap();

    assert_eq!(client.get_buffer().unwrap().data().as_ref(), b"b2");
    assert!(client.try_get_buffer().is_none());
    assert_eq!(client.stats().buffers_dropped, 1);
}

#[test]
fn test_keyframe_gated_preroll() {
    let client = keyframe_client(16);
    client.set_caps(Caps::new("video/x-h264"));

    client.push_buffer(Buffer::delta(&b"stray"[..])).unwrap();
    client.push_buffer(Buffer::new(&b"k1"[..])).unwrap();
    client.push_buffer(Buffer::delta(&b"d1"[..])).unwrap();

    assert_eq!(client.get_buffer().unwrap().data().as_ref(), b"k1");
    assert_eq!(client.get_buffer().unwrap().data().as_ref(), b"d1");
    assert!(client.try_get_buffer().is_none());
}

#[test]
fn test_keyframe_mode_switches_to_latest_once_started() {
    let client = keyframe_client(16);
    client.set_caps(Caps::new("video/x-h264"));
    client.push_buffer(Buffer::new(&b"k1"[..])).unwrap();
    client.get_buffer().unwrap();
    assert!(client.is_started());

    client.push_buffer(Buffer::delta(&b"d1"[..])).unwrap();
    client.push_buffer(Buffer::delta(&b"d2"[..])).unwrap();
    assert_eq!(client.get_buffer().unwrap().data().as_ref(), b"d2");
}

#[test]
fn test_keyframe_queue_overflow_resyncs() {
    let client = keyframe_client(2);
    client.set_caps(Caps::new("video/x-h264"));

    client.push_buffer(Buffer::new(&b"k1"[..])).unwrap();
    client.push_buffer(Buffer::delta(&b"d1"[..])).unwrap();
    // Queue is full: everything goes, including this delta.
    client.push_buffer(Buffer::delta(&b"d2"[..])).unwrap();
    assert_eq!(client.pending_buffers(), 0);

    client.push_buffer(Buffer::new(&b"k2"[..])).unwrap();
    assert_eq!(client.get_buffer().unwrap().data().as_ref(), b"k2");
}

#[test]
fn test_block_overflow_waits_for_consumer() {
    let options = ClientOptions::latest_from_keyframe(NonZeroUsize::new(1))
        .with_overflow(OverflowPolicy::Block);
    let client = Arc::new(DeferredClient::new("test", options));
    client.set_caps(Caps::new("video/x-h264"));
    client.push_buffer(Buffer::new(&b"k1"[..])).unwrap();

    let producer = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.push_buffer(Buffer::delta(&b"d1"[..])))
    };

    thread::sleep(Duration::from_millis(30));
    assert_eq!(client.pending_buffers(), 1);
    assert_eq!(client.get_buffer().unwrap().data().as_ref(), b"k1");
    producer.join().unwrap().unwrap();
    assert_eq!(client.get_buffer().unwrap().data().as_ref(), b"d1");
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_refcount_lifecycle() {
    let registry = SurfaceRegistry::new();
    let first = registry.get_or_create("x");
    let second = registry.get_or_create("x");
    assert_eq!(registry.refcount("x"), Some(2));

    first.client().set_caps(Caps::new("video/x-raw"));
    registry.release(first);
    registry.release(second);
    assert!(!registry.contains("x"));

    let fresh = registry.get_or_create("x");
    assert_eq!(registry.refcount("x"), Some(1));
    assert!(fresh.client().try_get_caps().is_none());
}

#[test]
fn test_registries_are_isolated() {
    let a = SurfaceRegistry::new();
    let b = SurfaceRegistry::new();
    let _held = a.get_or_create("x");

    assert!(a.contains("x"));
    assert!(!b.contains("x"));
}

#[test]
fn test_reset_clears_state() {
    let client = DeferredClient::new("test", ClientOptions::latest());
    client.set_caps(Caps::new("video/x-raw"));
    client.push_buffer(Buffer::new(vec![1])).unwrap();

    client.reset();

    assert!(client.get_caps(false).unwrap().is_none());
    assert_eq!(client.pending_buffers(), 0);
}

// ============================================================================
// Cancellation and Timeouts
// ============================================================================

#[test]
fn test_flushing_wakes_blocked_buffer_wait() {
    let client = Arc::new(DeferredClient::new("test", ClientOptions::latest()));
    client.set_caps(Caps::new("video/x-raw"));

    let consumer = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.get_buffer())
    };

    thread::sleep(Duration::from_millis(30));
    client.set_flushing(true);

    let err = consumer.join().unwrap().unwrap_err();
    assert!(matches!(err, RelayError::Flushing));

    client.set_flushing(false);
    client.push_buffer(Buffer::new(vec![9])).unwrap();
    assert_eq!(client.get_buffer().unwrap().data().as_ref(), &[9]);
}

#[test]
fn test_timeouts_return_none() {
    let client = DeferredClient::new("test", ClientOptions::latest());

    let caps = client.get_caps_timeout(Duration::from_millis(10)).unwrap();
    assert!(caps.is_none());

    client.set_caps(Caps::new("video/x-raw"));
    let buffer = client.get_buffer_timeout(Duration::from_millis(10)).unwrap();
    assert!(buffer.is_none());
}

// ============================================================================
// Roles
// ============================================================================

#[test]
fn test_producer_consumer_threads() {
    let registry = SurfaceRegistry::new();
    let config = ChannelConfig::keyframe_preroll(64).with_channel("pipe");
    let sink = AppSink::new(registry.clone(), config.clone()).unwrap();
    let src = Arc::new(AppSrc::new(registry.clone(), config).unwrap());

    src.start().unwrap();
    let consumer = {
        let src = Arc::clone(&src);
        thread::spawn(move || {
            let first = src.create()?;
            let second = src.create()?;
            Ok::<_, RelayError>((first, second))
        })
    };

    sink.start().unwrap();
    sink.set_caps(h264_with_headers(&[b"sps"])).unwrap();
    sink.render(Buffer::new(&b"k1"[..])).unwrap();

    let (first, second) = consumer.join().unwrap().unwrap();
    assert!(first.caps.is_some());
    assert!(first.buffer.is_header());
    assert!(second.caps.is_none());
    assert_eq!(second.buffer.data().as_ref(), b"k1");

    src.stop().unwrap();
    sink.stop().unwrap();
    assert!(registry.is_empty());
}

#[test]
fn test_consumer_stop_wakes_blocked_create() {
    let registry = SurfaceRegistry::new();
    let src = Arc::new(AppSrc::new(registry.clone(), ChannelConfig::default()).unwrap());
    src.start().unwrap();

    let consumer = {
        let src = Arc::clone(&src);
        thread::spawn(move || src.create())
    };

    thread::sleep(Duration::from_millis(30));
    src.stop().unwrap();

    assert!(consumer.join().unwrap().unwrap_err().is_cancellation());
    // The blocked call held the surface until it returned.
    assert!(registry.is_empty());
}

#[test]
fn test_events_observe_channel_activity() {
    let registry = SurfaceRegistry::from_config(&core_runtime::config::RuntimeConfig::default());
    let mut events = EventStream::new(
        registry
            .event_bus()
            .map(|bus| bus.subscribe())
            .unwrap(),
    )
    .filter(|event| event.channel() == "cam");

    let handle = registry.get_or_create("cam");
    handle.client().set_caps(Caps::new("video/x-raw"));
    handle.client().push_buffer(Buffer::new(vec![1])).unwrap();
    handle.client().push_buffer(Buffer::new(vec![2])).unwrap();
    drop(handle);

    let mut seen = Vec::new();
    while let Some(Ok(event)) = events.try_recv() {
        seen.push(event);
    }

    assert_eq!(
        seen.first(),
        Some(&RelayEvent::SurfaceCreated {
            channel: "cam".to_string()
        })
    );
    assert!(seen.iter().any(|e| matches!(
        e,
        RelayEvent::BuffersDropped {
            reason: DropReason::Replaced,
            ..
        }
    )));
    assert_eq!(
        seen.last(),
        Some(&RelayEvent::SurfaceDestroyed {
            channel: "cam".to_string()
        })
    );
}
