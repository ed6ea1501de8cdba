//! Concurrency tests for the dispatch bridge and handle manager
//!
//! These tests validate:
//! - No delivery to a handle after its detach returned
//! - No event loss during normal operation
//! - Unique ids under concurrent attach
//! - Destroy racing with handle release
//! - Queued dispatch ordering and shutdown

mod common;

use common::builders::{sink_only_graph, PipelineFixtureBuilder, FRAME_BYTES};
use common::mock_helpers::{channel_listener, CountingListener, RecordingListener};
use common::{test_timeout, wait_until};
use mlpipe_rs::backend::ElementEvent;
use mlpipe_rs::pipeline::{DeliveryOutcome, HandleId, HandleListener, RegistryError};
use mlpipe_rs::types::{ElementRole, TensorsData};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

const DELIVERIES: u64 = 10_000;

/// Records the clock tick carried by each payload
#[derive(Default)]
struct TickListener {
    ticks: Mutex<Vec<u64>>,
}

impl HandleListener for TickListener {
    fn on_event(&self, _event: ElementEvent, payload: &Arc<TensorsData>) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&payload.buffers[0][..8]);
        self.ticks.lock().unwrap().push(u64::from_le_bytes(bytes));
    }
}

#[test]
fn test_no_delivery_after_detach() {
    let fixture = PipelineFixtureBuilder::new().graph(sink_only_graph()).build();
    let pipeline = fixture.pipeline.clone();
    let node = pipeline
        .find_or_create_entry("sink", ElementRole::Sink)
        .unwrap()
        .node();

    // One listener that stays attached the whole time
    let permanent = Arc::new(CountingListener::default());
    let _permanent = pipeline
        .register_sink_listener("sink", permanent.clone())
        .unwrap();

    let clock = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let dispatcher = {
        let bridge = pipeline.bridge().clone();
        let clock = clock.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut undelivered = 0;
            for _ in 0..DELIVERIES {
                let tick = clock.fetch_add(1, Ordering::SeqCst);
                let payload = Arc::new(TensorsData::single(tick.to_le_bytes().to_vec()));
                match bridge.dispatch(node, ElementEvent::NewData, &payload) {
                    DeliveryOutcome::Delivered(n) if n >= 1 => {}
                    _ => undelivered += 1,
                }
            }
            done.store(true, Ordering::SeqCst);
            undelivered
        })
    };

    let churner = {
        let pipeline = pipeline.clone();
        let clock = clock.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut detached: Vec<(Arc<TickListener>, u64)> = Vec::new();
            while !done.load(Ordering::SeqCst) {
                let listener = Arc::new(TickListener::default());
                let handle = pipeline
                    .register_sink_listener("sink", listener.clone())
                    .unwrap();
                thread::yield_now();
                handle.release().unwrap();
                let detached_at = clock.fetch_add(1, Ordering::SeqCst);
                detached.push((listener, detached_at));
            }
            detached
        })
    };

    let undelivered = dispatcher.join().unwrap();
    let detached = churner.join().unwrap();

    assert_eq!(undelivered, 0);
    assert!(!detached.is_empty());
    for (listener, detached_at) in &detached {
        for tick in listener.ticks.lock().unwrap().iter() {
            assert!(
                tick < detached_at,
                "payload {} delivered after detach at {}",
                tick,
                detached_at
            );
        }
    }

    assert_eq!(permanent.count() as u64, DELIVERIES);
    let stats = pipeline.dispatch_stats();
    assert_eq!(stats.dropped(), 0);
    assert_eq!(stats.unrouted, 0);
}

#[test]
fn test_concurrent_attach_ids_unique() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let fixture = PipelineFixtureBuilder::new().graph(sink_only_graph()).build();
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let pipeline = fixture.pipeline.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut ids = Vec::with_capacity(PER_THREAD);
                let mut kept = Vec::new();
                for j in 0..PER_THREAD {
                    let handle = pipeline.register_sink("sink", |_| {}).unwrap();
                    ids.push(handle.id());
                    // Keep every other handle so detach and attach interleave
                    if (i + j) % 2 == 0 {
                        kept.push(handle);
                    }
                }
                drop(kept);
                ids
            })
        })
        .collect();

    let mut all: Vec<HandleId> = Vec::new();
    for worker in workers {
        let ids = worker.join().unwrap();
        // Ids seen by one thread are strictly increasing
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all.extend(ids);
    }

    let unique: HashSet<HandleId> = all.iter().copied().collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);
}

#[test]
fn test_destroy_races_release() {
    const THREADS: usize = 6;

    let fixture = PipelineFixtureBuilder::new().build();
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let pipeline = fixture.pipeline.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let handles: Vec<_> = (0..50)
                    .map(|_| pipeline.register_sink("sink_a", |_| {}).unwrap())
                    .collect();
                drop(pipeline);
                barrier.wait();
                for handle in handles {
                    assert!(handle.release().is_ok());
                }
            })
        })
        .collect();

    barrier.wait();
    fixture.pipeline.destroy().unwrap();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(fixture.engine.destroy_calls(fixture.graph), 1);
    assert!(matches!(
        fixture.pipeline.register_sink("sink_a", |_| {}),
        Err(RegistryError::AlreadyDestroyed)
    ));
}

#[test]
fn test_dispatch_races_destroy() {
    let fixture = PipelineFixtureBuilder::new().graph(sink_only_graph()).build();
    let pipeline = fixture.pipeline.clone();
    let recorder = RecordingListener::new();
    let sink = pipeline
        .register_sink_listener("sink", recorder.clone())
        .unwrap();
    let node = pipeline.entry("sink").unwrap().node();
    let bridge = pipeline.bridge().clone();

    let dispatcher = thread::spawn(move || {
        let payload = Arc::new(TensorsData::single(vec![0u8; 4]));
        for _ in 0..5_000 {
            bridge.dispatch(node, ElementEvent::NewData, &payload);
        }
    });

    thread::yield_now();
    pipeline.destroy().unwrap();
    dispatcher.join().unwrap();

    assert_eq!(recorder.invalidations().len(), 1);
    let stats = fixture.pipeline.dispatch_stats();
    assert_eq!(
        stats.delivered + stats.dropped_shutdown + stats.dropped_dead + stats.unrouted,
        5_000
    );
    assert!(sink.release().is_ok());
}

#[test]
fn test_concurrent_pushes_reach_all_listeners() {
    const PUSHERS: usize = 4;
    const FRAMES: usize = 250;

    let fixture = PipelineFixtureBuilder::new().build();
    let pipeline = &fixture.pipeline;
    let (listener, rx) = channel_listener();
    let _sink = pipeline.register_sink_listener("sink_a", listener).unwrap();
    let counter = Arc::new(CountingListener::default());
    let _counting = pipeline
        .register_sink_listener("sink_a", counter.clone())
        .unwrap();

    let src = Arc::new(pipeline.src_handle("src").unwrap());
    pipeline.start().unwrap();

    let pushers: Vec<_> = (0..PUSHERS)
        .map(|_| {
            let src = src.clone();
            thread::spawn(move || {
                for i in 0..FRAMES {
                    src.input_data(TensorsData::single(vec![i as u8; FRAME_BYTES]))
                        .unwrap();
                }
            })
        })
        .collect();
    for pusher in pushers {
        pusher.join().unwrap();
    }

    assert_eq!(counter.count(), PUSHERS * FRAMES);
    assert_eq!(rx.try_iter().count(), PUSHERS * FRAMES);
    assert_eq!(pipeline.dispatch_stats().dropped(), 0);
}

#[test]
fn test_queued_dispatch_in_order_and_stops_after_release() {
    let fixture = PipelineFixtureBuilder::new()
        .graph(sink_only_graph())
        .queued(256)
        .build();
    let pipeline = &fixture.pipeline;
    let recorder = RecordingListener::new();
    let sink = pipeline
        .register_sink_listener("sink", recorder.clone())
        .unwrap();
    let src = pipeline.src_handle("src").unwrap();
    pipeline.start().unwrap();

    for i in 0..100u8 {
        src.input_data(TensorsData::single(vec![i])).unwrap();
    }
    assert!(wait_until(|| recorder.frames().len() == 100));
    let expected: Vec<Vec<u8>> = (0..100u8).map(|i| vec![i]).collect();
    assert_eq!(recorder.frames(), expected);

    sink.release().unwrap();
    for i in 0..10u8 {
        src.input_data(TensorsData::single(vec![i])).unwrap();
    }
    thread::sleep(test_timeout() / 50);
    assert_eq!(recorder.frames().len(), 100);
    assert_eq!(pipeline.dispatch_stats().queue_overflow, 0);
}

#[test]
fn test_queued_listener_invalidated_on_destroy() {
    let fixture = PipelineFixtureBuilder::new()
        .graph(sink_only_graph())
        .queued(16)
        .build();
    let recorder = RecordingListener::new();
    let sink = fixture
        .pipeline
        .register_sink_listener("sink", recorder.clone())
        .unwrap();

    fixture.pipeline.destroy().unwrap();
    assert_eq!(recorder.invalidations(), vec![("sink".to_string(), sink.id())]);
    assert!(!sink.is_valid());
}
