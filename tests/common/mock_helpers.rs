//! Listener doubles

use crossbeam_channel::{unbounded, Receiver, Sender};
use mlpipe_rs::backend::ElementEvent;
use mlpipe_rs::pipeline::{HandleId, HandleListener};
use mlpipe_rs::types::TensorsData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every event and invalidation it sees
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(ElementEvent, Vec<u8>)>>,
    invalidations: Mutex<Vec<(String, HandleId)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(ElementEvent, Vec<u8>)> {
        self.events.lock().unwrap().clone()
    }

    /// First buffer of every payload received
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter(|(event, _)| *event == ElementEvent::NewData)
            .map(|(_, frame)| frame)
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn invalidations(&self) -> Vec<(String, HandleId)> {
        self.invalidations.lock().unwrap().clone()
    }
}

impl HandleListener for RecordingListener {
    fn on_event(&self, event: ElementEvent, payload: &Arc<TensorsData>) {
        let frame = payload.buffers.first().cloned().unwrap_or_default();
        self.events.lock().unwrap().push((event, frame));
    }

    fn on_invalidated(&self, element: &str, id: HandleId) {
        self.invalidations
            .lock()
            .unwrap()
            .push((element.to_string(), id));
    }
}

/// Forwards payloads to a crossbeam channel
pub struct ChannelListener {
    tx: Sender<Arc<TensorsData>>,
}

pub fn channel_listener() -> (Arc<ChannelListener>, Receiver<Arc<TensorsData>>) {
    let (tx, rx) = unbounded();
    (Arc::new(ChannelListener { tx }), rx)
}

impl HandleListener for ChannelListener {
    fn on_event(&self, _event: ElementEvent, payload: &Arc<TensorsData>) {
        let _ = self.tx.send(Arc::clone(payload));
    }
}

/// Counts events only
#[derive(Default)]
pub struct CountingListener(pub AtomicUsize);

impl CountingListener {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl HandleListener for CountingListener {
    fn on_event(&self, _event: ElementEvent, _payload: &Arc<TensorsData>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
