//! Callback dispatch bridge between engine threads and attached handles.
//!
//! The engine calls [`DispatchBridge::on_event`] from its own threads. The
//! bridge resolves the node to an [`ElementEntry`] through a node index the
//! registry maintains, then delivers under the entry lock, so a handle that
//! detached before delivery began never sees the payload.
//!
//! # Dispatch modes
//!
//! - **Inline**: listeners run on the engine thread under the entry lock.
//! - **Queued**: each listener gets a bounded crossbeam channel and a worker
//!   thread. The engine thread only does a `try_send`; a full queue drops the
//!   payload and counts `queue_overflow`.
//!
//! The node index lock is a leaf lock. It is never held while another lock
//! is taken.

use crate::backend::{ElementEvent, EventSink};
use crate::config::{DispatchConfig, DispatchMode};
use crate::pipeline::element::{
    DeliveryOutcome, ElementEntry, HandleListener, HandleStatus, StatusFlag,
};
use crate::pipeline::error::RegistryResult;
use crate::pipeline::id::{HandleId, NodeId};
use crate::types::TensorsData;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;

#[derive(Debug, Default)]
struct DispatchCounters {
    delivered: AtomicU64,
    dropped_dead: AtomicU64,
    dropped_shutdown: AtomicU64,
    unrouted: AtomicU64,
    queue_overflow: AtomicU64,
}

impl DispatchCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Snapshot of the bridge counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Listener invocations on the dispatching thread; in queued mode every
    /// enqueue attempt, including ones that overflowed
    pub delivered: u64,
    /// Events that reached an entry already torn down
    pub dropped_dead: u64,
    /// Events dropped because the pipeline was closing
    pub dropped_shutdown: u64,
    /// Events for nodes with no registered entry
    pub unrouted: u64,
    /// Payloads dropped on a full listener queue
    pub queue_overflow: u64,
}

impl DispatchStats {
    /// Events lost for any reason other than having no entry
    pub fn dropped(&self) -> u64 {
        self.dropped_dead + self.dropped_shutdown + self.queue_overflow
    }
}

struct BridgeState {
    index: RwLock<HashMap<NodeId, Arc<ElementEntry>>>,
    closing: AtomicBool,
    counters: Arc<DispatchCounters>,
    config: DispatchConfig,
    span: tracing::Span,
}

/// Engine event sink owned by one pipeline
#[derive(Clone)]
pub struct DispatchBridge {
    state: Arc<BridgeState>,
}

impl DispatchBridge {
    pub(crate) fn new(config: DispatchConfig, span: tracing::Span) -> Self {
        Self {
            state: Arc::new(BridgeState {
                index: RwLock::new(HashMap::new()),
                closing: AtomicBool::new(false),
                counters: Arc::new(DispatchCounters::default()),
                config,
                span,
            }),
        }
    }

    /// Route one event to the entry registered for `node`
    pub fn dispatch(
        &self,
        node: NodeId,
        event: ElementEvent,
        payload: &Arc<TensorsData>,
    ) -> DeliveryOutcome {
        let counters = &self.state.counters;
        let entry = self
            .state
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node)
            .cloned();

        let Some(entry) = entry else {
            DispatchCounters::bump(&counters.unrouted, 1);
            tracing::trace!(parent: &self.state.span, %node, ?event, "Unrouted event");
            return DeliveryOutcome::Unrouted;
        };

        let outcome = entry.deliver_unless_closing(event, payload, &self.state.closing);
        match outcome {
            DeliveryOutcome::Delivered(n) => DispatchCounters::bump(&counters.delivered, n as u64),
            DeliveryOutcome::Dropped if self.is_closing() => {
                DispatchCounters::bump(&counters.dropped_shutdown, 1)
            }
            DeliveryOutcome::Dropped => DispatchCounters::bump(&counters.dropped_dead, 1),
            DeliveryOutcome::Unrouted => {}
        }
        outcome
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.state.counters;
        DispatchStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped_dead: c.dropped_dead.load(Ordering::Relaxed),
            dropped_shutdown: c.dropped_shutdown.load(Ordering::Relaxed),
            unrouted: c.unrouted.load(Ordering::Relaxed),
            queue_overflow: c.queue_overflow.load(Ordering::Relaxed),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.state.closing.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> DispatchMode {
        self.state.config.mode
    }

    /// Number of nodes currently routable
    pub fn routed_nodes(&self) -> usize {
        self.state
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn register(&self, entry: &Arc<ElementEntry>) {
        self.state
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.node(), Arc::clone(entry));
    }

    pub(crate) fn unregister(&self, node: NodeId) {
        self.state
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&node);
    }

    pub(crate) fn begin_close(&self) {
        self.state.closing.store(true, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        let drained: Vec<_> = self
            .state
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        tracing::debug!(parent: &self.state.span, nodes = drained.len(), "Dispatch index cleared");
    }

    /// Wrap a listener for the configured dispatch mode.
    ///
    /// In queued mode this spawns the listener's worker thread. The worker
    /// exits once the returned listener is dropped or `status` leaves `Live`.
    pub(crate) fn wrap_listener(
        &self,
        element: &str,
        listener: Arc<dyn HandleListener>,
        status: &Arc<StatusFlag>,
    ) -> RegistryResult<Arc<dyn HandleListener>> {
        match self.state.config.mode {
            DispatchMode::Inline => Ok(listener),
            DispatchMode::Queued => {
                let (tx, rx) = bounded(self.state.config.queue_capacity.max(1));
                spawn_worker(element, Arc::clone(&listener), Arc::clone(status), rx)?;
                Ok(Arc::new(QueuedListener {
                    element: element.to_string(),
                    tx,
                    inner: listener,
                    counters: Arc::clone(&self.state.counters),
                }))
            }
        }
    }
}

impl EventSink for DispatchBridge {
    fn on_event(&self, node: NodeId, event: ElementEvent, payload: Arc<TensorsData>) {
        self.dispatch(node, event, &payload);
    }
}

type QueuedItem = (ElementEvent, Arc<TensorsData>);

/// Engine-side half of a queued listener
struct QueuedListener {
    element: String,
    tx: Sender<QueuedItem>,
    inner: Arc<dyn HandleListener>,
    counters: Arc<DispatchCounters>,
}

impl HandleListener for QueuedListener {
    fn on_event(&self, event: ElementEvent, payload: &Arc<TensorsData>) {
        match self.tx.try_send((event, Arc::clone(payload))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                DispatchCounters::bump(&self.counters.queue_overflow, 1);
                tracing::debug!(element = %self.element, ?event, "Listener queue full, payload dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn on_invalidated(&self, element: &str, id: HandleId) {
        self.inner.on_invalidated(element, id);
    }
}

fn spawn_worker(
    element: &str,
    listener: Arc<dyn HandleListener>,
    status: Arc<StatusFlag>,
    rx: Receiver<QueuedItem>,
) -> std::io::Result<()> {
    let name = element.to_string();
    thread::Builder::new()
        .name(format!("mlpipe-dispatch-{}", element))
        .spawn(move || {
            for (event, payload) in rx.iter() {
                if status.get() != HandleStatus::Live {
                    break;
                }
                let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event, &payload)));
                if result.is_err() {
                    tracing::error!(element = %name, ?event, "Queued listener panicked");
                }
            }
            tracing::trace!(element = %name, "Dispatch worker exiting");
        })?;
    Ok(())
}
