//! Element registry entries.
//!
//! An `ElementEntry` is the registry's record of one controllable node. It
//! references the engine node by id only; whether that node may still be
//! touched is decided by the entry's alive flag. The flag is only written
//! under the entry lock but can be read without it. The same lock guards the
//! attached handle set, so a detach that returns before a delivery starts is
//! never observed by that delivery.
//!
//! Listeners run synchronously while the entry lock is held. A listener may
//! use its own handle (`is_valid`, `tensors_info`, `input_data`, ...) since
//! those never take the entry lock, but it must not attach, detach or drop
//! handles of the same element from inside its callback.

use crate::backend::{ElementEvent, NodePads};
use crate::pipeline::error::{RegistryError, RegistryResult};
use crate::pipeline::id::{HandleId, NodeId};
use crate::types::{ElementRole, HandleKind, TensorsData, TensorsInfo};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

/// Capability object registered with a handle at attach time.
pub trait HandleListener: Send + Sync {
    /// Called for every event routed to this handle's kind.
    fn on_event(&self, event: ElementEvent, payload: &Arc<TensorsData>);

    /// Called once when the element is torn down while the handle is attached.
    fn on_invalidated(&self, _element: &str, _id: HandleId) {}
}

/// Adapts a plain closure into a [`HandleListener`] that only sees payloads.
pub struct FnListener<F>(pub F);

impl<F> HandleListener for FnListener<F>
where
    F: Fn(&TensorsData) + Send + Sync,
{
    fn on_event(&self, _event: ElementEvent, payload: &Arc<TensorsData>) {
        (self.0)(payload)
    }
}

/// Observable lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleStatus {
    Live,
    /// Detached by its holder
    Released,
    /// Torn down with its element or pipeline
    Invalidated,
}

const STATUS_LIVE: u8 = 0;
const STATUS_RELEASED: u8 = 1;
const STATUS_INVALIDATED: u8 = 2;

/// Status cell shared between an attachment and the handle that owns it.
pub(crate) struct StatusFlag(AtomicU8);

impl StatusFlag {
    pub(crate) fn live() -> Self {
        Self(AtomicU8::new(STATUS_LIVE))
    }

    pub(crate) fn get(&self) -> HandleStatus {
        match self.0.load(Ordering::Acquire) {
            STATUS_LIVE => HandleStatus::Live,
            STATUS_RELEASED => HandleStatus::Released,
            _ => HandleStatus::Invalidated,
        }
    }

    /// Leave `Live`. Only the first transition sticks.
    pub(crate) fn finish(&self, status: HandleStatus) -> bool {
        let value = match status {
            HandleStatus::Live => return false,
            HandleStatus::Released => STATUS_RELEASED,
            HandleStatus::Invalidated => STATUS_INVALIDATED,
        };
        self.0
            .compare_exchange(STATUS_LIVE, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Result of routing one event to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to this many listeners (possibly zero)
    Delivered(usize),
    /// No entry is registered for the node
    Unrouted,
    /// The entry is dead or being torn down
    Dropped,
}

struct Attachment {
    kind: HandleKind,
    listener: Option<Arc<dyn HandleListener>>,
    status: Arc<StatusFlag>,
}

struct EntryState {
    next_id: HandleId,
    handles: BTreeMap<HandleId, Attachment>,
}

/// Serializable view of one attached handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleSnapshot {
    pub id: HandleId,
    pub kind: HandleKind,
}

/// Serializable view of an entry
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub name: String,
    pub role: ElementRole,
    pub node: NodeId,
    pub alive: bool,
    pub pads: NodePads,
    pub handles: Vec<HandleSnapshot>,
    pub tensors_info: Option<TensorsInfo>,
    pub buffer_size: usize,
}

/// Registry record of one controllable element
pub struct ElementEntry {
    name: String,
    role: ElementRole,
    node: NodeId,
    pads: NodePads,
    /// Written under `state`, read lock-free
    alive: AtomicBool,
    state: Mutex<EntryState>,
    /// Leaf lock; never held while taking `state`
    tensors_info: RwLock<Option<TensorsInfo>>,
}

impl fmt::Debug for ElementEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementEntry")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("node", &self.node)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ElementEntry {
    pub(crate) fn new(
        name: impl Into<String>,
        role: ElementRole,
        node: NodeId,
        pads: NodePads,
        tensors_info: Option<TensorsInfo>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            node,
            pads,
            alive: AtomicBool::new(true),
            state: Mutex::new(EntryState {
                next_id: HandleId::FIRST,
                handles: BTreeMap::new(),
            }),
            tensors_info: RwLock::new(tensors_info),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ElementRole {
        self.role
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn pads(&self) -> &NodePads {
        &self.pads
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn handle_count(&self) -> usize {
        self.lock().handles.len()
    }

    /// Ids of the currently attached handles, ascending
    pub fn handle_ids(&self) -> Vec<HandleId> {
        self.lock().handles.keys().copied().collect()
    }

    pub fn tensors_info(&self) -> Option<TensorsInfo> {
        self.tensors_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_tensors_info(&self, info: TensorsInfo) {
        *self
            .tensors_info
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Frame size implied by the cached stream format, or 0 if unknown
    pub fn buffer_size(&self) -> usize {
        self.tensors_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(TensorsInfo::frame_size)
            .unwrap_or(0)
    }

    /// Attach a handle of `kind` and return its id.
    ///
    /// Fails with `AlreadyDestroyed` on a dead entry, `RoleMismatch` if the
    /// kind does not fit the role and `HandleConflict` if an exclusive kind
    /// is already held.
    pub fn attach(
        &self,
        kind: HandleKind,
        listener: Option<Arc<dyn HandleListener>>,
    ) -> RegistryResult<HandleId> {
        self.attach_with_status(kind, listener, Arc::new(StatusFlag::live()))
    }

    pub(crate) fn attach_with_status(
        &self,
        kind: HandleKind,
        listener: Option<Arc<dyn HandleListener>>,
        status: Arc<StatusFlag>,
    ) -> RegistryResult<HandleId> {
        let mut state = self.lock();
        if !self.is_alive() {
            return Err(RegistryError::AlreadyDestroyed);
        }
        if !self.role.accepts(kind) {
            return Err(RegistryError::RoleMismatch {
                name: self.name.clone(),
                actual: self.role,
                requested: kind.to_string(),
            });
        }
        if kind.is_exclusive() && state.handles.values().any(|a| a.kind == kind) {
            return Err(RegistryError::HandleConflict {
                name: self.name.clone(),
                kind,
            });
        }

        let id = state.next_id;
        state.next_id = id.next();
        state.handles.insert(
            id,
            Attachment {
                kind,
                listener,
                status,
            },
        );
        tracing::debug!(element = %self.name, handle = %id, %kind, "Attached handle");
        Ok(id)
    }

    /// Remove a handle. Returns whether it was attached.
    ///
    /// Missing ids are not an error: teardown may already have removed them.
    pub fn detach(&self, id: HandleId) -> bool {
        let removed = self.lock().handles.remove(&id);
        match removed {
            Some(attachment) => {
                attachment.status.finish(HandleStatus::Released);
                tracing::debug!(element = %self.name, handle = %id, "Detached handle");
                true
            }
            None => false,
        }
    }

    /// Mark the entry dead and invalidate every attached handle.
    ///
    /// Returns the number of handles invalidated; 0 if already dead.
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.lock();
        if !self.alive.swap(false, Ordering::AcqRel) {
            return 0;
        }
        let handles = std::mem::take(&mut state.handles);

        for (id, attachment) in &handles {
            attachment.status.finish(HandleStatus::Invalidated);
            if let Some(listener) = &attachment.listener {
                let notified = panic::catch_unwind(AssertUnwindSafe(|| {
                    listener.on_invalidated(&self.name, *id)
                }));
                if notified.is_err() {
                    tracing::error!(element = %self.name, handle = %id, "Listener panicked on invalidation");
                }
            }
        }

        tracing::debug!(element = %self.name, count = handles.len(), "Invalidated entry");
        handles.len()
    }

    /// Forward `payload` to every attached handle targeted by `event`.
    ///
    /// A dead entry drops the event.
    pub fn deliver(&self, event: ElementEvent, payload: &Arc<TensorsData>) -> DeliveryOutcome {
        let state = self.lock();
        self.deliver_locked(&state, event, payload)
    }

    /// Like [`deliver`](Self::deliver), but gives up instead of waiting when
    /// the lock is contended and `closing` is set.
    pub(crate) fn deliver_unless_closing(
        &self,
        event: ElementEvent,
        payload: &Arc<TensorsData>,
        closing: &AtomicBool,
    ) -> DeliveryOutcome {
        let state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                if closing.load(Ordering::Acquire) {
                    return DeliveryOutcome::Dropped;
                }
                self.lock()
            }
        };
        self.deliver_locked(&state, event, payload)
    }

    fn deliver_locked(
        &self,
        state: &EntryState,
        event: ElementEvent,
        payload: &Arc<TensorsData>,
    ) -> DeliveryOutcome {
        if !self.is_alive() {
            return DeliveryOutcome::Dropped;
        }

        let target = event.target();
        let mut delivered = 0;
        for (id, attachment) in &state.handles {
            if attachment.kind != target {
                continue;
            }
            let Some(listener) = &attachment.listener else {
                continue;
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event, payload)));
            match result {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(element = %self.name, handle = %id, ?event, "Listener panicked")
                }
            }
        }
        DeliveryOutcome::Delivered(delivered)
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        let tensors_info = self.tensors_info();
        let state = self.lock();
        EntrySnapshot {
            name: self.name.clone(),
            role: self.role,
            node: self.node,
            alive: self.is_alive(),
            pads: self.pads.clone(),
            handles: state
                .handles
                .iter()
                .map(|(id, a)| HandleSnapshot {
                    id: *id,
                    kind: a.kind,
                })
                .collect(),
            buffer_size: tensors_info
                .as_ref()
                .and_then(TensorsInfo::frame_size)
                .unwrap_or(0),
            tensors_info,
        }
    }
}
