//! Application-held handles and the handle manager API on [`Pipeline`].
//!
//! Each handle references one element entry for one role:
//!
//! | Handle         | Kind              | Roles              | Per element |
//! |----------------|-------------------|--------------------|-------------|
//! | [`SinkHandle`]   | sink-listener     | sink, app-sink     | many        |
//! | [`SrcHandle`]    | source-feeder     | app-src            | one         |
//! | [`SwitchHandle`] | switch-controller | switch in/out      | one         |
//! | [`ValveHandle`]  | valve-controller  | valve              | one         |
//!
//! Handles detach when dropped. `release` does the same explicitly and
//! always succeeds, even if the pipeline is already gone. Operations check
//! liveness first and then call the engine without holding any registry or
//! entry lock.

use crate::pipeline::element::{
    ElementEntry, FnListener, HandleListener, HandleStatus, StatusFlag,
};
use crate::pipeline::error::{RegistryError, RegistryResult};
use crate::pipeline::id::HandleId;
use crate::pipeline::registry::{Pipeline, PipelineShared};
use crate::types::{HandleKind, TensorsData, TensorsInfo, MAX_TENSORS};
use std::fmt;
use std::sync::{Arc, Weak};

struct HandleCore {
    pipeline: Weak<PipelineShared>,
    entry: Arc<ElementEntry>,
    id: HandleId,
    status: Arc<StatusFlag>,
}

impl HandleCore {
    /// Pipeline, if the handle may still be used
    fn live(&self) -> RegistryResult<Arc<PipelineShared>> {
        let shared = self
            .pipeline
            .upgrade()
            .ok_or(RegistryError::AlreadyDestroyed)?;
        if self.status.get() != HandleStatus::Live || !self.entry.is_alive() {
            return Err(RegistryError::Invalidated {
                name: self.entry.name().to_string(),
                id: self.id,
            });
        }
        Ok(shared)
    }

    fn detach(&self) {
        if self.status.get() == HandleStatus::Live {
            self.entry.detach(self.id);
        }
    }
}

impl Drop for HandleCore {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for HandleCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("element", &self.entry.name())
            .field("id", &self.id)
            .field("status", &self.status.get())
            .finish()
    }
}

macro_rules! handle_common {
    ($handle:ident) => {
        impl $handle {
            /// Id of this handle within its element
            pub fn id(&self) -> HandleId {
                self.core.id
            }

            /// Name of the element this handle controls
            pub fn element(&self) -> &str {
                self.core.entry.name()
            }

            pub fn status(&self) -> HandleStatus {
                self.core.status.get()
            }

            pub fn is_valid(&self) -> bool {
                self.status() == HandleStatus::Live && self.core.entry.is_alive()
            }

            /// Detach from the element. A no-op if teardown got there first.
            pub fn release(self) -> RegistryResult<()> {
                self.core.detach();
                Ok(())
            }
        }

        impl fmt::Debug for $handle {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($handle)).field(&self.core).finish()
            }
        }
    };
}

/// Listener registration on a sink or app-sink
pub struct SinkHandle {
    core: HandleCore,
}

handle_common!(SinkHandle);

/// Exclusive feeder of an application source
pub struct SrcHandle {
    core: HandleCore,
}

handle_common!(SrcHandle);

impl SrcHandle {
    /// Stream format the source expects.
    ///
    /// Served from the entry cache; on a miss the engine is asked and the
    /// answer cached.
    pub fn tensors_info(&self) -> RegistryResult<TensorsInfo> {
        let shared = self.core.live()?;
        self.negotiated(&shared)?
            .ok_or_else(|| RegistryError::NotNegotiated(self.element().to_string()))
    }

    /// Cached format, else the engine's. Formats failing
    /// [`TensorsInfo::is_valid`] are rejected and never cached.
    fn negotiated(&self, shared: &PipelineShared) -> RegistryResult<Option<TensorsInfo>> {
        let entry = &self.core.entry;
        if let Some(info) = entry.tensors_info() {
            return Ok(Some(info));
        }

        let Some(info) = shared.engine().node_tensors_info(shared.graph(), entry.node()) else {
            return Ok(None);
        };
        if !info.is_valid() {
            return Err(RegistryError::UnusableFormat(
                entry.name().to_string(),
                format!("{} tensors, frame size {:?}", info.len(), info.frame_size()),
            ));
        }
        entry.set_tensors_info(info.clone());
        Ok(Some(info))
    }

    /// Push one frame into the source
    pub fn input_data(&self, data: TensorsData) -> RegistryResult<()> {
        let shared = self.core.live()?;
        let entry = &self.core.entry;

        if data.is_empty() || data.len() > MAX_TENSORS {
            return Err(RegistryError::InvalidPayload(format!(
                "expected 1 to {} tensors, got {}",
                MAX_TENSORS,
                data.len()
            )));
        }
        if let Some(info) = self.negotiated(&shared)? {
            info.check(&data).map_err(RegistryError::InvalidPayload)?;
        }

        tracing::trace!(parent: shared.span(), element = entry.name(), bytes = data.total_bytes(), "Input data");
        shared
            .engine()
            .push_data(shared.graph(), entry.node(), data)
            .map_err(RegistryError::from_engine)
    }
}

/// Exclusive controller of a stream switch
pub struct SwitchHandle {
    core: HandleCore,
}

handle_common!(SwitchHandle);

impl SwitchHandle {
    /// Names of the selectable pads
    pub fn pad_names(&self) -> RegistryResult<Vec<String>> {
        let shared = self.core.live()?;
        shared
            .engine()
            .pad_names(shared.graph(), self.core.entry.node())
            .map_err(RegistryError::from_engine)
    }

    /// Route the stream through `pad`
    pub fn select(&self, pad: &str) -> RegistryResult<()> {
        let shared = self.core.live()?;
        shared
            .engine()
            .select_pad(shared.graph(), self.core.entry.node(), pad)
            .map_err(RegistryError::from_engine)?;
        tracing::debug!(parent: shared.span(), element = self.element(), pad, "Switch pad selected");
        Ok(())
    }
}

/// Exclusive controller of a valve
pub struct ValveHandle {
    core: HandleCore,
}

handle_common!(ValveHandle);

impl ValveHandle {
    pub fn set_open(&self, open: bool) -> RegistryResult<()> {
        let shared = self.core.live()?;
        shared
            .engine()
            .set_valve_open(shared.graph(), self.core.entry.node(), open)
            .map_err(RegistryError::from_engine)?;
        tracing::debug!(parent: shared.span(), element = self.element(), open, "Valve toggled");
        Ok(())
    }
}

impl Pipeline {
    fn attach_handle(
        &self,
        name: &str,
        kind: HandleKind,
        listener: Option<Arc<dyn HandleListener>>,
    ) -> RegistryResult<HandleCore> {
        let entry = self.entry_for_kind(name, kind)?;
        let status = Arc::new(StatusFlag::live());
        let listener = match listener {
            Some(listener) => Some(
                self.shared
                    .bridge()
                    .wrap_listener(entry.name(), listener, &status)?,
            ),
            None => None,
        };
        let id = entry.attach_with_status(kind, listener, Arc::clone(&status))?;

        Ok(HandleCore {
            pipeline: Arc::downgrade(&self.shared),
            entry,
            id,
            status,
        })
    }

    /// Register a callback for new frames on a sink or app-sink
    pub fn register_sink<F>(&self, name: &str, callback: F) -> RegistryResult<SinkHandle>
    where
        F: Fn(&TensorsData) + Send + Sync + 'static,
    {
        self.register_sink_listener(name, Arc::new(FnListener(callback)))
    }

    /// Register a listener object on a sink or app-sink
    pub fn register_sink_listener(
        &self,
        name: &str,
        listener: Arc<dyn HandleListener>,
    ) -> RegistryResult<SinkHandle> {
        let core = self.attach_handle(name, HandleKind::SinkListener, Some(listener))?;
        Ok(SinkHandle { core })
    }

    /// Take the feeder role of an application source
    pub fn src_handle(&self, name: &str) -> RegistryResult<SrcHandle> {
        let core = self.attach_handle(name, HandleKind::SourceFeeder, None)?;
        Ok(SrcHandle { core })
    }

    /// Take the feeder role and receive need-data/enough-data events
    pub fn src_handle_with_listener(
        &self,
        name: &str,
        listener: Arc<dyn HandleListener>,
    ) -> RegistryResult<SrcHandle> {
        let core = self.attach_handle(name, HandleKind::SourceFeeder, Some(listener))?;
        Ok(SrcHandle { core })
    }

    pub fn switch_handle(&self, name: &str) -> RegistryResult<SwitchHandle> {
        let core = self.attach_handle(name, HandleKind::SwitchController, None)?;
        Ok(SwitchHandle { core })
    }

    pub fn valve_handle(&self, name: &str) -> RegistryResult<ValveHandle> {
        let core = self.attach_handle(name, HandleKind::ValveController, None)?;
        Ok(ValveHandle { core })
    }
}
