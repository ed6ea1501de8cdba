//! Core data types for mlpipe-rs
//!
//! This module contains the fundamental data structures shared by the
//! registry, the engine boundary and applications.
//!
//! # Main Types
//!
//! - [`ElementRole`] - Fixed classification of a controllable element
//! - [`HandleKind`] - The capability an application handle grants
//! - [`PipelineState`] - Engine-reported state of a whole graph
//! - [`TensorsInfo`] - Cached stream-format metadata of an element
//! - [`TensorsData`] - One frame of buffers flowing through an element
//!
//! # Roles and Handles
//!
//! Every role accepts exactly one handle kind:
//!
//! | Role                          | Handle kind        | Exclusive |
//! |-------------------------------|--------------------|-----------|
//! | `Sink`, `AppSink`             | `SinkListener`     | no        |
//! | `AppSrc`                      | `SourceFeeder`     | yes       |
//! | `Valve`                       | `ValveController`  | yes       |
//! | `SwitchInput`, `SwitchOutput` | `SwitchController` | yes       |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of tensors carried by one frame.
pub const MAX_TENSORS: usize = 16;

/// Maximum tensor rank.
pub const TENSOR_RANK_LIMIT: usize = 4;

/// Classification of a controllable element. Immutable once an entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementRole {
    /// Tensor sink emitting new-data events
    Sink,
    /// Application source fed by the application
    AppSrc,
    /// Application sink emitting new-data events
    AppSink,
    /// Valve that can drop or pass the stream
    Valve,
    /// Input selector (N:1)
    SwitchInput,
    /// Output selector (1:N)
    SwitchOutput,
}

impl ElementRole {
    /// The handle kind this role accepts
    pub fn handle_kind(self) -> HandleKind {
        match self {
            ElementRole::Sink | ElementRole::AppSink => HandleKind::SinkListener,
            ElementRole::AppSrc => HandleKind::SourceFeeder,
            ElementRole::Valve => HandleKind::ValveController,
            ElementRole::SwitchInput | ElementRole::SwitchOutput => HandleKind::SwitchController,
        }
    }

    /// Whether a handle of `kind` may attach to an element of this role
    pub fn accepts(self, kind: HandleKind) -> bool {
        self.handle_kind() == kind
    }

    pub fn label(self) -> &'static str {
        match self {
            ElementRole::Sink => "sink",
            ElementRole::AppSrc => "app-src",
            ElementRole::AppSink => "app-sink",
            ElementRole::Valve => "valve",
            ElementRole::SwitchInput => "switch-input",
            ElementRole::SwitchOutput => "switch-output",
        }
    }
}

impl fmt::Display for ElementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Capability granted by an application handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    SinkListener,
    SourceFeeder,
    SwitchController,
    ValveController,
}

impl HandleKind {
    /// Exclusive kinds allow at most one live handle per element.
    pub fn is_exclusive(self) -> bool {
        !matches!(self, HandleKind::SinkListener)
    }

    pub fn label(self) -> &'static str {
        match self {
            HandleKind::SinkListener => "sink-listener",
            HandleKind::SourceFeeder => "source-feeder",
            HandleKind::SwitchController => "switch-controller",
            HandleKind::ValveController => "valve-controller",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Engine-reported state of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Unknown,
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Unknown => "unknown",
            PipelineState::Null => "null",
            PipelineState::Ready => "ready",
            PipelineState::Paused => "paused",
            PipelineState::Playing => "playing",
        };
        f.write_str(s)
    }
}

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TensorType {
    Int8,
    #[default]
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl TensorType {
    /// Size of one element in bytes
    pub fn byte_size(self) -> usize {
        match self {
            TensorType::Int8 | TensorType::UInt8 => 1,
            TensorType::Int16 | TensorType::UInt16 => 2,
            TensorType::Int32 | TensorType::UInt32 | TensorType::Float32 => 4,
            TensorType::Int64 | TensorType::UInt64 | TensorType::Float64 => 8,
        }
    }
}

/// Metadata of a single tensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Optional tensor name
    #[serde(default)]
    pub name: Option<String>,
    /// Element type
    pub tensor_type: TensorType,
    /// Dimensions, innermost first. Unused ranks are 1.
    pub dimension: [u32; TENSOR_RANK_LIMIT],
}

impl TensorInfo {
    /// Create tensor metadata. Missing trailing dimensions default to 1.
    pub fn new(tensor_type: TensorType, dims: &[u32]) -> Self {
        let mut dimension = [1; TENSOR_RANK_LIMIT];
        for (slot, d) in dimension.iter_mut().zip(dims.iter()) {
            *slot = *d;
        }
        Self {
            name: None,
            tensor_type,
            dimension,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of elements in this tensor, `None` if it overflows `usize`
    pub fn element_count(&self) -> Option<usize> {
        self.dimension
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d as usize))
    }

    /// Expected buffer size in bytes, `None` if it overflows `usize`
    pub fn byte_size(&self) -> Option<usize> {
        self.element_count()?
            .checked_mul(self.tensor_type.byte_size())
    }

    /// Every dimension is non-zero and the buffer size is representable
    pub fn is_valid(&self) -> bool {
        self.dimension.iter().all(|d| *d > 0) && self.byte_size().is_some()
    }
}

/// Stream-format metadata of one element: the tensors of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TensorsInfo {
    pub tensors: Vec<TensorInfo>,
}

impl TensorsInfo {
    pub fn new(tensors: Vec<TensorInfo>) -> Self {
        Self { tensors }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Non-empty, at most [`MAX_TENSORS`] tensors, all of them valid, and a
    /// representable frame size
    pub fn is_valid(&self) -> bool {
        !self.tensors.is_empty()
            && self.tensors.len() <= MAX_TENSORS
            && self.tensors.iter().all(TensorInfo::is_valid)
            && self.frame_size().is_some()
    }

    /// Total frame size in bytes, `None` if it overflows `usize`
    pub fn frame_size(&self) -> Option<usize> {
        self.tensors
            .iter()
            .try_fold(0usize, |acc, t| acc.checked_add(t.byte_size()?))
    }

    /// Check that `data` carries exactly one correctly sized buffer per tensor.
    ///
    /// Returns a description of the first mismatch.
    pub fn check(&self, data: &TensorsData) -> std::result::Result<(), String> {
        if data.len() != self.len() {
            return Err(format!(
                "expected {} tensors, got {}",
                self.len(),
                data.len()
            ));
        }
        for (i, (info, buf)) in self.tensors.iter().zip(data.buffers.iter()).enumerate() {
            let Some(expected) = info.byte_size() else {
                return Err(format!("tensor {} size overflows", i));
            };
            if expected != buf.len() {
                return Err(format!(
                    "tensor {} expects {} bytes, got {}",
                    i,
                    expected,
                    buf.len()
                ));
            }
        }
        Ok(())
    }
}

/// One frame of tensor buffers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TensorsData {
    pub buffers: Vec<Vec<u8>>,
}

impl TensorsData {
    pub fn new(buffers: Vec<Vec<u8>>) -> Self {
        Self { buffers }
    }

    /// A frame holding a single buffer
    pub fn single(buffer: impl Into<Vec<u8>>) -> Self {
        Self {
            buffers: vec![buffer.into()],
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Sum of all buffer sizes in bytes
    pub fn total_bytes(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_handle_kinds() {
        assert_eq!(ElementRole::Sink.handle_kind(), HandleKind::SinkListener);
        assert_eq!(ElementRole::AppSink.handle_kind(), HandleKind::SinkListener);
        assert_eq!(ElementRole::AppSrc.handle_kind(), HandleKind::SourceFeeder);
        assert_eq!(ElementRole::Valve.handle_kind(), HandleKind::ValveController);
        assert!(ElementRole::SwitchInput.accepts(HandleKind::SwitchController));
        assert!(ElementRole::SwitchOutput.accepts(HandleKind::SwitchController));
        assert!(!ElementRole::Valve.accepts(HandleKind::SinkListener));
    }

    #[test]
    fn test_exclusive_kinds() {
        assert!(!HandleKind::SinkListener.is_exclusive());
        assert!(HandleKind::SourceFeeder.is_exclusive());
        assert!(HandleKind::SwitchController.is_exclusive());
        assert!(HandleKind::ValveController.is_exclusive());
    }

    #[test]
    fn test_tensor_sizes() {
        let info = TensorInfo::new(TensorType::Float32, &[3, 224, 224]);
        assert_eq!(info.dimension, [3, 224, 224, 1]);
        assert_eq!(info.element_count(), Some(3 * 224 * 224));
        assert_eq!(info.byte_size(), Some(3 * 224 * 224 * 4));
    }

    #[test]
    fn test_oversized_tensor_is_rejected() {
        let huge = TensorInfo::new(TensorType::Float64, &[65536; 4]);
        assert_eq!(huge.element_count(), None);
        assert_eq!(huge.byte_size(), None);
        assert!(!huge.is_valid());

        let info = TensorsInfo::new(vec![huge]);
        assert!(!info.is_valid());
        assert_eq!(info.frame_size(), None);
        let err = info.check(&TensorsData::single(vec![0; 4])).unwrap_err();
        assert!(err.contains("overflows"));
    }

    #[test]
    fn test_tensors_info_validity() {
        assert!(!TensorsInfo::default().is_valid());

        let ok = TensorsInfo::new(vec![TensorInfo::new(TensorType::UInt8, &[4])]);
        assert!(ok.is_valid());

        let zero_dim = TensorsInfo::new(vec![TensorInfo::new(TensorType::UInt8, &[0])]);
        assert!(!zero_dim.is_valid());

        let too_many = TensorsInfo::new(vec![
            TensorInfo::new(TensorType::UInt8, &[1]);
            MAX_TENSORS + 1
        ]);
        assert!(!too_many.is_valid());
    }

    #[test]
    fn test_tensors_info_check() {
        let info = TensorsInfo::new(vec![
            TensorInfo::new(TensorType::UInt8, &[4]),
            TensorInfo::new(TensorType::Int16, &[2]),
        ]);
        assert_eq!(info.frame_size(), Some(8));

        let good = TensorsData::new(vec![vec![0; 4], vec![0; 4]]);
        assert!(info.check(&good).is_ok());

        let wrong_count = TensorsData::single(vec![0; 4]);
        assert!(info.check(&wrong_count).unwrap_err().contains("expected 2 tensors"));

        let wrong_size = TensorsData::new(vec![vec![0; 4], vec![0; 3]]);
        assert!(info.check(&wrong_size).unwrap_err().contains("tensor 1"));
    }

    #[test]
    fn test_role_serde_names() {
        let json = serde_json::to_string(&ElementRole::SwitchOutput).unwrap();
        assert_eq!(json, "\"switch_output\"");
        let role: ElementRole = serde_json::from_str("\"app_src\"").unwrap();
        assert_eq!(role, ElementRole::AppSrc);
    }
}
