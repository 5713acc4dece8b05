//! Shared types for handles, modes, scalars, and launch arguments

use std::collections::BTreeMap;
use std::fmt;

/// Handle to a device-resident buffer
///
/// Buffers are opaque handles managed by the owning driver.
/// Use [`crate::driver::Driver`] methods to interact with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Execution mode selecting a concrete driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Inline execution on the calling thread
    Sequential,
    /// Fixed-size worker pool distributing the launch index range
    HostParallel,
    /// Host-side submission queue with an explicit completion barrier
    Stream,
    /// NVIDIA accelerator tag; recognized, available only when vendor
    /// support is compiled in
    Cuda,
}

impl Mode {
    /// Parse a configuration mode tag
    pub fn parse(tag: &str) -> Option<Mode> {
        match tag {
            "sequential" => Some(Mode::Sequential),
            "host-parallel" => Some(Mode::HostParallel),
            "stream" => Some(Mode::Stream),
            "cuda" => Some(Mode::Cuda),
            _ => None,
        }
    }

    /// The configuration tag for this mode
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Sequential => "sequential",
            Mode::HostParallel => "host-parallel",
            Mode::Stream => "stream",
            Mode::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index-range scheduling policy for the host-parallel driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// Fixed-size chunks handed out in order
    #[default]
    Static,
    /// Fixed-size chunks claimed by idle workers
    Dynamic,
    /// One contiguous span per worker
    Compact,
}

impl Schedule {
    /// Parse a `schedule` setting value
    pub fn parse(tag: &str) -> Option<Schedule> {
        match tag {
            "static" => Some(Schedule::Static),
            "dynamic" => Some(Schedule::Dynamic),
            "compact" => Some(Schedule::Compact),
            _ => None,
        }
    }

    /// The configuration tag for this policy
    pub const fn as_str(self) -> &'static str {
        match self {
            Schedule::Static => "static",
            Schedule::Dynamic => "dynamic",
            Schedule::Compact => "compact",
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element type of a scalar kernel argument or a typed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I32,
    I64,
    F32,
    F64,
}

impl ScalarType {
    /// Size of one element in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::F64 => 8,
        }
    }

    /// The kernel-language name of this type
    pub const fn as_str(self) -> &'static str {
        match self {
            ScalarType::I32 => "int",
            ScalarType::I64 => "long",
            ScalarType::F32 => "float",
            ScalarType::F64 => "double",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar value passed to a kernel launch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ScalarValue {
    /// The type of this value
    pub const fn scalar_type(self) -> ScalarType {
        match self {
            ScalarValue::I32(_) => ScalarType::I32,
            ScalarValue::I64(_) => ScalarType::I64,
            ScalarValue::F32(_) => ScalarType::F32,
            ScalarValue::F64(_) => ScalarType::F64,
        }
    }

    /// Convert to `target` if the conversion is exact or widening.
    ///
    /// Allowed widenings are `int → long` and `float → double`; anything
    /// else returns `None` and the caller reports a type mismatch.
    pub fn widen_to(self, target: ScalarType) -> Option<ScalarValue> {
        match (self, target) {
            (v, t) if v.scalar_type() == t => Some(v),
            (ScalarValue::I32(v), ScalarType::I64) => Some(ScalarValue::I64(v as i64)),
            (ScalarValue::F32(v), ScalarType::F64) => Some(ScalarValue::F64(v as f64)),
            _ => None,
        }
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::I32(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::I64(v)
    }
}

impl From<f32> for ScalarValue {
    fn from(v: f32) -> Self {
        ScalarValue::F32(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::F64(v)
    }
}

/// Marshalled launch argument handed to a driver
///
/// The core runtime validates and lowers user-facing arguments into this
/// closed sum before any driver call is issued.
#[derive(Debug, Clone, Copy)]
pub enum LaunchArg {
    Scalar(ScalarValue),
    Buffer(BufferHandle),
}

/// Options applied when compiling a kernel
///
/// `defines` bind names to literal values visible inside kernel
/// expressions; they participate in the kernel fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BuildOptions {
    /// Name → literal bindings injected into the kernel
    pub defines: BTreeMap<String, String>,
}

impl BuildOptions {
    /// Create empty build options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a define binding
    pub fn define(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.defines.insert(name.into(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_handle() {
        let handle = BufferHandle::new(42);
        assert_eq!(handle.id(), 42);
        assert_eq!(handle.to_string(), "buf42");
    }

    #[test]
    fn test_mode_tags_round_trip() {
        for mode in [Mode::Sequential, Mode::HostParallel, Mode::Stream, Mode::Cuda] {
            assert_eq!(Mode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(Mode::parse("Serial"), None);
        assert_eq!(Mode::parse(""), None);
    }

    #[test]
    fn test_schedule_tags() {
        assert_eq!(Schedule::parse("static"), Some(Schedule::Static));
        assert_eq!(Schedule::parse("dynamic"), Some(Schedule::Dynamic));
        assert_eq!(Schedule::parse("compact"), Some(Schedule::Compact));
        assert_eq!(Schedule::parse("guided"), None);
        assert_eq!(Schedule::default(), Schedule::Static);
    }

    #[test]
    fn test_scalar_widening() {
        assert_eq!(
            ScalarValue::I32(7).widen_to(ScalarType::I64),
            Some(ScalarValue::I64(7))
        );
        assert_eq!(
            ScalarValue::F32(1.5).widen_to(ScalarType::F64),
            Some(ScalarValue::F64(1.5))
        );
        assert_eq!(ScalarValue::I64(7).widen_to(ScalarType::I32), None);
        assert_eq!(ScalarValue::F64(1.5).widen_to(ScalarType::F32), None);
        assert_eq!(ScalarValue::I32(7).widen_to(ScalarType::F32), None);
    }

    #[test]
    fn test_build_options_defines() {
        let options = BuildOptions::new().define("TILE", 16).define("ALPHA", "0.5");
        assert_eq!(options.defines.get("TILE").map(String::as_str), Some("16"));
        assert_eq!(options.defines.get("ALPHA").map(String::as_str), Some("0.5"));
        assert_ne!(options, BuildOptions::new());
    }
}
