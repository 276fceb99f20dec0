//! Seams to the kernel: program loading, probe attachment and perf reading
//!
//! The tracer core only talks to these traits. [`loader::AyaLoader`] backs
//! them with aya on Linux; tests back them with in-memory fakes.

pub mod maps;

#[cfg(target_os = "linux")]
pub mod loader;
#[cfg(target_os = "linux")]
pub mod perf;
#[cfg(target_os = "linux")]
pub mod preflight;

use crate::error::ReadError;
use crate::Result;
use bytes::Bytes;
use std::collections::BTreeMap;

pub use maps::{MapReplacements, PinnedMap};

/// Read-only constant patched into the program image before it is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstValue {
    Bool(bool),
    U64(u64),
}

impl ConstValue {
    /// Bytes as they must appear in the program's `.rodata` section
    pub fn to_ne_bytes(self) -> Vec<u8> {
        match self {
            ConstValue::Bool(v) => vec![u8::from(v)],
            ConstValue::U64(v) => v.to_ne_bytes().to_vec(),
        }
    }
}

pub type Constants = BTreeMap<&'static str, ConstValue>;

/// Turns a named, pre-built program image into a patchable spec
pub trait ProgramLoader {
    type Spec: ProgramSpec;

    fn load(&self, image: &str) -> Result<Self::Spec>;
}

/// A program image that has been read but not yet loaded into the kernel
pub trait ProgramSpec {
    type Program: LoadedProgram;

    fn rewrite_constants(&mut self, constants: &Constants) -> Result<()>;

    fn load_and_assign(self, replacements: &MapReplacements) -> Result<Self::Program>;
}

/// Programs and maps living in the kernel, owned by exactly one tracer
pub trait LoadedProgram: Send + 'static {
    type Link: Link;
    type Reader: RecordReader;

    /// Attach `program` to the entry of kernel function `target`
    fn attach_enter(&mut self, target: &str, program: &str) -> Result<Self::Link>;

    /// Attach `program` to the return of kernel function `target`
    fn attach_exit(&mut self, target: &str, program: &str) -> Result<Self::Link>;

    fn open_reader(&mut self, map: &str, page_count: usize) -> Result<Self::Reader>;

    /// Release programs and maps. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// An attached probe. Closing detaches it; closing twice is a no-op.
pub trait Link: Send + 'static {
    fn close(&mut self) -> Result<()>;
}

/// Blocking source of raw records
///
/// `close` may be called from another thread while `read` is blocked; the
/// blocked call and every later call must then return [`ReadError::Closed`].
pub trait RecordReader: Send + Sync + 'static {
    fn read(&self) -> std::result::Result<Record, ReadError>;

    fn close(&self) -> Result<()>;
}

/// One unit handed out by a [`RecordReader`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub cpu: u32,
    /// Samples the kernel dropped before this record; `raw_sample` is empty when set
    pub lost_samples: u64,
    pub raw_sample: Bytes,
}

impl Record {
    pub fn sample(cpu: u32, raw_sample: impl Into<Bytes>) -> Self {
        Self {
            cpu,
            lost_samples: 0,
            raw_sample: raw_sample.into(),
        }
    }

    pub fn lost(cpu: u32, lost_samples: u64) -> Self {
        Self {
            cpu,
            lost_samples,
            raw_sample: Bytes::new(),
        }
    }
}
