//! ktrace - kernel event tracer
//!
//! Attaches kprobes for a gadget (fsslower, tcptracer, tcpconnect), reads
//! the fixed-layout records the kernel programs emit, and hands decoded,
//! optionally enriched events to a caller-supplied sink.

pub mod attach;
pub mod backend;
#[cfg(target_os = "linux")]
pub mod cli;
pub mod config;
pub mod consumer;
pub mod decode;
pub mod ebpf;
pub mod enrich;
pub mod error;
pub mod event;
pub mod gadget;
pub mod tracer;

pub use config::Config;
pub use error::{DecodeError, Error, ReadError, Result};
pub use event::{EventSink, Notice, Output, Severity};
pub use gadget::{FsSlower, Gadget, TcpConnect, TcpTracer};
pub use tracer::{Tracer, TracerState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
