//! The three tracers, expressed as data for the generic lifecycle controller
//!
//! A gadget names its program image, resolves the probes to attach from the
//! configuration, supplies the constants patched before load and decodes its
//! own record layout. Everything else is shared.

use crate::backend::{self, ProbeSpec, TCPCONNECT_PROBES, TCPTRACER_PROBES};
use crate::config::Config;
use crate::decode;
use crate::ebpf::{ConstValue, Constants};
use crate::error::DecodeError;
use crate::event::{Enrichable, FsEvent, TcpConnectEvent, TcpEvent};
use crate::{Error, Result};

/// Constant telling the kernel program to consult `mount_ns_filter`
pub const FILTER_BY_MNT_NS: &str = "filter_by_mnt_ns";

/// fsslower's latency threshold in nanoseconds
pub const MIN_LAT_NS: &str = "min_lat_ns";

pub trait Gadget: Send + Sync + 'static {
    type Event: Enrichable + Send + 'static;

    fn name(&self) -> &'static str;

    /// Program image handed to the loader
    fn image(&self) -> &'static str;

    /// Probes in attach order. Fails without side effects on a bad config.
    fn probes(&self, config: &Config) -> Result<Vec<ProbeSpec>>;

    /// Gadget-specific constants; `filter_by_mnt_ns` is added by the tracer
    fn constants(&self, config: &Config) -> Result<Constants>;

    fn decode(&self, raw: &[u8]) -> std::result::Result<Self::Event, DecodeError>;
}

/// Filesystem operations slower than a threshold
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSlower;

impl Gadget for FsSlower {
    type Event = FsEvent;

    fn name(&self) -> &'static str {
        "fsslower"
    }

    fn image(&self) -> &'static str {
        "fsslower"
    }

    fn probes(&self, config: &Config) -> Result<Vec<ProbeSpec>> {
        let backend = config.require_backend(self.name())?;
        Ok(backend::resolve(backend)?.probes())
    }

    fn constants(&self, config: &Config) -> Result<Constants> {
        let min_lat_ns = config.min_latency_ms.checked_mul(1_000_000).ok_or_else(|| {
            Error::ConfigError(format!(
                "min_latency_ms {} overflows nanoseconds",
                config.min_latency_ms
            ))
        })?;

        let mut constants = Constants::new();
        constants.insert(MIN_LAT_NS, ConstValue::U64(min_lat_ns));
        Ok(constants)
    }

    fn decode(&self, raw: &[u8]) -> std::result::Result<FsEvent, DecodeError> {
        decode::decode_fs(raw)
    }
}

/// TCP connect, accept and close
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTracer;

impl Gadget for TcpTracer {
    type Event = TcpEvent;

    fn name(&self) -> &'static str {
        "tcptracer"
    }

    fn image(&self) -> &'static str {
        "tcptracer"
    }

    fn probes(&self, _config: &Config) -> Result<Vec<ProbeSpec>> {
        Ok(TCPTRACER_PROBES.to_vec())
    }

    fn constants(&self, _config: &Config) -> Result<Constants> {
        Ok(Constants::new())
    }

    fn decode(&self, raw: &[u8]) -> std::result::Result<TcpEvent, DecodeError> {
        decode::decode_tcp(raw)
    }
}

/// Outgoing TCP connections
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnect;

impl Gadget for TcpConnect {
    type Event = TcpConnectEvent;

    fn name(&self) -> &'static str {
        "tcpconnect"
    }

    fn image(&self) -> &'static str {
        "tcpconnect"
    }

    fn probes(&self, _config: &Config) -> Result<Vec<ProbeSpec>> {
        Ok(TCPCONNECT_PROBES.to_vec())
    }

    fn constants(&self, _config: &Config) -> Result<Constants> {
        Ok(Constants::new())
    }

    fn decode(&self, raw: &[u8]) -> std::result::Result<TcpConnectEvent, DecodeError> {
        decode::decode_tcp_connect(raw)
    }
}
