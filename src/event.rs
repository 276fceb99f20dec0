//! Decoded events and the callback surface they are delivered through

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Workload identity attached by an [`crate::enrich::Enricher`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonData {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub node: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub pod: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub container: String,
}

/// Events carrying a mount namespace id can be enriched
pub trait Enrichable {
    fn mntns_id(&self) -> u64;

    fn common_mut(&mut self) -> &mut CommonData;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsOp {
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "W")]
    Write,
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "F")]
    Fsync,
}

impl FsOp {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FsOp::Read => "R",
            FsOp::Write => "W",
            FsOp::Open => "O",
            FsOp::Fsync => "F",
        }
    }
}

impl std::fmt::Display for FsOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A filesystem operation slower than the configured threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsEvent {
    #[serde(flatten)]
    pub common: CommonData,
    pub mntns_id: u64,
    pub pid: u32,
    pub comm: String,
    pub op: FsOp,
    pub bytes: u64,
    pub offset: i64,
    pub latency_us: u64,
    pub file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpOperation {
    Connect,
    Accept,
    Close,
}

impl TcpOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TcpOperation::Connect => "connect",
            TcpOperation::Accept => "accept",
            TcpOperation::Close => "close",
        }
    }
}

impl std::fmt::Display for TcpOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpEvent {
    #[serde(flatten)]
    pub common: CommonData,
    pub mntns_id: u64,
    pub pid: u32,
    pub uid: u32,
    pub comm: String,
    pub ip_version: u8,
    pub saddr: IpAddr,
    pub daddr: IpAddr,
    pub sport: u16,
    pub dport: u16,
    pub operation: TcpOperation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConnectEvent {
    #[serde(flatten)]
    pub common: CommonData,
    pub mntns_id: u64,
    pub pid: u32,
    pub uid: u32,
    pub comm: String,
    pub ip_version: u8,
    pub saddr: IpAddr,
    pub daddr: IpAddr,
    pub dport: u16,
}

macro_rules! impl_enrichable {
    ($($ty:ty),+) => {
        $(
            impl Enrichable for $ty {
                fn mntns_id(&self) -> u64 {
                    self.mntns_id
                }

                fn common_mut(&mut self) -> &mut CommonData {
                    &mut self.common
                }
            }
        )+
    };
}

impl_enrichable!(FsEvent, TcpEvent, TcpConnectEvent);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Out-of-band condition reported in place of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "error: {}", self.message),
            Severity::Warning => write!(f, "warning: {}", self.message),
        }
    }
}

/// Everything a tracer can hand to its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output<E> {
    Event(E),
    Notice(Notice),
}

/// Receiver of decoded events and notices
///
/// Called synchronously on the consumer thread, once per consumed record or
/// condition. Slow work belongs on the other side of a channel; while a call
/// is in progress nothing drains the kernel buffers.
pub trait EventSink<E>: Send + 'static {
    fn on_event(&mut self, event: E);

    fn on_notice(&mut self, notice: Notice);
}

impl<E, F> EventSink<E> for F
where
    F: FnMut(Output<E>) + Send + 'static,
{
    fn on_event(&mut self, event: E) {
        self(Output::Event(event))
    }

    fn on_notice(&mut self, notice: Notice) {
        self(Output::Notice(notice))
    }
}
