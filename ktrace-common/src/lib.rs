//! Record layouts shared between the kernel programs and userspace
//!
//! The kernel side writes these structures into a perf event array; the
//! userspace decoders in `ktrace` read them back positionally. Every
//! structure here must be:
//! - `#[repr(C)]` so field offsets match the C definitions
//! - `no_std` compatible
//! - exactly the size asserted at the bottom of this file

#![cfg_attr(not(feature = "userspace"), no_std)]

/// Length of `task_struct::comm`, including the trailing NUL
pub const TASK_COMM_LEN: usize = 16;

/// Length of the file name captured by fsslower, including the trailing NUL
pub const FILE_NAME_LEN: usize = 32;

/// Address family constants as carried in the `af` field
pub mod af {
    pub const INET: u32 = 2;
    pub const INET6: u32 = 10;
}

/// Name of the perf event array every program writes to
pub const EVENTS_MAP: &str = "events";

/// Name of the mount namespace filter map, replaced when a filter is configured
pub const MOUNT_NS_FILTER_MAP: &str = "mount_ns_filter";

/// fsslower record: one slow filesystem operation
///
/// Layout (96 bytes total, 8-byte aligned):
/// - delta_us: Operation latency in microseconds
/// - end_ns: Kernel timestamp at operation exit
/// - offset: File offset the operation started at
/// - size: Bytes requested (read/write) or 0
/// - mntns_id: Mount namespace of the calling task
/// - pid: Thread group id of the calling task
/// - op: One of [`fs_op`]
/// - file: NUL-terminated dentry name
/// - task: NUL-terminated command name
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct FsEventRecord {
    pub delta_us: u64,
    pub end_ns: u64,
    pub offset: i64,
    pub size: i64,
    pub mntns_id: u64,
    pub pid: u32,
    pub op: u32,
    pub file: [u8; FILE_NAME_LEN],
    pub task: [u8; TASK_COMM_LEN],
}

/// fsslower operation codes
pub mod fs_op {
    pub const READ: u32 = 0;
    pub const WRITE: u32 = 1;
    pub const OPEN: u32 = 2;
    pub const FSYNC: u32 = 3;
}

/// tcptracer record: one connect, accept or close
///
/// Layout (88 bytes total, 8-byte aligned). Addresses hold 4 bytes for
/// AF_INET and 16 bytes for AF_INET6, in network byte order. Ports are
/// stored in network byte order as well.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct TcpEventRecord {
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub task: [u8; TASK_COMM_LEN],
    pub ts_us: u64,
    pub af: u32,
    pub pid: u32,
    pub uid: u32,
    pub netns: u32,
    pub mntns_id: u64,
    pub dport: u16,
    pub sport: u16,
    pub event_type: u8,
    pub _padding: [u8; 3],
}

/// tcptracer event types
pub mod tcp_event_type {
    pub const CONNECT: u8 = 0;
    pub const ACCEPT: u8 = 1;
    pub const CLOSE: u8 = 2;
}

/// tcpconnect record: one outgoing connection attempt
///
/// Layout (80 bytes total, 8-byte aligned). Same address conventions as
/// [`TcpEventRecord`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct TcpConnectRecord {
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub task: [u8; TASK_COMM_LEN],
    pub ts_us: u64,
    pub af: u32,
    pub pid: u32,
    pub uid: u32,
    pub dport: u16,
    pub _padding: u16,
    pub mntns_id: u64,
}

const _: () = {
    assert!(
        core::mem::size_of::<FsEventRecord>() == 96,
        "FsEventRecord must be exactly 96 bytes"
    );
    assert!(
        core::mem::align_of::<FsEventRecord>() == 8,
        "FsEventRecord must be 8-byte aligned"
    );
};

const _: () = {
    assert!(
        core::mem::size_of::<TcpEventRecord>() == 88,
        "TcpEventRecord must be exactly 88 bytes"
    );
    assert!(
        core::mem::align_of::<TcpEventRecord>() == 8,
        "TcpEventRecord must be 8-byte aligned"
    );
};

const _: () = {
    assert!(
        core::mem::size_of::<TcpConnectRecord>() == 80,
        "TcpConnectRecord must be exactly 80 bytes"
    );
    assert!(
        core::mem::align_of::<TcpConnectRecord>() == 8,
        "TcpConnectRecord must be 8-byte aligned"
    );
};
