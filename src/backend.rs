//! Static tables mapping logical operations onto kernel probe targets

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// kprobe on function entry
    Enter,
    /// kretprobe on function return
    Exit,
}

/// One attachment: which program slot goes on which kernel function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeSpec {
    pub kind: ProbeKind,
    pub target: &'static str,
    pub program: &'static str,
}

impl ProbeSpec {
    pub const fn enter(target: &'static str, program: &'static str) -> Self {
        Self {
            kind: ProbeKind::Enter,
            target,
            program,
        }
    }

    pub const fn exit(target: &'static str, program: &'static str) -> Self {
        Self {
            kind: ProbeKind::Exit,
            target,
            program,
        }
    }
}

impl std::fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ProbeKind::Enter => "kprobe",
            ProbeKind::Exit => "kretprobe",
        };
        write!(f, "{}:{} ({})", kind, self.target, self.program)
    }
}

/// Kernel functions implementing the four traced operations of one filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsTargets {
    pub read: &'static str,
    pub write: &'static str,
    pub open: &'static str,
    pub sync: &'static str,
}

impl FsTargets {
    /// Probes in attach order: read, write, open, sync; entry before return
    pub fn probes(&self) -> Vec<ProbeSpec> {
        vec![
            ProbeSpec::enter(self.read, "ig_fssl_read_e"),
            ProbeSpec::exit(self.read, "ig_fssl_read_x"),
            ProbeSpec::enter(self.write, "ig_fssl_wr_e"),
            ProbeSpec::exit(self.write, "ig_fssl_wr_x"),
            ProbeSpec::enter(self.open, "ig_fssl_open_e"),
            ProbeSpec::exit(self.open, "ig_fssl_open_x"),
            ProbeSpec::enter(self.sync, "ig_fssl_sync_e"),
            ProbeSpec::exit(self.sync, "ig_fssl_sync_x"),
        ]
    }
}

pub const FILESYSTEMS: &[(&str, FsTargets)] = &[
    (
        "btrfs",
        FsTargets {
            read: "btrfs_file_read_iter",
            write: "btrfs_file_write_iter",
            open: "btrfs_file_open",
            sync: "btrfs_sync_file",
        },
    ),
    (
        "ext4",
        FsTargets {
            read: "ext4_file_read_iter",
            write: "ext4_file_write_iter",
            open: "ext4_file_open",
            sync: "ext4_sync_file",
        },
    ),
    (
        "nfs",
        FsTargets {
            read: "nfs_file_read",
            write: "nfs_file_write",
            open: "nfs_file_open",
            sync: "nfs_file_fsync",
        },
    ),
    (
        "xfs",
        FsTargets {
            read: "xfs_file_read_iter",
            write: "xfs_file_write_iter",
            open: "xfs_file_open",
            sync: "xfs_file_fsync",
        },
    ),
];

/// Look up the targets for a filesystem by exact name
pub fn resolve(backend: &str) -> Result<&'static FsTargets> {
    FILESYSTEMS
        .iter()
        .find(|(name, _)| *name == backend)
        .map(|(_, targets)| targets)
        .ok_or_else(|| Error::UnsupportedBackend(backend.to_string()))
}

pub fn supported_filesystems() -> impl Iterator<Item = &'static str> {
    FILESYSTEMS.iter().map(|(name, _)| *name)
}

pub const TCPTRACER_PROBES: &[ProbeSpec] = &[
    ProbeSpec::enter("tcp_v4_connect", "ig_tcp_v4_co_e"),
    ProbeSpec::exit("tcp_v4_connect", "ig_tcp_v4_co_x"),
    ProbeSpec::enter("tcp_v6_connect", "ig_tcp_v6_co_e"),
    ProbeSpec::exit("tcp_v6_connect", "ig_tcp_v6_co_x"),
    ProbeSpec::enter("tcp_close", "ig_tcp_close"),
    ProbeSpec::enter("tcp_set_state", "ig_tcp_state"),
    ProbeSpec::exit("inet_csk_accept", "ig_tcp_accept"),
];

pub const TCPCONNECT_PROBES: &[ProbeSpec] = &[
    ProbeSpec::enter("tcp_v4_connect", "ig_tcpc_v4_co_e"),
    ProbeSpec::exit("tcp_v4_connect", "ig_tcpc_v4_co_x"),
    ProbeSpec::enter("tcp_v6_connect", "ig_tcpc_v6_co_e"),
    ProbeSpec::exit("tcp_v6_connect", "ig_tcpc_v6_co_x"),
];
