//! Positional decoders for the fixed-layout kernel records
//!
//! Each decoder checks the length first, then walks the record field by
//! field with the widths and byte order the kernel program writes. Integer
//! fields are little-endian (bpfel); ports and addresses are network order.
//! Samples may carry trailing padding past the record size, which is ignored.

use crate::error::DecodeError;
use crate::event::{CommonData, FsEvent, FsOp, TcpConnectEvent, TcpEvent, TcpOperation};
use bytes::Buf;
use ktrace_common::{
    af, fs_op, tcp_event_type, FsEventRecord, TcpConnectRecord, TcpEventRecord, FILE_NAME_LEN,
    TASK_COMM_LEN,
};
use std::mem::size_of;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const FS_RECORD_SIZE: usize = size_of::<FsEventRecord>();
pub const TCP_RECORD_SIZE: usize = size_of::<TcpEventRecord>();
pub const TCP_CONNECT_RECORD_SIZE: usize = size_of::<TcpConnectRecord>();

fn check_len(raw: &[u8], expected: usize) -> Result<&[u8], DecodeError> {
    raw.get(..expected).ok_or(DecodeError::Truncated {
        expected,
        actual: raw.len(),
    })
}

/// Read a fixed-size char array, stopping at the first NUL
fn get_c_string<const N: usize>(buf: &mut &[u8]) -> String {
    let mut field = [0u8; N];
    buf.copy_to_slice(&mut field);
    let end = field.iter().position(|&b| b == 0).unwrap_or(N);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn get_addr_bytes(buf: &mut &[u8]) -> [u8; 16] {
    let mut addr = [0u8; 16];
    buf.copy_to_slice(&mut addr);
    addr
}

/// Interpret a 16-byte address slot according to the record's family tag
fn ip_addr(family: u32, raw: [u8; 16]) -> Result<IpAddr, DecodeError> {
    match family {
        af::INET => Ok(IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))),
        af::INET6 => Ok(IpAddr::V6(Ipv6Addr::from(raw))),
        other => Err(DecodeError::UnknownAddressFamily(other)),
    }
}

fn ip_version(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 4,
        IpAddr::V6(_) => 6,
    }
}

pub fn fs_op_from_code(code: u32) -> Result<FsOp, DecodeError> {
    match code {
        fs_op::READ => Ok(FsOp::Read),
        fs_op::WRITE => Ok(FsOp::Write),
        fs_op::OPEN => Ok(FsOp::Open),
        fs_op::FSYNC => Ok(FsOp::Fsync),
        other => Err(DecodeError::UnknownOperation(other)),
    }
}

pub fn tcp_operation_from_code(code: u8) -> Result<TcpOperation, DecodeError> {
    match code {
        tcp_event_type::CONNECT => Ok(TcpOperation::Connect),
        tcp_event_type::ACCEPT => Ok(TcpOperation::Accept),
        tcp_event_type::CLOSE => Ok(TcpOperation::Close),
        other => Err(DecodeError::UnknownOperation(u32::from(other))),
    }
}

/// Decode an fsslower record ([`FsEventRecord`])
pub fn decode_fs(raw: &[u8]) -> Result<FsEvent, DecodeError> {
    let mut buf = check_len(raw, FS_RECORD_SIZE)?;

    let delta_us = buf.get_u64_le();
    let _end_ns = buf.get_u64_le();
    let offset = buf.get_i64_le();
    let size = buf.get_i64_le();
    let mntns_id = buf.get_u64_le();
    let pid = buf.get_u32_le();
    let op = fs_op_from_code(buf.get_u32_le())?;
    let file = get_c_string::<FILE_NAME_LEN>(&mut buf);
    let comm = get_c_string::<TASK_COMM_LEN>(&mut buf);

    Ok(FsEvent {
        common: CommonData::default(),
        mntns_id,
        pid,
        comm,
        op,
        // ssize_t on the kernel side; reinterpreted as an unsigned count
        bytes: size as u64,
        offset,
        latency_us: delta_us,
        file,
    })
}

/// Decode a tcptracer record ([`TcpEventRecord`])
pub fn decode_tcp(raw: &[u8]) -> Result<TcpEvent, DecodeError> {
    let mut buf = check_len(raw, TCP_RECORD_SIZE)?;

    let saddr = get_addr_bytes(&mut buf);
    let daddr = get_addr_bytes(&mut buf);
    let comm = get_c_string::<TASK_COMM_LEN>(&mut buf);
    let _ts_us = buf.get_u64_le();
    let family = buf.get_u32_le();
    let pid = buf.get_u32_le();
    let uid = buf.get_u32_le();
    let _netns = buf.get_u32_le();
    let mntns_id = buf.get_u64_le();
    let dport = buf.get_u16();
    let sport = buf.get_u16();
    let operation = tcp_operation_from_code(buf.get_u8())?;

    let saddr = ip_addr(family, saddr)?;
    let daddr = ip_addr(family, daddr)?;

    Ok(TcpEvent {
        common: CommonData::default(),
        mntns_id,
        pid,
        uid,
        comm,
        ip_version: ip_version(&saddr),
        saddr,
        daddr,
        sport,
        dport,
        operation,
    })
}

/// Decode a tcpconnect record ([`TcpConnectRecord`])
pub fn decode_tcp_connect(raw: &[u8]) -> Result<TcpConnectEvent, DecodeError> {
    let mut buf = check_len(raw, TCP_CONNECT_RECORD_SIZE)?;

    let saddr = get_addr_bytes(&mut buf);
    let daddr = get_addr_bytes(&mut buf);
    let comm = get_c_string::<TASK_COMM_LEN>(&mut buf);
    let _ts_us = buf.get_u64_le();
    let family = buf.get_u32_le();
    let pid = buf.get_u32_le();
    let uid = buf.get_u32_le();
    let dport = buf.get_u16();
    buf.advance(2);
    let mntns_id = buf.get_u64_le();

    let saddr = ip_addr(family, saddr)?;
    let daddr = ip_addr(family, daddr)?;

    Ok(TcpConnectEvent {
        common: CommonData::default(),
        mntns_id,
        pid,
        uid,
        comm,
        ip_version: ip_version(&saddr),
        saddr,
        daddr,
        dport,
    })
}
