//! Per-CPU perf buffer reader with close-to-unblock semantics
//!
//! `read` blocks in `poll(2)` across every CPU buffer, waking up at a short
//! interval to observe `close`. Lost-sample counts reported by the kernel
//! surface as their own [`Record`] ahead of the samples that followed them.

use super::{Record, RecordReader};
use crate::error::ReadError;
use crate::{Error, Result};
use aya::maps::perf::{PerfEventArray, PerfEventArrayBuffer};
use aya::maps::MapData;
use aya::util::online_cpus;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// How long one `poll(2)` may block before `close` is re-checked
const POLL_INTERVAL_MS: libc::c_int = 100;

/// Scratch buffers handed to each `read_events` call
const READ_BATCH: usize = 16;

pub struct PerfReader {
    closed: AtomicBool,
    state: Mutex<PerfState>,
}

struct PerfState {
    buffers: Vec<(u32, PerfEventArrayBuffer<MapData>)>,
    scratch: Vec<BytesMut>,
    pending: VecDeque<Record>,
    _array: PerfEventArray<MapData>,
}

impl PerfReader {
    /// Open one buffer of `page_count` pages per online CPU
    pub fn open(mut array: PerfEventArray<MapData>, page_count: usize) -> Result<Self> {
        let cpus = online_cpus().map_err(|(msg, e)| {
            Error::BufferOpenFailed(format!("{}: {}", msg, e))
        })?;

        let mut buffers = Vec::with_capacity(cpus.len());
        for cpu in cpus {
            let buffer = array
                .open(cpu, Some(page_count))
                .map_err(|e| Error::BufferOpenFailed(format!("cpu {}: {}", cpu, e)))?;
            buffers.push((cpu, buffer));
        }

        debug!(
            "Opened perf buffers on {} CPUs ({} pages each)",
            buffers.len(),
            page_count
        );

        Ok(Self {
            closed: AtomicBool::new(false),
            state: Mutex::new(PerfState {
                buffers,
                scratch: (0..READ_BATCH).map(|_| BytesMut::with_capacity(1024)).collect(),
                pending: VecDeque::new(),
                _array: array,
            }),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl RecordReader for PerfReader {
    fn read(&self) -> std::result::Result<Record, ReadError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ReadError::Other("perf reader state poisoned".to_string()))?;

        loop {
            if self.is_closed() {
                return Err(ReadError::Closed);
            }
            if let Some(record) = state.pending.pop_front() {
                return Ok(record);
            }
            if state.wait_readable(POLL_INTERVAL_MS)? {
                state.drain()?;
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl PerfState {
    /// Returns whether any buffer became readable before the timeout
    fn wait_readable(&self, timeout_ms: libc::c_int) -> std::result::Result<bool, ReadError> {
        let mut fds: Vec<libc::pollfd> = self
            .buffers
            .iter()
            .map(|(_, buffer)| libc::pollfd {
                fd: buffer.as_fd().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        // SAFETY: fds points to fds.len() initialized pollfd entries that
        // stay alive for the duration of the call
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(ReadError::Io(err));
        }

        Ok(ret > 0)
    }

    fn drain(&mut self) -> std::result::Result<(), ReadError> {
        let PerfState {
            buffers,
            scratch,
            pending,
            ..
        } = self;

        for (cpu, buffer) in buffers.iter_mut() {
            while buffer.readable() {
                let events = buffer
                    .read_events(scratch)
                    .map_err(|e| ReadError::Other(e.to_string()))?;

                if events.lost > 0 {
                    pending.push_back(Record::lost(*cpu, events.lost as u64));
                }

                for sample in scratch.iter().take(events.read) {
                    pending.push_back(Record::sample(*cpu, Bytes::copy_from_slice(sample)));
                }
            }
        }

        Ok(())
    }
}
