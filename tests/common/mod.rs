//! In-memory stand-ins for the kernel side, recording every call

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use ktrace::ebpf::{
    Constants, Link, LoadedProgram, MapReplacements, PinnedMap, ProgramLoader, ProgramSpec,
    Record, RecordReader,
};
use ktrace::event::{Notice, Output};
use ktrace::{Error, ReadError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Records queued for the fake reader; `read` blocks until one arrives or
/// the reader is closed
#[derive(Default)]
pub struct Feed {
    state: Mutex<FeedState>,
    ready: Condvar,
}

#[derive(Default)]
struct FeedState {
    items: VecDeque<std::result::Result<Record, ReadError>>,
    closed: bool,
}

impl Feed {
    pub fn push(&self, record: Record) {
        self.enqueue(Ok(record));
    }

    pub fn fail(&self, err: ReadError) {
        self.enqueue(Err(err));
    }

    fn enqueue(&self, item: std::result::Result<Record, ReadError>) {
        self.state.lock().unwrap().items.push_back(item);
        self.ready.notify_all();
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn read(&self) -> std::result::Result<Record, ReadError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(ReadError::Closed);
            }
            if let Some(item) = state.items.pop_front() {
                return item;
            }
            state = self.ready.wait(state).unwrap();
        }
    }
}

/// Shared record of everything the tracer asked of the kernel side
#[derive(Default)]
pub struct FakeBackend {
    pub fail_load: bool,
    pub fail_attach_on: Option<&'static str>,
    pub fail_open_reader: bool,
    pub fail_program_close: bool,
    pub feed: Arc<Feed>,
    pub log: Mutex<Vec<String>>,
    pub constants: Mutex<Option<Constants>>,
    pub replacements: Mutex<Option<MapReplacements>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    /// Every call, in the order it was made
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Entries starting with `prefix`, with the prefix stripped
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.log()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix))
            .map(str::to_string)
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    pub fn constants(&self) -> Option<Constants> {
        self.constants.lock().unwrap().clone()
    }

    pub fn replacements(&self) -> Option<MapReplacements> {
        self.replacements.lock().unwrap().clone()
    }

    pub fn loader(self: &Arc<Self>) -> FakeLoader {
        FakeLoader(self.clone())
    }
}

pub struct FakeLoader(pub Arc<FakeBackend>);

pub struct FakeSpec {
    backend: Arc<FakeBackend>,
}

pub struct FakeProgram {
    backend: Arc<FakeBackend>,
}

pub struct FakeLink {
    backend: Arc<FakeBackend>,
    program: String,
    closed: bool,
}

pub struct FakeReader {
    backend: Arc<FakeBackend>,
}

impl ProgramLoader for FakeLoader {
    type Spec = FakeSpec;

    fn load(&self, image: &str) -> Result<FakeSpec> {
        self.0.record(format!("load {}", image));
        if self.0.fail_load {
            return Err(Error::ProgramLoadFailed(format!("{}: bad object", image)));
        }
        Ok(FakeSpec {
            backend: self.0.clone(),
        })
    }
}

impl ProgramSpec for FakeSpec {
    type Program = FakeProgram;

    fn rewrite_constants(&mut self, constants: &Constants) -> Result<()> {
        self.backend.record("rewrite".to_string());
        *self.backend.constants.lock().unwrap() = Some(constants.clone());
        Ok(())
    }

    fn load_and_assign(self, replacements: &MapReplacements) -> Result<FakeProgram> {
        self.backend.record("assign".to_string());
        *self.backend.replacements.lock().unwrap() = Some(replacements.clone());
        Ok(FakeProgram {
            backend: self.backend,
        })
    }
}

impl FakeProgram {
    fn attach(&mut self, kind: &str, target: &str, program: &str) -> Result<FakeLink> {
        self.backend
            .record(format!("attach {} {} {}", kind, target, program));
        if self.backend.fail_attach_on == Some(program) {
            return Err(Error::AttachFailed {
                target: target.to_string(),
                program: program.to_string(),
                reason: "symbol not found".to_string(),
            });
        }
        Ok(FakeLink {
            backend: self.backend.clone(),
            program: program.to_string(),
            closed: false,
        })
    }
}

impl LoadedProgram for FakeProgram {
    type Link = FakeLink;
    type Reader = FakeReader;

    fn attach_enter(&mut self, target: &str, program: &str) -> Result<FakeLink> {
        self.attach("enter", target, program)
    }

    fn attach_exit(&mut self, target: &str, program: &str) -> Result<FakeLink> {
        self.attach("exit", target, program)
    }

    fn open_reader(&mut self, map: &str, page_count: usize) -> Result<FakeReader> {
        self.backend
            .record(format!("open {} {}", map, page_count));
        if self.backend.fail_open_reader {
            return Err(Error::BufferOpenFailed("perf_event_open: EMFILE".to_string()));
        }
        Ok(FakeReader {
            backend: self.backend.clone(),
        })
    }

    fn close(&mut self) -> Result<()> {
        self.backend.record("release".to_string());
        if self.backend.fail_program_close {
            return Err(Error::ProgramCloseFailed("busy".to_string()));
        }
        Ok(())
    }
}

impl Link for FakeLink {
    fn close(&mut self) -> Result<()> {
        // every call is recorded so duplicate closes show up in the log
        self.backend.record(format!("detach {}", self.program));
        self.closed = true;
        Ok(())
    }
}

impl RecordReader for FakeReader {
    fn read(&self) -> std::result::Result<Record, ReadError> {
        self.backend.feed.read()
    }

    fn close(&self) -> Result<()> {
        self.backend.record("close reader".to_string());
        self.backend.feed.close();
        Ok(())
    }
}

/// Sink collecting everything the consumer delivers
pub struct Collector<E> {
    outputs: Arc<Mutex<Vec<Output<E>>>>,
}

impl<E: Clone + Send + 'static> Collector<E> {
    pub fn new() -> Self {
        Self {
            outputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> impl FnMut(Output<E>) + Send + 'static {
        let outputs = self.outputs.clone();
        move |output| outputs.lock().unwrap().push(output)
    }

    pub fn outputs(&self) -> Vec<Output<E>> {
        self.outputs.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<E> {
        self.outputs()
            .into_iter()
            .filter_map(|o| match o {
                Output::Event(e) => Some(e),
                Output::Notice(_) => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.outputs()
            .into_iter()
            .filter_map(|o| match o {
                Output::Notice(n) => Some(n),
                Output::Event(_) => None,
            })
            .collect()
    }

    pub fn wait_for(&self, count: usize) -> bool {
        wait_until(|| self.outputs.lock().unwrap().len() >= count)
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn put_c_array(buf: &mut BytesMut, s: &str, len: usize) {
    let n = s.len().min(len - 1);
    buf.put_slice(&s.as_bytes()[..n]);
    buf.put_bytes(0, len - n);
}

/// fsslower record as the kernel program lays it out
#[derive(Debug, Clone)]
pub struct FsRecord {
    pub delta_us: u64,
    pub end_ns: u64,
    pub offset: i64,
    pub size: i64,
    pub mntns_id: u64,
    pub pid: u32,
    pub op: u32,
    pub file: String,
    pub comm: String,
}

impl Default for FsRecord {
    fn default() -> Self {
        Self {
            delta_us: 15_000,
            end_ns: 1_000_000_000,
            offset: 4096,
            size: 512,
            mntns_id: 4026531840,
            pid: 4242,
            op: 0,
            file: "access.log".to_string(),
            comm: "tail".to_string(),
        }
    }
}

impl FsRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(96);
        buf.put_u64_le(self.delta_us);
        buf.put_u64_le(self.end_ns);
        buf.put_i64_le(self.offset);
        buf.put_i64_le(self.size);
        buf.put_u64_le(self.mntns_id);
        buf.put_u32_le(self.pid);
        buf.put_u32_le(self.op);
        put_c_array(&mut buf, &self.file, 32);
        put_c_array(&mut buf, &self.comm, 16);
        buf.to_vec()
    }

    pub fn sample(&self) -> Record {
        Record::sample(0, self.encode())
    }
}

/// tcptracer record as the kernel program lays it out
#[derive(Debug, Clone)]
pub struct TcpRecord {
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub comm: String,
    pub af: u32,
    pub pid: u32,
    pub uid: u32,
    pub mntns_id: u64,
    pub sport: u16,
    pub dport: u16,
    pub event_type: u8,
}

impl TcpRecord {
    pub fn v4(saddr: [u8; 4], daddr: [u8; 4], event_type: u8) -> Self {
        let mut s = [0u8; 16];
        let mut d = [0u8; 16];
        s[..4].copy_from_slice(&saddr);
        d[..4].copy_from_slice(&daddr);
        Self {
            saddr: s,
            daddr: d,
            comm: "redis-server".to_string(),
            af: 2,
            pid: 900,
            uid: 999,
            mntns_id: 4026532100,
            sport: 6379,
            dport: 40122,
            event_type,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(88);
        buf.put_slice(&self.saddr);
        buf.put_slice(&self.daddr);
        put_c_array(&mut buf, &self.comm, 16);
        buf.put_u64_le(1_700_000);
        buf.put_u32_le(self.af);
        buf.put_u32_le(self.pid);
        buf.put_u32_le(self.uid);
        buf.put_u32_le(4026531992);
        buf.put_u64_le(self.mntns_id);
        buf.put_u16(self.dport);
        buf.put_u16(self.sport);
        buf.put_u8(self.event_type);
        buf.put_bytes(0, 3);
        buf.to_vec()
    }
}

pub fn filter_map(dir: &str) -> PinnedMap {
    PinnedMap::new(format!("{}/mount_ns_filter", dir))
}
