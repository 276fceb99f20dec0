//! Ring buffer consumer
//!
//! One dedicated thread per tracer blocks on [`RecordReader::read`] and turns
//! every record into exactly one callback: an event, a loss warning or an
//! error notice. Closing the reader is the only way to stop it.

use crate::ebpf::RecordReader;
use crate::enrich::Enricher;
use crate::error::ReadError;
use crate::event::{Enrichable, EventSink, Notice, Output};
use crate::gadget::Gadget;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Counters updated by the consumer thread, readable from anywhere
#[derive(Debug, Default)]
pub struct ConsumerStats {
    records: AtomicU64,
    events: AtomicU64,
    lost_samples: AtomicU64,
    decode_errors: AtomicU64,
    finished: AtomicBool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub records: u64,
    pub events: u64,
    pub lost_samples: u64,
    pub decode_errors: u64,
    /// The read loop has exited
    pub finished: bool,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records: self.records.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            lost_samples: self.lost_samples.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Acquire),
        }
    }
}

/// Read until the reader is closed or fails
pub fn run<G, R>(
    reader: &R,
    gadget: &G,
    enricher: Option<&dyn Enricher>,
    sink: &mut dyn EventSink<G::Event>,
    stats: &ConsumerStats,
) where
    G: Gadget,
    R: RecordReader + ?Sized,
{
    loop {
        let record = match reader.read() {
            Ok(record) => record,
            Err(ReadError::Closed) => {
                debug!("{} perf reader closed, consumer exiting", gadget.name());
                break;
            }
            Err(e) => {
                sink.on_notice(Notice::error(format!(
                    "Error reading perf ring buffer: {}",
                    e
                )));
                break;
            }
        };

        stats.records.fetch_add(1, Ordering::Relaxed);

        if record.lost_samples > 0 {
            stats
                .lost_samples
                .fetch_add(record.lost_samples, Ordering::Relaxed);
            sink.on_notice(Notice::warn(format!(
                "lost {} samples",
                record.lost_samples
            )));
            continue;
        }

        match gadget.decode(&record.raw_sample) {
            Ok(mut event) => {
                if let Some(enricher) = enricher {
                    let mntns_id = event.mntns_id();
                    enricher.enrich(event.common_mut(), mntns_id);
                }
                stats.events.fetch_add(1, Ordering::Relaxed);
                sink.on_event(event);
            }
            Err(e) => {
                stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                sink.on_notice(Notice::error(format!("Error decoding event: {}", e)));
            }
        }
    }

    stats.finished.store(true, Ordering::Release);
}

/// Start [`run`] on its own named thread
pub fn spawn<G, R>(
    reader: Arc<R>,
    gadget: Arc<G>,
    enricher: Option<Arc<dyn Enricher>>,
    mut sink: Box<dyn EventSink<G::Event>>,
    stats: Arc<ConsumerStats>,
) -> Result<JoinHandle<()>>
where
    G: Gadget,
    R: RecordReader,
{
    thread::Builder::new()
        .name(format!("ktrace-{}", gadget.name()))
        .spawn(move || {
            run(
                reader.as_ref(),
                gadget.as_ref(),
                enricher.as_deref(),
                sink.as_mut(),
                &stats,
            )
        })
        .map_err(|e| Error::ConsumerSpawnFailed(e.to_string()))
}

/// Sink handing everything over a bounded channel without blocking
///
/// When the receiver falls behind, outputs are dropped and counted rather
/// than stalling the consumer thread.
pub struct ChannelSink<E> {
    tx: mpsc::Sender<Output<E>>,
    dropped: Arc<AtomicU64>,
}

impl<E: Send + 'static> ChannelSink<E> {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Output<E>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Shared counter of outputs that did not fit in the channel
    pub fn dropped(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    fn send(&self, output: Output<E>) {
        match self.tx.try_send(output) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("Event channel full, {} outputs dropped so far", dropped);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<E: Send + 'static> EventSink<E> for ChannelSink<E> {
    fn on_event(&mut self, event: E) {
        self.send(Output::Event(event))
    }

    fn on_notice(&mut self, notice: Notice) {
        self.send(Output::Notice(notice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::fixtures::fs_record;
    use crate::ebpf::Record;
    use crate::enrich::{ContainerMetadata, NamespaceCache};
    use crate::event::{FsEvent, FsOp, Severity};
    use crate::gadget::FsSlower;
    use ktrace_common::fs_op;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hands out queued results, then reports closed
    struct ScriptedReader {
        script: Mutex<VecDeque<std::result::Result<Record, ReadError>>>,
    }

    impl ScriptedReader {
        fn new(script: Vec<std::result::Result<Record, ReadError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl RecordReader for ScriptedReader {
        fn read(&self) -> std::result::Result<Record, ReadError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ReadError::Closed))
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn consume(
        script: Vec<std::result::Result<Record, ReadError>>,
        enricher: Option<&dyn Enricher>,
    ) -> (Vec<Output<FsEvent>>, StatsSnapshot) {
        let reader = ScriptedReader::new(script);
        let stats = ConsumerStats::new();
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let captured = outputs.clone();
        let mut sink = move |out: Output<FsEvent>| captured.lock().unwrap().push(out);

        run(&reader, &FsSlower, enricher, &mut sink, &stats);

        let outputs = outputs.lock().unwrap().clone();
        (outputs, stats.snapshot())
    }

    fn read_sample() -> Record {
        Record::sample(0, fs_record(fs_op::READ, "cat", "passwd"))
    }

    #[test]
    fn test_sample_becomes_event() {
        let (outputs, stats) = consume(vec![Ok(read_sample())], None);

        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            Output::Event(event) => {
                assert_eq!(event.op, FsOp::Read);
                assert_eq!(event.comm, "cat");
            }
            other => panic!("expected event, got {:?}", other),
        }
        assert_eq!(stats.events, 1);
        assert!(stats.finished);
    }

    #[test]
    fn test_lost_samples_warn_and_continue() {
        let (outputs, stats) = consume(vec![Ok(Record::lost(1, 5)), Ok(read_sample())], None);

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], Output::Notice(Notice::warn("lost 5 samples")));
        assert!(matches!(outputs[1], Output::Event(_)));
        assert_eq!(stats.lost_samples, 5);
    }

    #[test]
    fn test_close_is_silent() {
        let (outputs, stats) = consume(vec![], None);
        assert!(outputs.is_empty());
        assert!(stats.finished);
        assert_eq!(stats.records, 0);
    }

    #[test]
    fn test_read_error_is_fatal() {
        let (outputs, _) = consume(
            vec![
                Err(ReadError::Other("ring corrupted".to_string())),
                Ok(read_sample()),
            ],
            None,
        );

        assert_eq!(
            outputs,
            vec![Output::Notice(Notice::error(
                "Error reading perf ring buffer: ring corrupted"
            ))]
        );
    }

    #[test]
    fn test_decode_error_reported_once_and_loop_continues() {
        let short = Record::sample(0, vec![0u8; 10]);
        let (outputs, stats) = consume(vec![Ok(short), Ok(read_sample())], None);

        assert_eq!(outputs.len(), 2);
        match &outputs[0] {
            Output::Notice(notice) => {
                assert_eq!(notice.severity, Severity::Error);
                assert!(notice.message.contains("too short"));
            }
            other => panic!("expected notice, got {:?}", other),
        }
        assert!(matches!(outputs[1], Output::Event(_)));
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn test_enricher_applied() {
        let cache = NamespaceCache::new();
        cache.insert(
            4026531840,
            ContainerMetadata {
                node: "n".to_string(),
                namespace: "prod".to_string(),
                pod: "db-0".to_string(),
                container: "postgres".to_string(),
            },
        );

        let (outputs, _) = consume(vec![Ok(read_sample())], Some(&cache as &dyn Enricher));
        match &outputs[0] {
            Output::Event(event) => assert_eq!(event.common.pod, "db-0"),
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_spawned_consumer_exits_on_close() {
        let reader = Arc::new(ScriptedReader::new(vec![Ok(read_sample())]));
        let stats = Arc::new(ConsumerStats::new());
        let (sink, mut rx) = ChannelSink::<FsEvent>::new(8);

        let handle = spawn(
            reader,
            Arc::new(FsSlower),
            None,
            Box::new(sink),
            stats.clone(),
        )
        .unwrap();
        handle.join().unwrap();

        assert!(matches!(rx.try_recv(), Ok(Output::Event(_))));
        assert!(rx.try_recv().is_err());
        assert!(stats.snapshot().finished);
    }

    #[test]
    fn test_channel_sink_counts_overflow() {
        let (mut sink, mut rx) = ChannelSink::<u32>::new(1);
        let dropped = sink.dropped();

        sink.on_event(1);
        sink.on_event(2);
        sink.on_notice(Notice::warn("lost 1 samples"));

        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        assert_eq!(rx.try_recv().unwrap(), Output::Event(1));

        drop(rx);
        sink.on_event(3);
        assert_eq!(dropped.load(Ordering::Relaxed), 3);
    }
}
