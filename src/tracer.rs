//! Lifecycle controller
//!
//! `Created -> Started -> Stopped`. Start walks load, rewrite, assign, attach,
//! open, spawn; any failing step unwinds what came before it and leaves the
//! tracer in `Created`. Stop closes the reader first so the consumer thread
//! notices on its own, then detaches and releases the program.

use crate::attach::{attach_all, AttachmentSet};
use crate::config::Config;
use crate::consumer::{self, ConsumerStats, StatsSnapshot};
use crate::ebpf::{
    ConstValue, LoadedProgram, MapReplacements, ProgramLoader, ProgramSpec, RecordReader,
};
use crate::enrich::Enricher;
use crate::event::EventSink;
use crate::gadget::{Gadget, FILTER_BY_MNT_NS};
use crate::{Error, Result};
use ktrace_common::{EVENTS_MAP, MOUNT_NS_FILTER_MAP};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

type ProgramOf<L> = <<L as ProgramLoader>::Spec as ProgramSpec>::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerState {
    Created,
    Started,
    Stopped,
}

struct Running<P: LoadedProgram> {
    program: P,
    attachments: AttachmentSet<P::Link>,
    reader: Arc<P::Reader>,
    // never joined: the thread exits by itself once the reader is closed
    _consumer: JoinHandle<()>,
}

enum Phase<P: LoadedProgram> {
    Created,
    Started(Running<P>),
    Stopped,
}

pub struct Tracer<G: Gadget, L: ProgramLoader> {
    gadget: Arc<G>,
    loader: L,
    config: Config,
    enricher: Option<Arc<dyn Enricher>>,
    sink: Option<Box<dyn EventSink<G::Event>>>,
    stats: Arc<ConsumerStats>,
    phase: Phase<ProgramOf<L>>,
}

impl<G: Gadget, L: ProgramLoader> Tracer<G, L> {
    pub fn new(
        gadget: G,
        loader: L,
        config: Config,
        sink: impl EventSink<G::Event>,
    ) -> Self {
        Self {
            gadget: Arc::new(gadget),
            loader,
            config,
            enricher: None,
            sink: Some(Box::new(sink)),
            stats: Arc::new(ConsumerStats::new()),
            phase: Phase::Created,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> TracerState {
        match self.phase {
            Phase::Created => TracerState::Created,
            Phase::Started(_) => TracerState::Started,
            Phase::Stopped => TracerState::Stopped,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of probes currently attached
    pub fn attached_probes(&self) -> usize {
        match &self.phase {
            Phase::Started(running) => running.attachments.attached(),
            _ => 0,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        match self.phase {
            Phase::Created => {}
            Phase::Started(_) => return Err(Error::AlreadyStarted),
            Phase::Stopped => return Err(Error::Stopped),
        }

        // configuration problems surface before the loader is touched
        self.config.validate()?;
        let probes = self.gadget.probes(&self.config)?;
        let mut constants = self.gadget.constants(&self.config)?;
        constants.insert(
            FILTER_BY_MNT_NS,
            ConstValue::Bool(self.config.mntns_filter.is_some()),
        );

        let mut replacements = MapReplacements::new();
        if let Some(filter) = &self.config.mntns_filter {
            replacements.insert(MOUNT_NS_FILTER_MAP, filter.clone());
        }

        if self.sink.is_none() {
            return Err(Error::ConsumerSpawnFailed(
                "event sink was lost by an earlier start".to_string(),
            ));
        }

        let mut spec = self.loader.load(self.gadget.image())?;
        spec.rewrite_constants(&constants)?;
        let mut program = spec.load_and_assign(&replacements)?;
        debug!("Loaded {} program image", self.gadget.image());

        let mut attachments = match attach_all(&mut program, &probes) {
            Ok(attachments) => attachments,
            Err(e) => {
                release(&mut program);
                return Err(e);
            }
        };

        let reader = match program.open_reader(EVENTS_MAP, self.config.perf_buffer_pages) {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                let _ = attachments.detach_all();
                release(&mut program);
                return Err(e);
            }
        };

        let sink = self.sink.take().ok_or_else(|| {
            Error::ConsumerSpawnFailed("event sink was lost by an earlier start".to_string())
        })?;
        let consumer = match consumer::spawn(
            reader.clone(),
            self.gadget.clone(),
            self.enricher.clone(),
            sink,
            self.stats.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = reader.close();
                let _ = attachments.detach_all();
                release(&mut program);
                return Err(e);
            }
        };

        info!(
            "Started {} with {} probes",
            self.gadget.name(),
            attachments.attached()
        );

        self.phase = Phase::Started(Running {
            program,
            attachments,
            reader,
            _consumer: consumer,
        });
        Ok(())
    }

    /// Tear everything down. Calling it again, or before `start`, is a no-op.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    pub fn stop(&mut self) -> Result<()> {
        let running = match std::mem::replace(&mut self.phase, Phase::Stopped) {
            Phase::Started(running) => running,
            Phase::Created | Phase::Stopped => return Ok(()),
        };

        let Running {
            mut program,
            mut attachments,
            reader,
            ..
        } = running;

        let mut first_err = None;

        if let Err(e) = reader.close() {
            warn!("Failed to close {} perf reader: {}", self.gadget.name(), e);
            first_err = Some(e);
        }

        if let Err(e) = attachments.detach_all() {
            first_err.get_or_insert(e);
        }

        if let Err(e) = program.close() {
            warn!("Failed to release {} program: {}", self.gadget.name(), e);
            first_err.get_or_insert(e);
        }

        info!("Stopped {}", self.gadget.name());

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<G: Gadget, L: ProgramLoader> Drop for Tracer<G, L> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping tracer on drop: {}", e);
        }
    }
}

fn release<P: LoadedProgram>(program: &mut P) {
    if let Err(e) = program.close() {
        warn!("Failed to release program during rollback: {}", e);
    }
}
