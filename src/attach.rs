//! Attachment manager
//!
//! Probes are attached in table order and their links recorded in that
//! order. Teardown always walks the set backwards; a slot that was never
//! filled, or was already closed, is skipped.

use crate::backend::{ProbeKind, ProbeSpec};
use crate::ebpf::{Link, LoadedProgram};
use crate::{Error, Result};
use tracing::{debug, warn};

struct Attachment<L> {
    probe: ProbeSpec,
    link: Option<L>,
}

/// Links acquired by [`attach_all`], in acquisition order
pub struct AttachmentSet<L: Link> {
    slots: Vec<Attachment<L>>,
}

impl<L: Link> AttachmentSet<L> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn push(&mut self, probe: ProbeSpec, link: L) {
        self.slots.push(Attachment {
            probe,
            link: Some(link),
        });
    }

    /// Number of links still attached
    pub fn attached(&self) -> usize {
        self.slots.iter().filter(|s| s.link.is_some()).count()
    }

    pub fn probes(&self) -> impl Iterator<Item = &ProbeSpec> {
        self.slots.iter().map(|s| &s.probe)
    }

    /// Close every link in reverse acquisition order
    ///
    /// Keeps going past failures and returns the first one. Each link is
    /// taken out of its slot before closing, so calling this again closes
    /// nothing.
    pub fn detach_all(&mut self) -> Result<()> {
        let mut first_err = None;

        for slot in self.slots.iter_mut().rev() {
            let Some(mut link) = slot.link.take() else {
                continue;
            };
            match link.close() {
                Ok(()) => debug!("Detached {}", slot.probe),
                Err(e) => {
                    warn!("Failed to detach {}: {}", slot.probe, e);
                    if first_err.is_none() {
                        first_err = Some(Error::DetachFailed(format!("{}: {}", slot.probe, e)));
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<L: Link> Default for AttachmentSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Link> Drop for AttachmentSet<L> {
    fn drop(&mut self) {
        if self.attached() > 0 {
            let _ = self.detach_all();
        }
    }
}

/// Attach every probe in order, or nothing
///
/// On the first failure the links acquired so far are closed in reverse
/// order and the attach error is returned.
pub fn attach_all<P: LoadedProgram>(
    program: &mut P,
    probes: &[ProbeSpec],
) -> Result<AttachmentSet<P::Link>> {
    let mut set = AttachmentSet::new();

    for probe in probes {
        let attached = match probe.kind {
            ProbeKind::Enter => program.attach_enter(probe.target, probe.program),
            ProbeKind::Exit => program.attach_exit(probe.target, probe.program),
        };

        match attached {
            Ok(link) => {
                debug!("Attached {}", probe);
                set.push(*probe, link);
            }
            Err(e) => {
                warn!(
                    "Attaching {} failed, rolling back {} probes",
                    probe,
                    set.attached()
                );
                // the attach error is the one worth reporting
                let _ = set.detach_all();
                return Err(e);
            }
        }
    }

    Ok(set)
}
