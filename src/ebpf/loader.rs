//! aya-backed program loading and kprobe attachment

use super::perf::PerfReader;
use super::preflight::run_preflight_checks;
use super::{Constants, LoadedProgram, Link, MapReplacements, ProgramLoader, ProgramSpec};
use crate::{Error, Result};
use aya::maps::perf::PerfEventArray;
use aya::programs::kprobe::KProbeLink;
use aya::programs::{KProbe, ProbeKind, ProgramError};
use aya::{Ebpf, EbpfLoader};
use aya_log::EbpfLogger;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Loads compiled program images from a directory of `<name>.o` files
pub struct AyaLoader {
    probes_dir: PathBuf,
}

impl AyaLoader {
    pub fn new(probes_dir: PathBuf) -> Self {
        Self { probes_dir }
    }

    pub fn with_default_path() -> Self {
        Self {
            probes_dir: PathBuf::from("/usr/lib/ktrace/probes"),
        }
    }
}

impl ProgramLoader for AyaLoader {
    type Spec = AyaProgramSpec;

    fn load(&self, image: &str) -> Result<AyaProgramSpec> {
        debug!("Loading eBPF program image: {}", image);

        let path = self.probes_dir.join(format!("{}.o", image));

        if !path.exists() {
            return Err(Error::ProgramLoadFailed(format!(
                "Program file not found: {}",
                path.display()
            )));
        }

        run_preflight_checks()?;

        let object = std::fs::read(&path)?;

        info!("Read program image {} ({} bytes)", path.display(), object.len());

        Ok(AyaProgramSpec {
            image: image.to_string(),
            object,
            globals: Vec::new(),
        })
    }
}

/// Program object bytes plus the constants to patch at load time
pub struct AyaProgramSpec {
    image: String,
    object: Vec<u8>,
    globals: Vec<(&'static str, Vec<u8>)>,
}

impl ProgramSpec for AyaProgramSpec {
    type Program = AyaProgram;

    fn rewrite_constants(&mut self, constants: &Constants) -> Result<()> {
        for (name, value) in constants {
            if self.globals.iter().any(|(existing, _)| existing == name) {
                return Err(Error::ConstantRewriteFailed(format!(
                    "constant {} set twice",
                    name
                )));
            }
            self.globals.push((*name, value.to_ne_bytes()));
        }
        Ok(())
    }

    fn load_and_assign(self, replacements: &MapReplacements) -> Result<AyaProgram> {
        let mut loader = EbpfLoader::new();

        for (name, value) in &self.globals {
            loader.set_global(name, value.as_slice(), true);
        }

        // aya reuses pinned maps by name from a single pin directory
        let mut pin_dir = None;
        for (map, pinned) in replacements.iter() {
            if pinned.pin_name() != Some(map) {
                return Err(Error::ProgramLoadFailed(format!(
                    "replacement for map {} is pinned as {}",
                    map,
                    pinned.path().display()
                )));
            }
            if !pinned.path().exists() {
                return Err(Error::ProgramLoadFailed(format!(
                    "pinned map not found: {}",
                    pinned.path().display()
                )));
            }
            match (pin_dir, pinned.pin_dir()) {
                (None, Some(dir)) => pin_dir = Some(dir),
                (Some(current), Some(dir)) if current == dir => {}
                _ => {
                    return Err(Error::ProgramLoadFailed(
                        "map replacements must share one pin directory".to_string(),
                    ))
                }
            }
        }
        if let Some(dir) = pin_dir {
            loader.map_pin_path(dir);
        }

        let mut ebpf = loader
            .load(&self.object)
            .map_err(|e| Error::ProgramLoadFailed(format!("{}: {}", self.image, e)))?;

        if let Err(e) = EbpfLogger::init(&mut ebpf) {
            warn!(
                "Failed to initialize EbpfLogger: {}. eBPF program logs will not be visible.",
                e
            );
        }

        info!("Loaded eBPF program {}", self.image);

        Ok(AyaProgram {
            image: self.image,
            ebpf: Some(ebpf),
        })
    }
}

/// A loaded program image; dropping the inner [`Ebpf`] releases every map
pub struct AyaProgram {
    image: String,
    ebpf: Option<Ebpf>,
}

impl AyaProgram {
    fn attach(&mut self, target: &str, program: &str, exit: bool) -> Result<AyaLink> {
        let attach_err = |reason: String| Error::AttachFailed {
            target: target.to_string(),
            program: program.to_string(),
            reason,
        };

        let ebpf = self
            .ebpf
            .as_mut()
            .ok_or_else(|| attach_err("program was already released".to_string()))?;

        let kprobe: &mut KProbe = ebpf
            .program_mut(program)
            .ok_or_else(|| attach_err("program not found in eBPF object".to_string()))?
            .try_into()
            .map_err(|e: ProgramError| attach_err(e.to_string()))?;

        let is_return = matches!(kprobe.kind(), ProbeKind::KRetProbe);
        if is_return != exit {
            return Err(attach_err(format!(
                "program is a {:?}, expected a {}",
                kprobe.kind(),
                if exit { "kretprobe" } else { "kprobe" }
            )));
        }

        match kprobe.load() {
            Ok(()) | Err(ProgramError::AlreadyLoaded) => {}
            Err(e) => return Err(attach_err(e.to_string())),
        }

        let link_id = kprobe
            .attach(target, 0)
            .map_err(|e| attach_err(e.to_string()))?;
        let link = kprobe
            .take_link(link_id)
            .map_err(|e| attach_err(e.to_string()))?;

        Ok(AyaLink {
            name: format!("{}@{}", program, target),
            link: Some(link),
        })
    }
}

impl LoadedProgram for AyaProgram {
    type Link = AyaLink;
    type Reader = PerfReader;

    fn attach_enter(&mut self, target: &str, program: &str) -> Result<AyaLink> {
        self.attach(target, program, false)
    }

    fn attach_exit(&mut self, target: &str, program: &str) -> Result<AyaLink> {
        self.attach(target, program, true)
    }

    fn open_reader(&mut self, map: &str, page_count: usize) -> Result<PerfReader> {
        let ebpf = self
            .ebpf
            .as_mut()
            .ok_or_else(|| Error::BufferOpenFailed("program was already released".to_string()))?;

        // Collect map names first to avoid borrow conflict in error path
        let available_maps: Vec<_> = ebpf.maps().map(|(name, _)| name.to_string()).collect();
        let map = ebpf.take_map(map).ok_or_else(|| {
            Error::BufferOpenFailed(format!(
                "{} map not found in eBPF object. Available maps: {:?}",
                map, available_maps
            ))
        })?;

        let array = PerfEventArray::try_from(map)
            .map_err(|e| Error::BufferOpenFailed(e.to_string()))?;

        PerfReader::open(array, page_count)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(ebpf) = self.ebpf.take() {
            drop(ebpf);
            info!("Released eBPF program {}", self.image);
        }
        Ok(())
    }
}

/// Owned kprobe link; dropping the inner link detaches the probe
pub struct AyaLink {
    name: String,
    link: Option<KProbeLink>,
}

impl Link for AyaLink {
    fn close(&mut self) -> Result<()> {
        if let Some(link) = self.link.take() {
            drop(link);
            debug!("Detached {}", self.name);
        }
        Ok(())
    }
}
