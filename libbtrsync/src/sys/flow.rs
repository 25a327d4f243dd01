//! One-shot byte channels connecting a send producer to a receive consumer.

use super::fd::{pipe, Fd};
use crate::error::{nix_to_io, BtrfsError};
use nix::fcntl::{splice, SpliceFFlags};
use nix::unistd;
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const CHUNK: usize = 1 << 20;

/// Byte counter shared between a running pump and a progress observer.
#[derive(Debug, Default)]
pub struct FlowStats {
    count: AtomicU64,
}

impl FlowStats {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }
}

#[derive(Debug)]
enum Source {
    /// Read end of a pipe, typically a subprocess stdout.
    Pipe(Fd),
    /// A seekable file opened for reading.
    File(Fd),
}

impl Source {
    fn into_fd(self) -> Fd {
        match self {
            Source::Pipe(fd) | Source::File(fd) => fd,
        }
    }
}

struct PumpSpec {
    src: Fd,
    sink: Fd,
    stats: Option<Arc<FlowStats>>,
}

/// A one-shot byte stream from a producer to a consumer. Exactly one of the
/// `connect_*` operations is performed, after which `pump` drives any
/// interposed copy loop to completion.
pub struct Flow {
    source: Option<Source>,
    stats: Option<Arc<FlowStats>>,
    pump: Option<PumpSpec>,
}

impl Flow {
    pub fn from_pipe(fd: Fd) -> Self {
        Self {
            source: Some(Source::Pipe(fd)),
            stats: None,
            pump: None,
        }
    }

    pub fn from_file(file: File) -> Self {
        Self {
            source: Some(Source::File(Fd::from(file))),
            stats: None,
            pump: None,
        }
    }

    /// Enable byte counting. Must be called before any `connect_*`
    /// operation to take effect.
    pub fn enable_stats(&mut self) -> Arc<FlowStats> {
        let stats = Arc::new(FlowStats::default());
        self.stats = Some(Arc::clone(&stats));
        stats
    }

    fn take_source(&mut self) -> Result<Source, BtrfsError> {
        self.source
            .take()
            .ok_or_else(|| BtrfsError::validation("flow is already connected"))
    }

    fn interpose(&mut self, source: Source) -> Result<Fd, BtrfsError> {
        let (r, w) = pipe()?;
        self.pump = Some(PumpSpec {
            src: source.into_fd(),
            sink: w,
            stats: self.stats.clone(),
        });
        Ok(r)
    }

    /// Return a readable descriptor the consumer may read from directly.
    pub fn connect_fd(&mut self) -> Result<Fd, BtrfsError> {
        let source = self.take_source()?;
        if self.stats.is_none() {
            Ok(source.into_fd())
        } else {
            self.interpose(source)
        }
    }

    /// Return the read end of a pipe carrying the flow's bytes. A pump is
    /// interposed unless the source already is a pipe and counting is off.
    pub fn connect_pipe(&mut self) -> Result<Fd, BtrfsError> {
        let source = self.take_source()?;
        match source {
            Source::Pipe(fd) if self.stats.is_none() => Ok(fd),
            source => self.interpose(source),
        }
    }

    /// Direct the flow into `sink`, to be driven by `pump`.
    pub fn connect_to_fd(&mut self, sink: Fd) -> Result<(), BtrfsError> {
        let source = self.take_source()?;
        self.pump = Some(PumpSpec {
            src: source.into_fd(),
            sink,
            stats: self.stats.clone(),
        });
        Ok(())
    }

    /// Copy bytes until EOF, closing both endpoints. A no-op if no pump was
    /// interposed by the connect operation.
    pub async fn pump(self) -> Result<(), BtrfsError> {
        let spec = match self.pump {
            Some(spec) => spec,
            None => return Ok(()),
        };
        tokio::task::spawn_blocking(move || run_pump(spec))
            .await
            .map_err(|e| BtrfsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

fn run_pump(mut spec: PumpSpec) -> Result<(), BtrfsError> {
    let result = pump_loop(&spec);
    spec.src.close();
    spec.sink.close();
    result
}

fn pump_loop(spec: &PumpSpec) -> Result<(), BtrfsError> {
    let mut first = true;
    loop {
        match splice(spec.src.raw(), None, spec.sink.raw(), None, CHUNK, SpliceFFlags::empty()) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                if let Some(stats) = &spec.stats {
                    stats.add(n as u64);
                }
                first = false;
            }
            // Neither side is a pipe; fall back to buffered copying.
            Err(e) if first && e.as_errno() == Some(nix::errno::Errno::EINVAL) => {
                return copy_loop(spec);
            }
            Err(e) => return Err(BtrfsError::Io(nix_to_io(e))),
        }
    }
}

fn copy_loop(spec: &PumpSpec) -> Result<(), BtrfsError> {
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = unistd::read(spec.src.raw(), &mut buf).map_err(nix_to_io)?;
        if n == 0 {
            return Ok(());
        }
        let mut written = 0;
        while written < n {
            written += unistd::write(spec.sink.raw(), &buf[written..n]).map_err(nix_to_io)?;
        }
        if let Some(stats) = &spec.stats {
            stats.add(n as u64);
        }
    }
}
