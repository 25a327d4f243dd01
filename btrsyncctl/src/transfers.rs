//! Transfer handlers wired to the command line: one that performs and
//! narrates real transfers, and one that only records a dry-run preview.

use crate::ui::{format_transfer, humanbytes, print_preview};
use async_trait::async_trait;
use libbtrsync::core::transfer::Transfer;
use libbtrsync::core::Subvol;
use libbtrsync::error::{BtrfsError, Cancelled};
use libbtrsync::paths;
use libbtrsync::root::BtrfsRoot;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

fn recv_display(base: &str, replicate_dirs: bool, volpaths: &[String]) -> String {
    if replicate_dirs {
        let dir = volpaths.first().map(|p| paths::dirname(p)).unwrap_or("");
        paths::join(base, dir)
    } else {
        base.to_string()
    }
}

/// Performs real transfers, reporting to stdout/stderr according to the
/// quiet/verbose/progress flags.
pub struct CliTransfer {
    recv_base: String,
    replicate_dirs: bool,
    period: Option<Duration>,
    quiet: usize,
    verbose: bool,
    spinner: AtomicUsize,
}

impl CliTransfer {
    pub fn new(recv_base: String, replicate_dirs: bool, period: Option<Duration>, quiet: usize, verbose: bool) -> Self {
        Self {
            recv_base,
            replicate_dirs,
            period,
            quiet,
            verbose,
            spinner: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transfer for CliTransfer {
    fn recv_base(&self) -> &str {
        &self.recv_base
    }

    fn replicate_dirs(&self) -> bool {
        self.replicate_dirs
    }

    fn progress_period(&self) -> Option<Duration> {
        self.period
    }

    fn err(&self, error: &BtrfsError, context: &[Subvol]) {
        if self.quiet < 2 {
            eprintln!("Error: {}", error);
            if !context.is_empty() {
                let paths: Vec<&str> = context.iter().map(|v| v.path.as_str()).collect();
                eprintln!("@ {}", paths.join(", "));
            }
        }
    }

    async fn report(
        &self,
        vols: &[Subvol],
        parent: Option<&Subvol>,
        _src: &dyn BtrfsRoot,
        _dst: &dyn BtrfsRoot,
    ) -> Result<(), BtrfsError> {
        if self.quiet == 0 {
            let volpaths: Vec<String> = vols.iter().map(|v| v.path.clone()).collect();
            let destdir = recv_display(&self.recv_base, self.replicate_dirs, &volpaths);
            println!(
                "{}",
                format_transfer(&volpaths, parent.map(|p| p.path.as_str()), &destdir, self.verbose)
            );
        }
        Ok(())
    }

    async fn report_done(
        &self,
        _vols: &[Subvol],
        _parent: Option<&Subvol>,
        _src: &dyn BtrfsRoot,
        _dst: &dyn BtrfsRoot,
    ) -> Result<(), BtrfsError> {
        if self.quiet == 0 {
            println!(" - Done");
        }
        Ok(())
    }

    async fn report_progress(&self, count: u64, prev: u64) {
        let tick = self.spinner.fetch_add(1, Ordering::Relaxed);
        let spin = SPINNER[tick % SPINNER.len()];
        let period = self.period.map_or(1.0, |p| p.as_secs_f64());
        let rate = (count - prev) as f64 / period;
        print!("\r{} {} {}/sec", spin, humanbytes(count as f64), humanbytes(rate));
        let _ = std::io::stdout().flush();
    }
}

/// Dry-run handler: records what would be transferred instead of doing it,
/// for preview and confirmation.
pub struct ConfirmTransfer {
    recv_base: String,
    replicate_dirs: bool,
    preview: Mutex<Vec<(Vec<String>, Option<String>, String)>>,
}

impl ConfirmTransfer {
    pub fn new(recv_base: String, replicate_dirs: bool) -> Self {
        Self {
            recv_base,
            replicate_dirs,
            preview: Mutex::new(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.preview.lock().unwrap().is_empty()
    }

    /// Print what the sync pass recorded.
    pub fn preview(&self) {
        let recorded = self.preview.lock().unwrap();
        if recorded.is_empty() {
            println!("Nothing to do");
        } else {
            println!("About to sync the following subvolumes:");
            print_preview(&recorded);
        }
    }
}

#[async_trait]
impl Transfer for ConfirmTransfer {
    fn recv_base(&self) -> &str {
        &self.recv_base
    }

    fn replicate_dirs(&self) -> bool {
        self.replicate_dirs
    }

    async fn transf(
        &self,
        vols: Vec<Subvol>,
        parent: Option<Subvol>,
        _src: &dyn BtrfsRoot,
        _dst: &dyn BtrfsRoot,
    ) -> Result<(), Cancelled> {
        let volpaths: Vec<String> = vols.iter().map(|v| v.path.clone()).collect();
        let destdir = recv_display(&self.recv_base, self.replicate_dirs, &volpaths);
        self.preview
            .lock()
            .unwrap()
            .push((volpaths, parent.map(|p| p.path), destdir));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_display_fixed_and_replicated() {
        let volpaths = vec!["snaps/a".to_string()];
        assert_eq!(recv_display("dest", false, &volpaths), "dest");
        assert_eq!(recv_display("dest", true, &volpaths), "dest/snaps");
    }
}
