mod slogext;

use anyhow::Result;
use human_panic::setup_panic;
use slog::{debug, error, info, o, trace, Drain, Level, Logger};
use slogext::{CustomFullFormat, SlogLogLogger};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::runtime::Runtime;

/// Set up logging and the async runtime, run `main` to completion, and
/// return the process exit code. `verbose` counts `-v` flags; `quiet`
/// counts `-q` flags and wins over `verbose`.
pub fn btrsyncapp_run<M, F>(main: M, verbose: usize, quiet: usize) -> i32
where
    M: FnOnce(Logger) -> F,
    F: Future<Output = Result<()>>,
{
    setup_panic!();

    let (internal_level, external_level) = match verbose {
        0 => (Level::Info, log::LevelFilter::Info),
        1 => (Level::Debug, log::LevelFilter::Info),
        2 => (Level::Trace, log::LevelFilter::Debug),
        _ => (Level::Trace, log::LevelFilter::Trace),
    };
    let (internal_level, external_level) = match quiet {
        0 => (internal_level, external_level),
        1 => (Level::Error, log::LevelFilter::Error),
        _ => (Level::Critical, log::LevelFilter::Off),
    };

    let mut exit_code = 0;
    {
        let (slog_drain, slog_drain_ctrl) = {
            let decorator = slog_term::TermDecorator::new().stderr().build();
            let drain = CustomFullFormat::new(decorator).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog_atomic::AtomicSwitch::new(drain);
            let ctrl = drain.ctrl();
            (drain.map(Arc::new), ctrl)
        };

        {
            let logger = {
                let drain = Arc::clone(&slog_drain).filter_level(internal_level).fuse();
                Logger::root(drain, o!())
            };
            let external_logger = Logger::root(Arc::clone(&slog_drain), o!());

            let _scope_guard = slog_scope::set_global_logger(logger.clone());
            SlogLogLogger::install(external_logger, external_level);

            debug!(logger, "debug messages enabled");
            trace!(logger, "trace messages enabled");

            let runtime = Runtime::new().expect("can create runtime");
            let result = runtime.block_on(main(logger.clone()));
            if let Err(e) = result {
                error!(logger, "{}", e);
                for cause in e.chain().skip(1) {
                    info!(logger, "error caused by: {}", cause);
                }
                exit_code = 1;
            }
            runtime.shutdown_timeout(Duration::from_secs(0));
        }

        slog_drain_ctrl.set(Logger::root(slog::Discard, o!()));
    }

    exit_code
}
