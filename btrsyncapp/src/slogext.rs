use slog::{b, Drain, Level, Logger, OwnedKVList, Record, KV};
use slog_term::{timestamp_local, CountingWriter, Decorator, RecordDecorator, Serializer};
use std::{io, io::Write, result};

fn print_msg_header(mut rd: &mut dyn RecordDecorator, record: &Record) -> io::Result<bool> {
    rd.start_timestamp()?;
    timestamp_local(&mut rd)?;

    rd.start_whitespace()?;
    write!(rd, " ")?;

    rd.start_level()?;
    write!(rd, "{}", record.level().as_short_str())?;

    rd.start_whitespace()?;
    write!(rd, " ")?;

    rd.start_msg()?;
    let count = {
        let mut count_rd = CountingWriter::new(&mut rd);
        write!(count_rd, "{}", record.msg())?;
        count_rd.count()
    };

    let module = record.location().module;
    if !module.starts_with("btrsync") && !module.starts_with("libbtrsync") {
        rd.reset()?;
        // Records arriving over the log bridge may lack a static module
        // path; the tag then carries the original target.
        let module = match module {
            "<unknown>" => record.tag(),
            path => path,
        };
        write!(rd, " [{}]", module)?;
    }

    Ok(count != 0)
}

pub struct CustomFullFormat<D>
where
    D: Decorator,
{
    decorator: D,
}

impl<D> Drain for CustomFullFormat<D>
where
    D: Decorator,
{
    type Ok = ();
    type Err = io::Error;

    fn log(&self, record: &Record, values: &OwnedKVList) -> result::Result<Self::Ok, Self::Err> {
        self.format_full(record, values)
    }
}

impl<D> CustomFullFormat<D>
where
    D: Decorator,
{
    pub fn new(decorator: D) -> Self {
        Self { decorator }
    }

    fn format_full(&self, record: &Record, values: &OwnedKVList) -> io::Result<()> {
        self.decorator.with_record(record, values, |decorator| {
            let comma_needed = print_msg_header(decorator, record)?;
            {
                let mut serializer = Serializer::new(decorator, comma_needed, false);
                record.kv().serialize(record, &mut serializer)?;
                values.serialize(record, &mut serializer)?;
                serializer.finish()?;
            }

            decorator.start_whitespace()?;
            writeln!(decorator)?;
            decorator.flush()?;
            Ok(())
        })
    }
}

pub fn log_to_slog_level(level: log::Level) -> Level {
    match level {
        log::Level::Trace => Level::Trace,
        log::Level::Debug => Level::Debug,
        log::Level::Info => Level::Info,
        log::Level::Warn => Level::Warning,
        log::Level::Error => Level::Error,
    }
}

fn record_as_location(r: &log::Record) -> slog::RecordLocation {
    slog::RecordLocation {
        file: r.file_static().unwrap_or("<unknown>"),
        line: r.line().unwrap_or_default(),
        column: 0,
        function: "",
        module: r.module_path_static().unwrap_or("<unknown>"),
    }
}

/// Forwards `log` crate records into a slog logger, so crates logging
/// through `log` share the application drain.
pub struct SlogLogLogger(Logger);

impl SlogLogLogger {
    pub fn install(log: Logger, level_filter: log::LevelFilter) {
        let _ = log::set_boxed_logger(Box::new(Self(log)));
        log::set_max_level(level_filter);
    }
}

impl log::Log for SlogLogLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, r: &log::Record) {
        let level = log_to_slog_level(r.metadata().level());
        let args = r.args();
        let target = r.target();
        let location = &record_as_location(r);
        let s = slog::RecordStatic {
            location,
            level,
            tag: target,
        };
        self.0.log(&slog::Record::new(&s, args, b!()));
    }

    fn flush(&self) {}
}
