use btrsyncapp::btrsyncapp_run;
use clap::Parser;
use libbtrsync::root::Scope;

mod commands;
mod location;
mod matcher;
mod transfers;
mod ui;

fn main() {
    let options = CliOptions::parse();
    let verbose = options.verbose as usize;
    let quiet = options.quiet as usize;
    let code = btrsyncapp_run(|_| commands::run_sync(options), verbose, quiet);
    std::process::exit(code);
}

#[derive(Parser)]
#[clap(name = "btrsync", version, about = "Sync btrfs volumes")]
pub struct CliOptions {
    /// Source locations followed by the destination location. Sources may
    /// contain wildcards; locations are local paths, [user@]host:path, or
    /// file://, ssh:// URLs.
    #[clap(value_name = "SOURCE>... <DESTINATION", required = true, min_values = 2)]
    pub locations: Vec<String>,

    /// Exclude subvolumes matching GLOB.
    #[clap(short = 'x', long = "exclude", value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Explicitly include only subvolumes matching GLOB, overriding the
    /// default of including everything matching SOURCE and not excluded.
    #[clap(short, long = "include", value_name = "GLOB")]
    pub include: Option<Vec<String>>,

    /// Transfer subvolumes even if they exist on the destination.
    #[clap(short = 'f', long)]
    pub existing: bool,

    /// Only perform incremental transfers, skip the rest.
    #[clap(short = 'I', long)]
    pub incremental_only: bool,

    /// Do not ask for confirmation, perform transfers immediately.
    #[clap(short = 'y', long, conflicts_with = "dry-run")]
    pub no_confirm: bool,

    /// Do not perform transfers, print what would have been done.
    #[clap(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Enable debug logs. Use twice to enable trace logs.
    #[clap(short, long, parse(from_occurrences))]
    pub verbose: i32,

    /// Suppress output except errors; twice, all output except prompts.
    #[clap(short, long, parse(from_occurrences))]
    pub quiet: i32,

    /// Print progress during transfer.
    #[clap(short, long)]
    pub progress: bool,

    /// Print progress every SEC seconds (requires --progress).
    #[clap(short = 't', long = "progress-period", value_name = "SEC", default_value = "1.0")]
    pub progress_period: f64,

    /// Batch multiple subvolumes into a single transfer, as possible.
    #[clap(short = 'B', long)]
    pub batch: bool,

    /// Run independent transfers in parallel.
    #[clap(short = 'P', long)]
    pub parallel: bool,

    /// Create the path specified in DESTINATION if it does not exist.
    #[clap(short = 'c', long = "create-destpath")]
    pub create_destpath: bool,

    /// Replicate the directory structure containing subvolumes in SOURCEs
    /// over to DESTINATION (implies -c). Paths are taken relative to the
    /// source subvolume root and applied on top of DESTINATION.
    #[clap(short = 'r', long = "replicate-dirs")]
    pub replicate_dirs: bool,

    /// Use sudo for commands, in both source and destination.
    #[clap(short = 's', long)]
    pub sudo: bool,

    /// Use sudo for commands executed in source.
    #[clap(long = "sudo-src")]
    pub sudo_src: bool,

    /// Use sudo for commands executed in destination.
    #[clap(long = "sudo-dest")]
    pub sudo_dest: bool,

    /// Scope of subvolume discovery: all, strict, or isolated. Isolated
    /// may dumb down automatic incremental transfers.
    #[clap(long, value_name = "SCOPE", parse(try_from_str))]
    pub scope: Option<Scope>,
}
