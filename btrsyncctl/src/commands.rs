//! The sync command: resolve locations to roots, select targets, confirm,
//! and drive the planner.

use crate::location::{parse_location, Location};
use crate::matcher::PathMatch;
use crate::transfers::{CliTransfer, ConfirmTransfer};
use crate::ui::{confirm_prompt, Answer};
use crate::CliOptions;
use anyhow::{anyhow, Context, Result};
use libbtrsync::core::sync::{BtrSync, SyncOptions};
use libbtrsync::core::Subvol;
use libbtrsync::paths;
use libbtrsync::root::local::{CmdWrapper, LocalBtrfsRoot, RootOptions};
use libbtrsync::root::BtrfsRoot;
use slog_scope::debug;
use std::sync::Arc;
use std::time::Duration;

pub async fn run_sync(options: CliOptions) -> Result<()> {
    let (dst, srcs) = options
        .locations
        .split_last()
        .ok_or_else(|| anyhow!("a destination is required"))?;

    let dst_opts = RootOptions {
        create_recvpath: options.create_destpath || options.replicate_dirs,
        wrapper: CmdWrapper {
            sudo: options.sudo || options.sudo_dest,
            ssh: None,
        },
        ..RootOptions::default()
    };
    let (dst_root, recvpath) = dest_root(dst, dst_opts).await.context("resolving destination")?;
    debug!("destination root resolved"; "root" => %dst_root.name(), "recvpath" => %recvpath);

    let auto = if options.no_confirm {
        Some(true)
    } else if options.dry_run {
        Some(false)
    } else {
        None
    };
    let period = if options.progress {
        Some(Duration::from_secs_f64(options.progress_period))
    } else {
        None
    };

    for src in srcs {
        let mut src_opts = RootOptions {
            wrapper: CmdWrapper {
                sudo: options.sudo || options.sudo_src,
                ssh: None,
            },
            ..RootOptions::default()
        };
        if let Some(scope) = options.scope {
            src_opts.scope = scope;
        }
        let (src_root, mut matcher) = src_root(src, src_opts).await.with_context(|| format!("resolving {}", src))?;
        debug!("source root resolved"; "root" => %src_root.name());

        if let Some(includes) = &options.include {
            matcher.include(includes)?;
        }
        matcher.exclude(&options.exclude)?;

        let syncer = BtrSync::new(Arc::clone(&src_root), Arc::clone(&dst_root));
        let target = |v: &Subvol| matcher.matches(&v.path);
        let stop = |vols: &[Subvol]| {
            let volpaths: Vec<String> = vols.iter().map(|v| v.path.clone()).collect();
            matcher.stop(&volpaths)
        };
        let incremental_check = |_: &Subvol, parent: Option<&Subvol>| parent.is_some();
        let sync_opts = SyncOptions {
            batch: options.batch,
            parallel: options.parallel,
            transfer_existing: options.existing,
            target: Some(&target),
            stop: Some(&stop),
            check: if options.incremental_only {
                Some(&incremental_check)
            } else {
                None
            },
            ..SyncOptions::default()
        };

        if auto != Some(true) {
            let confirm = ConfirmTransfer::new(recvpath.clone(), options.replicate_dirs);
            if options.quiet == 0 {
                println!("At source {}", src_root.name());
            }
            if !syncer.sync(&confirm, &sync_opts).await? {
                return Err(anyhow!("dry run failed at {}", src_root.name()));
            }
            confirm.preview();
            if auto == Some(false) {
                continue;
            }
            if confirm.is_empty() {
                continue;
            }
            match confirm_prompt()? {
                Answer::Skip => continue,
                Answer::No => break,
                Answer::Yes => {}
            }
        }

        let transfer = CliTransfer::new(
            recvpath.clone(),
            options.replicate_dirs,
            period,
            options.quiet as usize,
            options.verbose > 0,
        );
        if !syncer.sync(&transfer, &sync_opts).await? {
            return Err(anyhow!("sync failed at {}", src_root.name()));
        }
    }
    Ok(())
}

/// Resolve a destination location to a root anchored at its subvolume
/// boundary plus the receive path inside it.
async fn dest_root(loc: &str, mut opts: RootOptions) -> Result<(Arc<dyn BtrfsRoot>, String)> {
    let path = match parse_location(loc)? {
        Location::Local { path } => path,
        Location::Ssh { ssh, path } => {
            opts.wrapper.ssh = Some(ssh.into_config());
            path
        }
    };
    let (root, recvpath) = LocalBtrfsRoot::get_root(&path, opts).await?;
    Ok((Arc::new(root), recvpath))
}

/// Resolve a source location to a root plus the matcher selecting the
/// requested subvolumes: a trailing `/` syncs everything below the path, a
/// subvolume path syncs exactly that volume, and anything else is treated
/// as a glob over the enclosing root.
async fn src_root(loc: &str, mut opts: RootOptions) -> Result<(Arc<dyn BtrfsRoot>, PathMatch)> {
    let path = match parse_location(loc)? {
        Location::Local { path } => path,
        Location::Ssh { ssh, path } => {
            opts.wrapper.ssh = Some(ssh.into_config());
            path
        }
    };

    if LocalBtrfsRoot::is_root(&opts.wrapper, &path).await? {
        if path.ends_with('/') {
            let root = LocalBtrfsRoot::new(path, opts);
            return Ok((Arc::new(root), PathMatch::under_glob("*")?));
        }
        let (root, rpath) = LocalBtrfsRoot::get_root(paths::dirname(&path), opts).await?;
        let target = paths::normpath(&paths::join(&rpath, paths::basename(&path)));
        return Ok((Arc::new(root), PathMatch::single(target)));
    }

    let (root, rglob) = LocalBtrfsRoot::get_root(paths::dirname(&path), opts).await?;
    let glob = paths::normpath(&paths::join(&rglob, paths::basename(&path)));
    Ok((Arc::new(root), PathMatch::under_glob(&glob)?))
}
