//! Builders for `btrfs` subcommand invocations.

use crate::cmd::Cmd;
use crate::error::BtrfsError;

const LIST_FIELDS: &str = "pcguqR";

fn btrfs_command() -> Cmd {
    Cmd::new("btrfs")
}

/// Build a `btrfs subvolume list -t` command. `list_all` selects every
/// subvolume in the filesystem (`-a`) instead of only direct descendants
/// (`-o`); `fields` picks the printed columns and must be a subset of
/// `pcguqR`.
pub fn list(path: &str, list_all: bool, readonly: bool, fields: &str) -> Result<Cmd, BtrfsError> {
    for f in fields.chars() {
        if !LIST_FIELDS.contains(f) {
            return Err(BtrfsError::validation(format!(
                "unknown list field '{}'; allowed fields are {}",
                f, LIST_FIELDS
            )));
        }
    }
    let mut cmd = btrfs_command().arg("subvolume").arg("list").arg("-t");
    cmd = cmd.arg(if list_all { "-a" } else { "-o" });
    if readonly {
        cmd = cmd.arg("-r");
    }
    if !fields.is_empty() {
        cmd = cmd.arg(format!("-{}", fields));
    }
    Ok(cmd.arg(path))
}

/// Build a `btrfs send` command. At least one path is required.
pub fn send(paths: &[String], parent: Option<&str>, clones: &[String], keep_compressed: bool) -> Result<Cmd, BtrfsError> {
    if paths.is_empty() {
        return Err(BtrfsError::validation("must specify at least one path to send"));
    }
    let mut cmd = btrfs_command().arg("send");
    if keep_compressed {
        cmd = cmd.arg("--compressed-data");
    }
    if let Some(parent) = parent {
        cmd = cmd.arg("-p").arg(parent);
    }
    for clone in clones {
        cmd = cmd.arg("-c").arg(clone);
    }
    for path in paths {
        cmd = cmd.arg(path);
    }
    Ok(cmd)
}

/// Build a `btrfs receive` command.
pub fn receive(path: &str, force_decompress: bool) -> Cmd {
    let mut cmd = btrfs_command().arg("receive");
    if force_decompress {
        cmd = cmd.arg("--force-decompress");
    }
    cmd.arg(path)
}

/// Build a `btrfs subvolume show` command.
pub fn show(path: &str) -> Cmd {
    btrfs_command().arg("subvolume").arg("show").arg(path)
}
