pub mod cowtree;
pub mod sync;
pub mod transfer;

use crate::error::BtrfsError;
use crate::parsing::{parse_uuid, ListRecord};
use crate::paths;
use uuid::Uuid;

/// Path of the btrfs filesystem root, as printed by `btrfs-progs`.
pub const FSTREE: &str = "<FS_TREE>";

/// A btrfs subvolume as reported by `btrfs subvolume list`. A `None` in the
/// UUID fields is the distinct "absent" state and never matches anything in
/// a diff.
#[derive(Debug, Clone, PartialEq)]
pub struct Subvol {
    pub uuid: Uuid,
    pub parent_uuid: Option<Uuid>,
    pub received_uuid: Option<Uuid>,
    pub path: String,
    pub id: Option<u64>,
    pub gen: Option<u64>,
    pub top_level: Option<u64>,
}

impl Subvol {
    pub fn new(uuid: Uuid, path: impl Into<String>) -> Self {
        Self {
            uuid,
            parent_uuid: None,
            received_uuid: None,
            path: path.into(),
            id: None,
            gen: None,
            top_level: None,
        }
    }

    /// Build from a parsed `btrfs subvolume list -t` record. `uuid` and
    /// `path` columns are required, everything else is optional.
    pub fn from_record(record: &ListRecord) -> Result<Self, BtrfsError> {
        fn required<'a>(record: &'a ListRecord, key: &str) -> Result<&'a str, BtrfsError> {
            record
                .get(key)
                .and_then(Option::as_deref)
                .ok_or_else(|| BtrfsError::validation(format!("subvolume record is missing '{}'", key)))
        }
        fn uuid_field(record: &ListRecord, key: &str) -> Result<Option<Uuid>, BtrfsError> {
            record
                .get(key)
                .and_then(Option::as_deref)
                .map(parse_uuid)
                .transpose()
        }
        fn numeric_field(record: &ListRecord, key: &str) -> Result<Option<u64>, BtrfsError> {
            record
                .get(key)
                .and_then(Option::as_deref)
                .map(|v| {
                    v.parse()
                        .map_err(|_| BtrfsError::validation(format!("'{}' is not a valid {}", v, key)))
                })
                .transpose()
        }

        Ok(Self {
            uuid: parse_uuid(required(record, "uuid")?)?,
            parent_uuid: uuid_field(record, "parent_uuid")?,
            received_uuid: uuid_field(record, "received_uuid")?,
            path: required(record, "path")?.to_string(),
            id: numeric_field(record, "ID")?,
            gen: numeric_field(record, "gen")?,
            top_level: numeric_field(record, "top level")?,
        })
    }
}

/// Key function used by the cross-root diff: returns a comparable UUID for
/// a subvolume, or `None` for the unmatchable absent state.
pub type KeyFn = fn(&Subvol) -> Option<Uuid>;

pub fn key_uuid(v: &Subvol) -> Option<Uuid> {
    Some(v.uuid)
}

pub fn key_received_uuid(v: &Subvol) -> Option<Uuid> {
    v.received_uuid
}

/// UUID, then received UUID: either matching marks two subvolumes as the
/// same snapshot.
pub const DEFAULT_KEYS: [KeyFn; 2] = [key_uuid, key_received_uuid];

fn check_fstree_root(rootpath: &str) -> Result<(), BtrfsError> {
    if rootpath.starts_with(FSTREE) {
        Ok(())
    } else {
        Err(BtrfsError::validation(format!("root path must start with {}", FSTREE)))
    }
}

/// Make every relative subvolume path absolute under `rootpath`; absolute
/// paths are left unchanged.
pub fn abspaths(vols: Vec<Subvol>, rootpath: &str) -> Result<Vec<Subvol>, BtrfsError> {
    check_fstree_root(rootpath)?;
    Ok(vols
        .into_iter()
        .map(|mut v| {
            if !v.path.starts_with(FSTREE) {
                v.path = paths::path_merge(rootpath, &v.path, FSTREE);
            }
            v
        })
        .collect())
}

/// Make every subvolume path below `rootpath` relative to it; other paths
/// are left unchanged.
pub fn relpaths(vols: Vec<Subvol>, rootpath: &str) -> Result<Vec<Subvol>, BtrfsError> {
    check_fstree_root(rootpath)?;
    let relroot = {
        let stripped = rootpath[FSTREE.len()..].trim_start_matches('/');
        stripped.to_string()
    };
    Ok(vols
        .into_iter()
        .map(|mut v| {
            if v.path.starts_with(rootpath) {
                v.path = paths::relpath(&v.path, rootpath);
            } else if !relroot.is_empty() && !v.path.starts_with(FSTREE) {
                v.path = paths::relpath(&v.path, &relroot);
            }
            v
        })
        .collect())
}
