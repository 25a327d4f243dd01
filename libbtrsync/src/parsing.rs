//! Line-oriented parsers for the output of `btrfs` subcommands.

use crate::error::BtrfsError;
use std::collections::HashMap;
use std::error::Error;
use uuid::Uuid;

/// A record from `btrfs subvolume list -t`: header name to cell value,
/// with the literal `-` cell decoded to `None`.
pub type ListRecord = HashMap<String, Option<String>>;

fn tab_split(line: &str) -> impl Iterator<Item = &str> {
    line.split('\t').filter(|x| !x.is_empty()).map(str::trim)
}

fn cell(value: &str) -> Option<String> {
    if value == "-" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse the tabular output of `btrfs subvolume list -t ...`: a header
/// line, a dashed separator line, then one record per line.
pub fn parse_list(data: &str) -> Result<Vec<ListRecord>, BtrfsError> {
    let mut lines = data.lines();
    let headers: Vec<&str> = match lines.next() {
        Some(line) => tab_split(line).collect(),
        None => return Err(BtrfsError::validation("empty subvolume list output")),
    };
    match lines.next() {
        Some(line) if line.starts_with('-') => {}
        other => {
            return Err(BtrfsError::validation(format!(
                "expected separator on line 2, got {:?}",
                other.unwrap_or("")
            )))
        }
    }
    Ok(lines
        .map(|line| {
            headers
                .iter()
                .zip(tab_split(line))
                .map(|(h, v)| (h.to_string(), cell(v)))
                .collect()
        })
        .collect())
}

/// A property from `btrfs subvolume show` output: either a single value
/// (with `-` decoded to `None`) or an indented multi-line list.
#[derive(Debug, Clone, PartialEq)]
pub enum ShowValue {
    Single(Option<String>),
    Multi(Vec<String>),
}

/// Parse `btrfs subvolume show ...` output into the reported filesystem
/// path and a map of properties. A key with no value opens a multi-line
/// value collecting subsequent single-token lines.
pub fn parse_show(data: &str) -> Result<(String, HashMap<String, ShowValue>), BtrfsError> {
    let mut lines = data.lines();
    let path = lines
        .next()
        .ok_or_else(|| BtrfsError::validation("empty subvolume show output"))?
        .to_string();

    let mut props = HashMap::new();
    let mut multi: Option<(String, Vec<String>)> = None;
    for line in lines {
        let mut tokens = tab_split(line);
        let key = match tokens.next() {
            Some(k) => k,
            None => continue,
        };
        let values: Vec<&str> = tokens.collect();
        if values.is_empty() {
            match multi.as_mut() {
                Some((_, items)) => items.push(key.to_string()),
                None => multi = Some((key.to_string(), Vec::new())),
            }
        } else {
            if let Some((k, items)) = multi.take() {
                props.insert(k, ShowValue::Multi(items));
            }
            props.insert(key.to_string(), ShowValue::Single(cell(&values.join(" "))));
        }
    }
    if let Some((k, items)) = multi.take() {
        props.insert(k, ShowValue::Multi(items));
    }
    Ok((path, props))
}

pub fn parse_uuid(value: &str) -> Result<Uuid, BtrfsError> {
    Uuid::parse_str(value).map_err(|e| {
        let detail = e.source().map(|s| s.to_string()).unwrap_or_else(|| e.to_string());
        BtrfsError::validation(format!("'{}' is not a valid UUID: {}", value, detail))
    })
}
