//! Console presentation helpers for previews, progress and confirmation.

use anyhow::Result;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};
use dialoguer::Select;

/// Render a byte quantity in IEC units.
pub fn humanbytes(n: f64) -> String {
    const THRESH: f64 = 1024.0;
    const UNITS: [&str; 6] = ["  B", "KiB", "MiB", "GiB", "TiB", "EiB"];
    let mut value = n;
    for unit in &UNITS[..UNITS.len() - 1] {
        if value.abs() < THRESH {
            return format!("{:6.1} {}", value, unit);
        }
        value /= THRESH;
    }
    format!("{:6.1} {}", value, UNITS[UNITS.len() - 1])
}

/// Format the paths that make up one transfer for display.
pub fn format_transfer(volpaths: &[String], parent: Option<&str>, destdir: &str, verbose: bool) -> String {
    let vpaths = volpaths.join(",\n");
    if verbose {
        let mode = match parent {
            Some(parent) => format!("incremental from {}", parent),
            None => "full".to_string(),
        };
        format!("\n{}\n\t{}\n\tinto {}", vpaths, mode, destdir)
    } else {
        let mode = if parent.is_none() { "full" } else { "incr" };
        format!("{}\t{} -> {}", vpaths, mode, destdir)
    }
}

/// Print the planned transfers as a table.
pub fn print_preview(transfers: &[(Vec<String>, Option<String>, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Volumes"), Cell::new("Mode"), Cell::new("Destination")]);
    for (volpaths, parent, destdir) in transfers {
        let mode = match parent {
            Some(parent) => format!("incremental from {}", parent),
            None => "full".to_string(),
        };
        table.add_row(vec![Cell::new(volpaths.join("\n")), Cell::new(mode), Cell::new(destdir)]);
    }
    println!("{}", table);
}

/// Outcome of the interactive confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Skip,
}

pub fn confirm_prompt() -> Result<Answer> {
    let choice = Select::new()
        .with_prompt("Proceed?")
        .items(&["yes", "no", "skip this source"])
        .default(1)
        .interact()?;
    Ok(match choice {
        0 => Answer::Yes,
        2 => Answer::Skip,
        _ => Answer::No,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanbytes_units() {
        assert_eq!(humanbytes(512.0).trim(), "512.0   B");
        assert_eq!(humanbytes(2048.0).trim(), "2.0 KiB");
        assert_eq!(humanbytes(3.0 * 1024.0 * 1024.0).trim(), "3.0 MiB");
    }

    #[test]
    fn format_transfer_compact() {
        let vols = vec!["a".to_string(), "b".to_string()];
        assert_eq!(format_transfer(&vols, None, "dest", false), "a,\nb\tfull -> dest");
        assert_eq!(format_transfer(&vols, Some("p"), "dest", false), "a,\nb\tincr -> dest");
    }

    #[test]
    fn format_transfer_verbose() {
        let vols = vec!["a".to_string()];
        let text = format_transfer(&vols, Some("p"), "dest", true);
        assert!(text.contains("incremental from p"));
        assert!(text.contains("into dest"));
    }
}
