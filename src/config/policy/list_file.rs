//! Newline-delimited policy lists (IOC allowlist, SUID baseline).
//!
//! Leading whitespace is trimmed; blank lines and `#` comments are skipped;
//! every other line is kept verbatim and in file order.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Read a list file from disk
pub fn load_list_file(path: &Path) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    parse_list(BufReader::new(file))
}

/// Parse list entries from any reader
pub fn parse_list<R: Read>(reader: BufReader<R>) -> io::Result<Vec<String>> {
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let entry = line.trim_start();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        entries.push(entry.to_string());
    }
    Ok(entries)
}
