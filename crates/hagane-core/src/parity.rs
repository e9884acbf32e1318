//! # Tokenizer Parity Files
//!
//! Copies the tokenizer and config files a runtime needs next to the
//! exported graph so it tokenizes exactly like the checkpoint did. Files the
//! checkpoint does not ship are skipped.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::info;

use crate::error::{HaganeError, Result};

/// Files copied into the bundle when the checkpoint has them.
pub const PARITY_FILES: [&str; 5] = [
    "tokenizer.json",
    "vocab.txt",
    "config.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
];

/// Which parity files were copied and which were absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParityReport {
    pub copied: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

/// Copy every present parity file from `source` into `destination`.
///
/// Existing files are overwritten. Content and modification time are kept.
pub fn copy_parity_files(source: &Path, destination: &Path) -> Result<ParityReport> {
    let mut report = ParityReport::default();

    for name in PARITY_FILES {
        let from = source.join(name);
        let to = destination.join(name);

        let metadata = match fs::metadata(&from) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(file = name, "parity file not in checkpoint, skipping");
                report.skipped.push(name);
                continue;
            }
            Err(e) => return Err(copy_error(name, destination, e)),
        };
        if !metadata.is_file() {
            return Err(copy_error(
                name,
                destination,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        copy_preserving_mtime(&from, &to, &metadata)
            .map_err(|e| copy_error(name, destination, e))?;
        info!(file = name, destination = %destination.display(), "copied parity file");
        report.copied.push(name);
    }

    Ok(report)
}

/// `fs::copy` also copies permission bits, so the destination may be
/// read-only. Setting times only needs ownership, not a writable handle.
fn copy_preserving_mtime(from: &Path, to: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    fs::copy(from, to)?;
    let modified = metadata.modified()?;
    File::open(to)?.set_modified(modified)
}

fn copy_error(file: &str, destination: &Path, source: io::Error) -> HaganeError {
    HaganeError::Copy {
        file: file.to_string(),
        destination: destination.to_path_buf(),
        source,
    }
}
