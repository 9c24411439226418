//! Runs the external file lister and turns its output into input paths.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::parameters::Bounds;

/// Runs `<program> <dir>`, waits for it to exit and returns one path per whitespace-separated
/// name it printed, joined onto `dir`, in the order printed.
///
/// The lister's entire output is collected while it runs. A lister that cannot be started or
/// exits unsuccessfully is an error, and so is any path longer than `bounds.max_path`: over-long
/// paths are rejected, never truncated.
pub fn list_files(program: &str, dir: &Path, bounds: &Bounds) -> Result<Vec<PathBuf>> {
    let lister_err = |reason: String| Error::Lister {
        program: String::from(program),
        reason,
    };

    let output = Command::new(program)
        .arg(dir)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| lister_err(e.to_string()))?;

    if !output.status.success() {
        return Err(lister_err(format!("{} listing {}", output.status, dir.display())));
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    let paths = parse_listing(&listing, dir, bounds)?;
    debug!(dir = %dir.display(), files = paths.len(), "listed input files");
    Ok(paths)
}

/// Splits a listing into names and joins each onto `dir`.
pub fn parse_listing(listing: &str, dir: &Path, bounds: &Bounds) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for name in listing.split_whitespace() {
        let path = dir.join(name);
        let len = path.as_os_str().len();
        if len > bounds.max_path {
            return Err(Error::TooLong {
                what: "path",
                len,
                max: bounds.max_path,
            });
        }
        trace!(path = %path.display(), "listed");
        paths.push(path);
    }
    Ok(paths)
}
