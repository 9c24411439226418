//! Reduce output files: naming, creating and reading back.
//!
//! Every reducer writes exactly one private file, `<output_dir>/<pid><suffix>`, holding one
//! frame per reduced pair in the same encoding used on the pipes. There is no merge step.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::formats::frame::{FrameReader, FrameWriter, MessageIter};
use crate::parameters::{Bounds, MRParameters};
use crate::record_types::Record;

/// Calculates the name of the output file of the reducer running as process `pid`.
pub fn reduce_output_name(dir: &Path, pid: i32, suffix: &str) -> PathBuf {
    dir.join(format!("{}{}", pid, suffix))
}

/// Creates (truncating) the output file of the reducer running as `pid`.
pub fn create_reduce_output(params: &MRParameters, pid: i32) -> Result<(PathBuf, BufWriter<File>)> {
    let path = reduce_output_name(&params.output_dir, pid, &params.output_suffix);
    let f = File::create(&path).map_err(|e| Error::file(&path, e))?;
    Ok((path, BufWriter::new(f)))
}

/// Iterates over the pairs of one reduce output file.
pub fn open_reduce_output(path: &Path) -> Result<MessageIter<Record, BufReader<File>>> {
    let f = File::open(path).map_err(|e| Error::file(path, e))?;
    Ok(MessageIter::new(FrameReader::new(BufReader::new(f))))
}

/// Reads every pair of one reduce output file.
pub fn read_reduce_output(path: &Path) -> Result<Vec<Record>> {
    open_reduce_output(path)?.collect()
}

/// Finds all reduce output files in `dir` (files ending in `suffix`), sorted by name.
pub fn find_reduce_outputs(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::file(dir, e))? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(suffix));
        if matches && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Reads the pairs of several output files, in file order. This is a convenience for callers
/// that want one view of a job's results; the engine itself never merges outputs.
pub fn read_all_outputs<'a, I: IntoIterator<Item = &'a PathBuf>>(paths: I) -> Result<Vec<Record>> {
    let mut all = Vec::new();
    for p in paths {
        all.extend(read_reduce_output(p)?);
    }
    Ok(all)
}

/// Writes pairs as an output file would contain them. Mostly useful to prepare test fixtures.
pub fn write_records(path: &Path, records: &[Record], bounds: Bounds) -> Result<()> {
    let f = File::create(path).map_err(|e| Error::file(path, e))?;
    let mut w = FrameWriter::new(BufWriter::new(f), bounds);
    for r in records {
        w.send(r)?;
    }
    w.flush()
}
