//! Implements the Reduce phase, as run inside a reduce worker process.
//!

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::formats::frame::{FrameReader, FrameWriter};
use crate::mapreducer::MapReducer;
use crate::parameters::MRParameters;
use crate::phases::output::create_reduce_output;
use crate::pool::WorkerEnds;

/// One reduce worker: reads complete key groups from its inbound pipe until end-of-stream and
/// writes one reduced pair per group to its private output. Nothing flows back to the
/// coordinator.
pub struct ReducePartition<'a, MR: MapReducer, In: Read, Out: Write> {
    mr: &'a MR,
    input: FrameReader<In>,
    output: FrameWriter<Out>,
}

impl<'a, MR: MapReducer, In: Read, Out: Write> ReducePartition<'a, MR, In, Out> {
    pub fn new(mr: &'a MR, params: &MRParameters, input: In, output: Out) -> Self {
        ReducePartition {
            mr,
            input: FrameReader::new(input).with_limit(params.bounds().max_group_frame()),
            output: FrameWriter::new(output, params.bounds()),
        }
    }

    /// Run the Reduce partition. Returns the flushed output sink.
    pub fn run(mut self) -> Result<Out> {
        while let Some(group) = self.input.recv_group()? {
            let r = self.mr.reduce(&group.key, &group.values);
            trace!(key = %r.key, values = group.values.len(), "reduced");
            self.output.send(&r)?;
        }
        self.output.flush()?;

        let (bytes, groups) = self.output.get_stats();
        debug!(groups, bytes, "reduce worker reached end of input");
        Ok(self.output.into_inner())
    }
}

/// Entry point of a forked reducer: creates `<output_dir>/<own pid><suffix>`, reduces
/// everything arriving on the inbound pipe into it and closes it. The file is closed on every
/// path out of here, the error paths included.
pub fn run_reduce_worker<MR: MapReducer>(mr: &MR, params: &MRParameters, ends: WorkerEnds) -> Result<PathBuf> {
    let pid = std::process::id() as i32;
    let (path, out) = create_reduce_output(params, pid)?;
    debug!(index = ends.index, path = %path.display(), "reduce worker opened output");

    let part = ReducePartition::new(mr, params, ends.inbound, out);
    let buffered = part.run()?;
    close_output(buffered).map_err(|e| Error::file(&path, e))?;
    Ok(path)
}

/// Flushes and syncs the output so a failed close surfaces as an error instead of being lost
/// in a drop.
fn close_output(out: BufWriter<File>) -> std::io::Result<()> {
    let f = out.into_inner().map_err(|e| e.into_error())?;
    f.sync_all()
}
