//! Implements the Map phase, as run inside a map worker process.
//!

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::formats::chunks::ChunkReader;
use crate::formats::frame::{FrameReader, FrameWriter};
use crate::mapreducer::MapReducer;
use crate::parameters::MRParameters;
use crate::pool::WorkerEnds;
use crate::record_types::MEmitter;

/// One map worker: reads paths from its inbound pipe until end-of-stream, maps every chunk of
/// every file, and writes the emitted pairs to its outbound pipe in emission order.
pub struct MapWorker<'a, MR: MapReducer, In: Read, Out: Write> {
    mr: &'a MR,
    params: &'a MRParameters,
    input: FrameReader<In>,
    output: FrameWriter<Out>,
    files_done: usize,
}

impl<'a, MR: MapReducer> MapWorker<'a, MR, File, BufWriter<File>> {
    /// Builds the worker from the pipe ends handed over by the pool.
    pub fn from_ends(mr: &'a MR, params: &'a MRParameters, ends: WorkerEnds) -> Result<Self> {
        let outbound = ends
            .outbound
            .ok_or_else(|| Error::Protocol(String::from("map worker without an outbound pipe")))?;
        Ok(MapWorker::new(mr, params, ends.inbound, BufWriter::new(outbound)))
    }
}

impl<'a, MR: MapReducer, In: Read, Out: Write> MapWorker<'a, MR, In, Out> {
    pub fn new(mr: &'a MR, params: &'a MRParameters, input: In, output: Out) -> Self {
        MapWorker {
            mr,
            params,
            input: FrameReader::new(input).with_limit(params.max_path_len),
            output: FrameWriter::new(output, params.bounds()),
            files_done: 0,
        }
    }

    /// Runs until the inbound stream ends. The first file that can't be opened or read ends the
    /// worker with an error; nothing is retried. Returns the output sink so the caller decides
    /// when it is closed.
    pub fn run(mut self) -> Result<Out> {
        while let Some(path) = self.input.recv::<PathBuf>()? {
            self.map_file(&path)?;
            self.files_done += 1;
        }

        self.output.flush()?;
        let (bytes, pairs) = self.output.get_stats();
        debug!(files = self.files_done, pairs, bytes, "map worker reached end of input");
        Ok(self.output.into_inner())
    }

    fn map_file(&mut self, path: &Path) -> Result<()> {
        let f = File::open(path).map_err(|e| Error::file(path, e))?;
        let mut chunks = ChunkReader::new(f, self.params.read_size);

        while let Some(chunk) = chunks.next_chunk().map_err(|e| Error::file(path, e))? {
            let mut e = MEmitter::new();
            self.mr.map(&mut e, &chunk);
            for r in e.into_records() {
                trace!(key = %r.key, "emit");
                self.output.send(&r)?;
            }
        }

        // One flush per file keeps the coordinator busy while big files are still being mapped.
        self.output.flush()?;
        debug!(path = %path.display(), chunks = chunks.chunks_read(), "mapped file");
        Ok(())
    }
}
