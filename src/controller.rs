//! Controls the execution of a mapreduce instance.
//!
//! The coordinator lists the input directory, forks the map pool, hands out file paths round
//! robin, aggregates the pairs coming back into key groups, then forks the reduce pool and hands
//! out the groups round robin. Each reducer writes its own output file; nothing is merged.

use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use time::OffsetDateTime;
use tracing::{debug, info, trace};

use crate::aggregate::Aggregate;
use crate::error::{Error, Result};
use crate::formats::frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME};
use crate::lister;
use crate::map::MapWorker;
use crate::mapreducer::MapReducer;
use crate::parameters::MRParameters;
use crate::phases::output::reduce_output_name;
use crate::pool::{Role, WorkerExit, WorkerPool};
use crate::record_types::Record;
use crate::reduce::run_reduce_worker;

/// Hands out slots 0, 1, .., n-1, 0, 1, .. so that item i goes to slot `i mod n`.
#[derive(Clone, Debug)]
pub struct RoundRobin {
    n: usize,
    next: usize,
}

impl RoundRobin {
    pub fn new(n: usize) -> RoundRobin {
        RoundRobin { n: n.max(1), next: 0 }
    }

    pub fn next_slot(&mut self) -> usize {
        let slot = self.next;
        self.next = (self.next + 1) % self.n;
        slot
    }
}

/// What a finished job did.
#[derive(Clone, Debug, Default)]
pub struct JobReport {
    pub files: usize,
    pub pairs: usize,
    pub groups: usize,
    /// Map workers in pool order.
    pub map_workers: Vec<WorkerExit>,
    /// Reduce workers in pool order.
    pub reduce_workers: Vec<WorkerExit>,
    /// One output file per reducer, in pool order.
    pub outputs: Vec<PathBuf>,
}

fn elapsed_secs(start: OffsetDateTime) -> f64 {
    (OffsetDateTime::now_utc() - start).as_seconds_f64()
}

pub struct MRController<'a, MR: MapReducer> {
    params: MRParameters,
    mr: &'a MR,
}

impl<'a, MR: MapReducer> MRController<'a, MR> {
    pub fn new(mr: &'a MR, params: MRParameters) -> MRController<'a, MR> {
        MRController { params, mr }
    }

    /// Create a new mapreduce instance over the files in `dir` and execute it immediately.
    pub fn run(mr: &'a MR, params: MRParameters, dir: &Path) -> Result<JobReport> {
        let controller = MRController::new(mr, params);
        let files = controller.list_files(dir)?;
        controller.run_files(&files)
    }

    /// Runs both phases over an explicit list of input files, in the given order.
    pub fn run_files(&self, files: &[PathBuf]) -> Result<JobReport> {
        let mut report = JobReport {
            files: files.len(),
            ..JobReport::default()
        };

        let (aggregate, map_exits) = self.run_map(files)?;
        report.map_workers = map_exits;
        report.pairs = aggregate.pairs();
        report.groups = aggregate.len();

        let reduce_exits = self.run_reduce(&aggregate)?;
        report.outputs = reduce_exits
            .iter()
            .map(|e| reduce_output_name(&self.params.output_dir, e.pid, &self.params.output_suffix))
            .collect();
        report.reduce_workers = reduce_exits;
        Ok(report)
    }

    /// Runs the lister over `dir` and returns the paths it named.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        lister::list_files(&self.params.lister, dir, &self.params.bounds())
    }

    /// The map phase: spawn, dispatch, drain, wait. Fails if any map worker failed, before a
    /// single reducer is forked.
    pub fn run_map(&self, files: &[PathBuf]) -> Result<(Aggregate, Vec<WorkerExit>)> {
        let start = OffsetDateTime::now_utc();
        info!(files = files.len(), mappers = self.params.mappers, "starting map phase");

        // Nothing is forked for a file list that could never be dispatched.
        for path in files {
            let len = path.as_os_str().len();
            if len > self.params.max_path_len {
                return Err(Error::TooLong {
                    what: "path",
                    len,
                    max: self.params.max_path_len,
                });
            }
        }

        let mr = self.mr;
        let params = &self.params;
        let mut pool = WorkerPool::spawn(Role::Map, params.mappers, |ends| {
            MapWorker::from_ends(mr, params, ends)?.run().map(drop)
        })?;

        let prefetched = self.dispatch_files(&mut pool, files)?;
        let aggregate = self.drain_pairs(&mut pool, prefetched)?;
        let exits = self.wait_pool(&mut pool)?;

        info!(
            pairs = aggregate.pairs(),
            groups = aggregate.len(),
            elapsed_secs = elapsed_secs(start),
            "map phase done"
        );
        Ok((aggregate, exits))
    }

    /// The reduce phase: spawn, distribute, wait.
    pub fn run_reduce(&self, aggregate: &Aggregate) -> Result<Vec<WorkerExit>> {
        let start = OffsetDateTime::now_utc();
        info!(groups = aggregate.len(), reducers = self.params.reducers, "starting reduce phase");

        let mr = self.mr;
        let params = &self.params;
        let mut pool = WorkerPool::spawn(Role::Reduce, params.reducers, |ends| {
            run_reduce_worker(mr, params, ends).map(drop)
        })?;

        self.distribute_groups(&mut pool, aggregate)?;
        let exits = self.wait_pool(&mut pool)?;

        info!(elapsed_secs = elapsed_secs(start), "reduce phase done");
        Ok(exits)
    }

    /// Sends file i to map worker `i mod n`, then closes every inbound pipe.
    ///
    /// While paths are being written, the workers' outbound pipes are read as well, so a worker
    /// that fills its outbound pipe early never blocks the dispatch. Whatever was read that way
    /// is returned per worker, to be consumed before the rest of that worker's stream.
    pub fn dispatch_files(&self, pool: &mut WorkerPool, files: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
        let n = pool.len();
        let mut pending: Vec<FrameWriter<Vec<u8>>> = (0..n)
            .map(|_| FrameWriter::new(Vec::new(), self.params.bounds()))
            .collect();
        let mut rr = RoundRobin::new(n);
        for path in files {
            let slot = rr.next_slot();
            debug!(path = %path.display(), worker = slot, "dispatching");
            pending[slot].send(path)?;
        }
        let pending: Vec<Vec<u8>> = pending.into_iter().map(FrameWriter::into_inner).collect();

        let mut written = vec![0usize; n];
        let mut prefetched: Vec<Vec<u8>> = vec![Vec::new(); n];
        let mut outbound_open = vec![true; n];

        for (i, h) in pool.handles_mut().iter_mut().enumerate() {
            if pending[i].is_empty() {
                h.inbound = None;
            } else if let Some(f) = h.inbound.as_ref() {
                set_nonblocking(f)?;
            }
        }

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let ready = {
                let mut slots = Vec::new();
                let mut fds = Vec::new();
                for (i, h) in pool.handles().iter().enumerate() {
                    if let Some(ref f) = h.inbound {
                        fds.push(PollFd::new(f.as_fd(), PollFlags::POLLOUT));
                        slots.push(Slot::Inbound(i));
                    }
                }
                if slots.is_empty() {
                    break;
                }
                for (i, h) in pool.handles().iter().enumerate() {
                    if let (true, Some(f)) = (outbound_open[i], h.outbound.as_ref()) {
                        fds.push(PollFd::new(f.as_fd(), PollFlags::POLLIN));
                        slots.push(Slot::Outbound(i));
                    }
                }

                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => (),
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(Error::setup("poll", e)),
                }
                fds.iter()
                    .zip(slots)
                    .filter(|(fd, _)| fd.revents().map_or(false, |r| !r.is_empty()))
                    .map(|(_, s)| s)
                    .collect::<Vec<Slot>>()
            };

            for slot in ready {
                match slot {
                    Slot::Inbound(i) => {
                        let h = &mut pool.handles_mut()[i];
                        let done = match h.inbound {
                            Some(ref mut f) => match f.write(&pending[i][written[i]..]) {
                                Ok(k) => {
                                    written[i] += k;
                                    written[i] == pending[i].len()
                                }
                                Err(ref e) if would_block(e) => false,
                                Err(e) => {
                                    stopped_reading(Error::Io(e), i)?;
                                    true
                                }
                            },
                            None => false,
                        };
                        if done {
                            trace!(worker = i, bytes = written[i], "all paths written");
                            h.inbound = None;
                        }
                    }
                    Slot::Outbound(i) => {
                        if let Some(ref mut f) = pool.handles_mut()[i].outbound {
                            match f.read(&mut buf) {
                                Ok(0) => outbound_open[i] = false,
                                Ok(k) => prefetched[i].extend_from_slice(&buf[..k]),
                                Err(ref e) if would_block(e) => (),
                                Err(e) => return Err(Error::Io(e)),
                            }
                        }
                    }
                }
            }
        }

        pool.close_inbound();
        debug!(files = files.len(), "all paths dispatched");
        Ok(prefetched)
    }

    /// Reads every map worker's pairs to end-of-stream, one worker after the other in pool
    /// order, and folds them into an aggregate. Only the order within one worker's stream is
    /// meaningful.
    pub fn drain_pairs(&self, pool: &mut WorkerPool, prefetched: Vec<Vec<u8>>) -> Result<Aggregate> {
        let mut aggregate = Aggregate::new();
        let mut prefetched = prefetched.into_iter();

        for h in pool.handles_mut().iter_mut() {
            let early = prefetched.next().unwrap_or_default();
            let stream: Box<dyn Read> = match h.outbound.take() {
                Some(f) => Box::new(Cursor::new(early).chain(f)),
                None => Box::new(Cursor::new(early)),
            };
            let pair_limit = self.params.bounds().max_pair_frame();
            let mut reader = FrameReader::new(stream).with_limit(pair_limit.min(DEFAULT_MAX_FRAME));

            let before = aggregate.pairs();
            while let Some(r) = reader.recv::<Record>()? {
                trace!(worker = h.index, key = %r.key, "collected");
                aggregate.insert(r);
            }
            debug!(worker = h.index, pairs = aggregate.pairs() - before, "drained map worker");
        }
        Ok(aggregate)
    }

    /// Blocks until every worker in the pool has terminated. Any worker that did not exit
    /// cleanly fails the job; end-of-stream on its pipe says nothing about that.
    pub fn wait_pool(&self, pool: &mut WorkerPool) -> Result<Vec<WorkerExit>> {
        let exits = pool.wait()?;
        for e in &exits {
            e.check()?;
        }
        Ok(exits)
    }

    /// Sends the group at position j to reducer `j mod r`, then closes every inbound pipe. A group
    /// goes out as its header followed by all of its values, so its size is not limited by any
    /// frame limit.
    pub fn distribute_groups(&self, pool: &mut WorkerPool, aggregate: &Aggregate) -> Result<()> {
        let mut writers: Vec<Option<FrameWriter<io::BufWriter<File>>>> = Vec::with_capacity(pool.len());
        for h in pool.handles_mut().iter_mut() {
            let f = h
                .inbound
                .take()
                .ok_or_else(|| Error::Protocol(format!("reducer {} has no inbound pipe", h.index)))?;
            writers.push(Some(FrameWriter::new(io::BufWriter::new(f), self.params.bounds())));
        }

        let mut sent = vec![0usize; writers.len()];
        let mut rr = RoundRobin::new(writers.len());
        for g in aggregate.iter() {
            let slot = rr.next_slot();
            trace!(key = %g.key, values = g.values.len(), reducer = slot, "distributing");
            if let Some(ref mut w) = writers[slot] {
                match w.send_group(g) {
                    Ok(()) => sent[slot] += 1,
                    Err(e) => {
                        writers[slot] = None;
                        stopped_reading(e, slot)?;
                    }
                }
            }
        }

        for (i, w) in writers.into_iter().enumerate() {
            if let Some(mut w) = w {
                match w.flush() {
                    Ok(()) => {
                        let (bytes, frames) = w.get_stats();
                        debug!(reducer = i, groups = sent[i], frames, bytes, "closing reducer input");
                    }
                    Err(e) => stopped_reading(e, i)?,
                }
            }
        }
        Ok(())
    }
}

/// A worker that went away while being written to is not an error here; wait_pool() reports how
/// it ended. Anything else is.
fn stopped_reading(e: Error, worker: usize) -> Result<()> {
    match e {
        Error::Io(ref ioe) if ioe.kind() == io::ErrorKind::BrokenPipe => {
            debug!(worker, "worker stopped reading its input");
            Ok(())
        }
        e => Err(e),
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Inbound(usize),
    Outbound(usize),
}

fn would_block(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

fn set_nonblocking(f: &File) -> Result<()> {
    let flags = fcntl(f, FcntlArg::F_GETFL).map_err(|e| Error::setup("fcntl", e))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(f, FcntlArg::F_SETFL(flags)).map_err(|e| Error::setup("fcntl", e))?;
    Ok(())
}
