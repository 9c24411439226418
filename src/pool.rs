//! Worker process pools: forking, pipe plumbing and reaping.
//!
//! Every worker gets its own pair of unidirectional pipes. The coordinator keeps the write end
//! of the inbound pipe and (for map workers) the read end of the outbound pipe; the worker keeps
//! the complementary ends. A freshly forked worker closes every coordinator-side end it
//! inherited, including those of its older siblings, so that each pipe has exactly one writer
//! and one reader and end-of-stream is observed as soon as that writer closes.

use std::fmt;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Exit status of a worker whose body returned an error.
pub const EXIT_FAILURE: i32 = 1;
/// Exit status of a worker whose body panicked.
pub const EXIT_PANIC: i32 = 101;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Map,
    Reduce,
}

impl Role {
    /// Only map workers talk back to the coordinator.
    fn has_outbound(self) -> bool {
        matches!(self, Role::Map)
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Map => "map",
            Role::Reduce => "reduce",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Liveness of a worker as last observed by the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Exited(i32),
    Signaled(String),
}

impl WorkerState {
    pub fn is_success(&self) -> bool {
        *self == WorkerState::Exited(0)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WorkerState::Running => write!(f, "is still running"),
            WorkerState::Exited(code) => write!(f, "exited with status {}", code),
            WorkerState::Signaled(sig) => write!(f, "was killed by {}", sig),
        }
    }
}

/// The ends a worker process keeps.
pub struct WorkerEnds {
    pub index: usize,
    pub inbound: File,
    pub outbound: Option<File>,
}

/// The coordinator's view of one worker.
pub struct WorkerHandle {
    pub index: usize,
    pub pid: Pid,
    /// Write end of the worker's inbound pipe; None once closed.
    pub inbound: Option<File>,
    /// Read end of the worker's outbound pipe; None for reducers and once drained.
    pub outbound: Option<File>,
    pub state: WorkerState,
}

/// Outcome of one reaped worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerExit {
    pub role: Role,
    pub index: usize,
    pub pid: i32,
    pub state: WorkerState,
}

impl WorkerExit {
    pub fn check(&self) -> Result<()> {
        if self.state.is_success() {
            Ok(())
        } else {
            Err(Error::WorkerFailed {
                role: self.role.name(),
                index: self.index,
                pid: self.pid,
                state: self.state.to_string(),
            })
        }
    }
}

pub struct WorkerPool {
    role: Role,
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Forks `n` workers of the given role. In each child, `body` runs with the child's pipe
    /// ends and the child exits with 0 on Ok, EXIT_FAILURE on Err and EXIT_PANIC on a panic;
    /// `spawn` only returns in the coordinator.
    pub fn spawn<F>(role: Role, n: usize, mut body: F) -> Result<WorkerPool>
    where
        F: FnMut(WorkerEnds) -> Result<()>,
    {
        let mut handles: Vec<WorkerHandle> = Vec::with_capacity(n);

        for index in 0..n {
            let (in_rx, in_tx) = pipe().map_err(|e| Error::setup("pipe", e))?;
            let out = if role.has_outbound() {
                Some(pipe().map_err(|e| Error::setup("pipe", e))?)
            } else {
                None
            };

            // Safety: the child only touches memory it owns after the fork and leaves through
            // process::exit without returning into the caller.
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => {
                    drop(in_rx);
                    let outbound = out.map(|(out_rx, out_tx)| {
                        drop(out_tx);
                        File::from(out_rx)
                    });
                    debug!(role = %role, index, pid = child.as_raw(), "spawned worker");
                    handles.push(WorkerHandle {
                        index,
                        pid: child,
                        inbound: Some(File::from(in_tx)),
                        outbound,
                        state: WorkerState::Running,
                    });
                }
                Ok(ForkResult::Child) => {
                    drop(in_tx);
                    // Siblings' coordinator-side ends must not stay open in here.
                    handles.clear();
                    let ends = WorkerEnds {
                        index,
                        inbound: File::from(in_rx),
                        outbound: out.map(|(out_rx, out_tx)| {
                            drop(out_rx);
                            File::from(out_tx)
                        }),
                    };
                    let code = match panic::catch_unwind(AssertUnwindSafe(|| body(ends))) {
                        Ok(Ok(())) => 0,
                        Ok(Err(e)) => {
                            error!(role = %role, index, "worker failed: {}", e);
                            EXIT_FAILURE
                        }
                        Err(_) => {
                            error!(role = %role, index, "worker panicked");
                            EXIT_PANIC
                        }
                    };
                    std::process::exit(code);
                }
                Err(e) => return Err(Error::setup("fork", e)),
            }
        }

        Ok(WorkerPool { role, handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut [WorkerHandle] {
        &mut self.handles
    }

    /// Closes every inbound pipe; each worker sees end-of-stream once it has read what is
    /// already buffered.
    pub fn close_inbound(&mut self) {
        for h in self.handles.iter_mut() {
            h.inbound = None;
        }
    }

    /// Blocks until every worker in the pool has terminated and returns their exit states in
    /// pool order. Inbound pipes are closed first so no worker waits for input forever.
    pub fn wait(&mut self) -> Result<Vec<WorkerExit>> {
        self.close_inbound();
        let role = self.role;
        let mut exits = Vec::with_capacity(self.handles.len());

        for h in self.handles.iter_mut() {
            h.outbound = None;
            if h.state == WorkerState::Running {
                h.state = reap(h.pid)?;
            }
            let exit = WorkerExit {
                role,
                index: h.index,
                pid: h.pid.as_raw(),
                state: h.state.clone(),
            };
            if exit.state.is_success() {
                debug!(role = %role, index = h.index, pid = exit.pid, "worker done");
            } else {
                warn!(role = %role, index = h.index, pid = exit.pid, "worker {}", exit.state);
            }
            exits.push(exit);
        }
        Ok(exits)
    }
}

/// Blocking waitpid() on one child until it has exited or been killed.
fn reap(pid: Pid) -> Result<WorkerState> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(WorkerState::Exited(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(WorkerState::Signaled(sig.to_string())),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(Error::setup("waitpid", e)),
        }
    }
}
