//! The MapReducer trait and associated types.

use crate::record_types::{MEmitter, Record};

/// map() function type. The MEmitter argument is used to emit (key,value) pairs for one chunk
/// of input text.
pub type MapperF = fn(&mut MEmitter, &str);
/// reduce() function type. Takes a key and every value aggregated for it and returns exactly
/// one (key,value) pair.
pub type ReducerF = fn(&str, &[String]) -> Record;

/// The pluggable business logic of a job. Both methods run inside forked worker processes, so
/// an implementation can freely use `self` state captured before the pools are spawned; changes
/// made in one worker are never seen by another worker or by the coordinator.
pub trait MapReducer {
    /// Called once per chunk of an input file.
    fn map(&self, em: &mut MEmitter, chunk: &str);

    /// Called once per key group.
    fn reduce(&self, key: &str, values: &[String]) -> Record;
}
