//! Word frequency counting, the transform wired into the `mapreduce` binary.

use crate::mapreducer::MapReducer;
use crate::parameters::{MRParameters, DEFAULT_MAX_KEY};
use crate::record_types::{MEmitter, Record};

/// Word counting that skips words longer than the job's key bound, so long tokens never fail a
/// map worker.
#[derive(Clone, Copy, Debug)]
pub struct WordFreq {
    max_key: usize,
}

impl WordFreq {
    pub fn new(params: &MRParameters) -> WordFreq {
        WordFreq {
            max_key: params.max_key_len,
        }
    }
}

impl MapReducer for WordFreq {
    fn map(&self, e: &mut MEmitter, chunk: &str) {
        emit_words(e, chunk, self.max_key)
    }

    fn reduce(&self, key: &str, values: &[String]) -> Record {
        reduce(key, values)
    }
}

fn emit_words(e: &mut MEmitter, chunk: &str, max_key: usize) {
    for w in chunk.split_whitespace() {
        if w.len() <= max_key {
            e.emit(w, "1");
        }
    }
}

/// Emits (word, "1") for every whitespace-separated word of the chunk, skipping words longer
/// than `DEFAULT_MAX_KEY`. Jobs with a lower key bound should use `WordFreq` instead.
pub fn map(e: &mut MEmitter, chunk: &str) {
    emit_words(e, chunk, DEFAULT_MAX_KEY)
}

/// Sums the numeric values of a word. Values that don't parse count as 0.
pub fn reduce(key: &str, values: &[String]) -> Record {
    let count: u64 = values.iter().filter_map(|v| v.parse::<u64>().ok()).sum();
    Record::new(key, count.to_string())
}
