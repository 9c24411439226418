//! A MapReducer that uses supplied map()/reduce() functions.

use crate::mapreducer::{MapReducer, MapperF, ReducerF};
use crate::record_types::{MEmitter, Record};

/// This type implements the MapReducer trait. You can use it to provide your own functions to a
/// MapReduce process. If you need more flexibility, however, you may want to simply implement your
/// own type that fulfills MapReducer.
#[derive(Clone, Copy)]
pub struct ClosureMapReducer {
    mapper: MapperF,
    reducer: ReducerF,
}

impl ClosureMapReducer {
    /// Create a new MapReducer from the supplied functions.
    pub fn new(mapper: MapperF, reducer: ReducerF) -> ClosureMapReducer {
        ClosureMapReducer { mapper, reducer }
    }
}

impl MapReducer for ClosureMapReducer {
    fn map(&self, e: &mut MEmitter, chunk: &str) {
        (self.mapper)(e, chunk)
    }
    fn reduce(&self, key: &str, values: &[String]) -> Record {
        (self.reducer)(key, values)
    }
}
