//! Implements a mapreduce process bounded to one machine, with one OS process per worker.
//!
//! The coordinator (`controller::MRController`) lists an input directory with an external
//! lister, forks a pool of map workers and feeds them file paths round robin over pipes. The
//! map workers send their (key,value) pairs back over pipes; the coordinator folds them into key
//! groups and then forks a pool of reduce workers, which receive the groups round robin and
//! each write their own output file. All pipe traffic is length-prefixed (`formats::frame`).
//!
//! Transforms are plugged in through the `MapReducer` trait, or as two plain functions with
//! `ClosureMapReducer`.

pub mod aggregate;
pub mod closure_mr;
pub mod controller;
pub mod error;
pub mod formats;
pub mod lister;
pub mod map;
pub mod mapreducer;
pub mod parameters;
pub mod phases;
pub mod pool;
pub mod record_types;
pub mod reduce;
pub mod word_freq;

pub use closure_mr::ClosureMapReducer;
pub use controller::{JobReport, MRController};
pub use error::{Error, Result};
pub use mapreducer::MapReducer;
pub use parameters::MRParameters;
pub use record_types::{KeyGroup, MEmitter, Record};
