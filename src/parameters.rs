//! Parameters for a mapreduce process.
//!

use std::path::PathBuf;

/// Default maximum length of a dispatched file path, in bytes.
pub const DEFAULT_MAX_PATH: usize = 4096;
/// Default maximum length of a key emitted by map() or reduce().
pub const DEFAULT_MAX_KEY: usize = 64;
/// Default maximum length of a value emitted by map() or reduce().
pub const DEFAULT_MAX_VALUE: usize = 256;
/// Largest accepted read size. A map worker holds one chunk of this size in memory.
pub const MAX_READ_SIZE: usize = 16 * 1024 * 1024;

/// Length limits enforced on everything that crosses a pipe or lands in an output file.
/// Anything longer is rejected, never truncated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub max_path: usize,
    pub max_key: usize,
    pub max_value: usize,
}

impl Bounds {
    /// Longest frame a pair can occupy.
    pub fn max_pair_frame(&self) -> usize {
        4 + self.max_key + self.max_value
    }

    /// Longest frame of a streamed key group: either its header or one of its values.
    pub fn max_group_frame(&self) -> usize {
        (8 + self.max_key).max(self.max_value)
    }
}

impl Default for Bounds {
    fn default() -> Bounds {
        Bounds {
            max_path: DEFAULT_MAX_PATH,
            max_key: DEFAULT_MAX_KEY,
            max_value: DEFAULT_MAX_VALUE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MRParameters {
    pub mappers: usize,
    pub reducers: usize,

    pub read_size: usize,

    pub max_path_len: usize,
    pub max_key_len: usize,
    pub max_value_len: usize,

    pub output_dir: PathBuf,
    pub output_suffix: String,

    pub lister: String,
}

impl Default for MRParameters {
    fn default() -> MRParameters {
        MRParameters::new()
    }
}

impl MRParameters {
    pub fn new() -> MRParameters {
        MRParameters {
            mappers: 2,
            reducers: 2,
            read_size: 4096,
            max_path_len: DEFAULT_MAX_PATH,
            max_key_len: DEFAULT_MAX_KEY,
            max_value_len: DEFAULT_MAX_VALUE,
            output_dir: PathBuf::from("."),
            output_suffix: String::from(".out"),
            lister: String::from("ls"),
        }
    }

    /// Determines how many worker processes will be forked. Mappers and reducers never run at
    /// the same time: the reduce pool is only forked once all map output has been aggregated.
    /// Both values are clamped to at least 1.
    ///
    /// Default 2/2
    pub fn set_concurrency(mut self, mappers: usize, reducers: usize) -> MRParameters {
        self.mappers = mappers.max(1);
        self.reducers = reducers.max(1);
        self
    }

    /// How many bytes a map worker reads from its input file before calling map(). Chunks are
    /// cut after their last whitespace, so a token is only split when it is longer than this.
    ///
    /// Clamped to 1..=MAX_READ_SIZE.
    ///
    /// Default 4096
    pub fn set_read_size(mut self, size: usize) -> MRParameters {
        self.read_size = size.clamp(1, MAX_READ_SIZE);
        self
    }

    /// Maximum lengths for paths, keys and values.
    ///
    /// Default 4096/64/256
    pub fn set_bounds(mut self, max_path: usize, max_key: usize, max_value: usize) -> MRParameters {
        self.max_path_len = max_path;
        self.max_key_len = max_key;
        self.max_value_len = max_value;
        self
    }

    /// Directory in which every reducer creates its `<pid><suffix>` output file.
    /// Default: the current directory.
    pub fn set_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> MRParameters {
        self.output_dir = dir.into();
        self
    }

    /// Default: .out
    pub fn set_output_suffix(mut self, suffix: &str) -> MRParameters {
        self.output_suffix = String::from(suffix);
        self
    }

    /// Program used to list the input directory. It is run as `<program> <dirname>` and must
    /// print whitespace-separated file names.
    ///
    /// Default: ls
    pub fn set_lister(mut self, program: &str) -> MRParameters {
        self.lister = String::from(program);
        self
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            max_path: self.max_path_len,
            max_key: self.max_key_len,
            max_value: self.max_value_len,
        }
    }
}
