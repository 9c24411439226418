//! Byte-level formats: framing on pipes and in output files, the message encodings carried in
//! those frames, and the chunking of input files.

pub mod chunks;
pub mod frame;
pub mod wire;
