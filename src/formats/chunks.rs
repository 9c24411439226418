//! Splits an input file into text chunks for map().
//!
//! A chunk is filled up to `read_size` bytes and then cut after its last ASCII whitespace
//! byte; whatever follows is carried over to the front of the next chunk. This keeps words
//! whole across chunk boundaries. A run of `read_size` bytes without any whitespace is passed
//! on as it is, so such a token does get split, but only between characters.

use std::io::{self, Read};

pub struct ChunkReader<R: Read> {
    src: R,
    read_size: usize,
    carry: Vec<u8>,
    eof: bool,
    chunks_read: u32,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(src: R, read_size: usize) -> ChunkReader<R> {
        let read_size = read_size.max(1);
        ChunkReader {
            src,
            read_size,
            carry: Vec::with_capacity(read_size),
            eof: false,
            chunks_read: 0,
        }
    }

    pub fn chunks_read(&self) -> u32 {
        self.chunks_read
    }

    /// Tops the carry buffer up to `read_size` bytes or until end of file.
    fn fill(&mut self) -> io::Result<()> {
        while !self.eof && self.carry.len() < self.read_size {
            let start = self.carry.len();
            self.carry.resize(self.read_size, 0);
            match self.src.read(&mut self.carry[start..]) {
                Ok(0) => {
                    self.carry.truncate(start);
                    self.eof = true;
                }
                Ok(n) => self.carry.truncate(start + n),
                Err(e) => {
                    self.carry.truncate(start);
                    if e.kind() != io::ErrorKind::Interrupted {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the next chunk, or None once the input is exhausted. Invalid UTF-8 is replaced
    /// rather than rejected.
    pub fn next_chunk(&mut self) -> io::Result<Option<String>> {
        self.fill()?;
        if self.carry.is_empty() {
            return Ok(None);
        }

        let cut = if self.eof {
            self.carry.len()
        } else {
            match self.carry.iter().rposition(u8::is_ascii_whitespace) {
                Some(pos) => pos + 1,
                None => char_boundary(&self.carry),
            }
        };

        let rest = self.carry.split_off(cut);
        let chunk = std::mem::replace(&mut self.carry, rest);
        self.chunks_read += 1;
        Ok(Some(String::from_utf8_lossy(&chunk).into_owned()))
    }
}

/// The longest prefix of `buf` that doesn't end inside a UTF-8 sequence. If `buf` holds nothing
/// but the start of one sequence, all of it is returned.
fn char_boundary(buf: &[u8]) -> usize {
    for back in 1..=buf.len().min(4) {
        let pos = buf.len() - back;
        let b = buf[pos];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let seq_len = match b {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if back >= seq_len || pos == 0 { buf.len() } else { pos };
    }
    buf.len()
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = io::Result<String>;
    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
