//! Length-prefixed framing, used on every pipe and in the reducer output files.
//!
//! A stream is a sequence of frames, each prefixed by a 4 byte big-endian length:
//!
//! ```text
//! llllbbbbbbllllbbllllbbbbbbbbb...
//! ```
//!
//! Where l is a length byte and b are payload bytes. One frame always carries exactly one
//! message. A stream that ends exactly at a frame boundary is a clean end-of-stream; a stream
//! that ends anywhere else is a protocol violation.

use std::borrow::Cow;
use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::formats::wire::{GroupHeader, GroupValue, WireMessage};
use crate::parameters::Bounds;
use crate::record_types::KeyGroup;

/// Readers refuse frames longer than this unless told otherwise.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

pub struct FrameWriter<W: Write> {
    dest: W,
    bounds: Bounds,
    bytes_written: u64,
    frames_written: u32,
    buf: Vec<u8>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(dest: W, bounds: Bounds) -> FrameWriter<W> {
        FrameWriter {
            dest,
            bounds,
            bytes_written: 0,
            frames_written: 0,
            buf: Vec::new(),
        }
    }

    /// Writes one frame. The prefix and the payload go out in a single write_all() so a frame
    /// is never half-accounted.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| Error::Protocol(format!("frame of {} bytes", payload.len())))?;
        let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(payload);
        self.dest.write_all(&frame)?;

        self.bytes_written += frame.len() as u64;
        self.frames_written += 1;
        Ok(())
    }

    /// Encodes `msg` against this writer's bounds and writes it as one frame.
    pub fn send<M: WireMessage>(&mut self, msg: &M) -> Result<()> {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        let result = msg
            .encode(&self.bounds, &mut buf)
            .and_then(|_| self.write_frame(&buf));
        self.buf = buf;
        result
    }

    /// Writes a key group as its header frame followed by one frame per value.
    pub fn send_group(&mut self, group: &KeyGroup) -> Result<()> {
        self.send(&GroupHeader {
            key: Cow::Borrowed(group.key.as_str()),
            count: group.values.len(),
        })?;
        for v in &group.values {
            self.send(&GroupValue(Cow::Borrowed(v.as_str())))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.dest.flush()?;
        Ok(())
    }

    /// Return how many (bytes,frames) have been written.
    pub fn get_stats(&self) -> (u64, u32) {
        (self.bytes_written, self.frames_written)
    }

    pub fn into_inner(self) -> W {
        self.dest
    }
}

pub struct FrameReader<R: Read> {
    src: R,
    max_frame: usize,
    frames_read: u32,
    bytes_read: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(src: R) -> FrameReader<R> {
        FrameReader {
            src,
            max_frame: DEFAULT_MAX_FRAME,
            frames_read: 0,
            bytes_read: 0,
        }
    }

    /// Frames announcing a longer payload than `max` are rejected before anything is allocated.
    pub fn with_limit(mut self, max: usize) -> FrameReader<R> {
        self.max_frame = max;
        self
    }

    pub fn get_stats(&self) -> (u32, usize) {
        (self.frames_read, self.bytes_read)
    }

    /// Fills `buf` completely. Returns the number of bytes read before the source ran dry,
    /// which is less than `buf.len()` only at end-of-stream.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut off = 0;
        while off < buf.len() {
            match self.src.read(&mut buf[off..]) {
                Ok(0) => break,
                Ok(s) => off += s,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.bytes_read += off;
        Ok(off)
    }

    /// Reads the next frame's payload. Ok(None) means the stream ended cleanly at a frame
    /// boundary.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut lengthbuf = [0; PREFIX_LEN];
        match self.read_bytes(&mut lengthbuf)? {
            0 => return Ok(None),
            PREFIX_LEN => (),
            n => {
                return Err(Error::Protocol(format!(
                    "stream ended inside a length prefix ({} of {} bytes)",
                    n, PREFIX_LEN
                )))
            }
        }

        let length = u32::from_be_bytes(lengthbuf) as usize;
        if length > self.max_frame {
            return Err(Error::Protocol(format!(
                "frame of {} bytes exceeds the limit of {}",
                length, self.max_frame
            )));
        }

        let mut buffer = vec![0; length];
        let got = self.read_bytes(&mut buffer)?;
        if got < length {
            return Err(Error::Protocol(format!(
                "stream ended inside a frame ({} of {} bytes)",
                got, length
            )));
        }
        self.frames_read += 1;
        Ok(Some(buffer))
    }

    /// Reads and decodes the next message; Ok(None) at end-of-stream.
    pub fn recv<M: WireMessage>(&mut self) -> Result<Option<M>> {
        match self.read_frame()? {
            None => Ok(None),
            Some(payload) => M::decode(&payload).map(Some),
        }
    }

    /// Reads a key group written by `FrameWriter::send_group`; Ok(None) at end-of-stream. A
    /// stream that ends before all announced values arrived is a protocol violation.
    pub fn recv_group(&mut self) -> Result<Option<KeyGroup>> {
        let header = match self.recv::<GroupHeader>()? {
            Some(h) => h,
            None => return Ok(None),
        };
        let mut group = KeyGroup::new(header.key.into_owned());
        for i in 0..header.count {
            match self.recv::<GroupValue>()? {
                Some(v) => group.values.push(v.0.into_owned()),
                None => {
                    return Err(Error::Protocol(format!(
                        "stream ended after {} of {} values for key {:?}",
                        i, header.count, group.key
                    )))
                }
            }
        }
        Ok(Some(group))
    }
}

/// Iterates over the frames of a stream, yielding decoded messages. A protocol error ends the
/// iteration after being yielded once.
pub struct MessageIter<M, R: Read> {
    reader: FrameReader<R>,
    done: bool,
    _msg: std::marker::PhantomData<M>,
}

impl<M: WireMessage, R: Read> MessageIter<M, R> {
    pub fn new(reader: FrameReader<R>) -> MessageIter<M, R> {
        MessageIter {
            reader,
            done: false,
            _msg: std::marker::PhantomData,
        }
    }
}

impl<M: WireMessage, R: Read> Iterator for MessageIter<M, R> {
    type Item = Result<M>;
    fn next(&mut self) -> Option<Result<M>> {
        if self.done {
            return None;
        }
        match self.reader.recv() {
            Ok(Some(m)) => Some(Ok(m)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
