//! Payload encodings for the three message kinds that travel between processes.
//!
//! All integers are big-endian u32.
//!
//! * path:   the raw bytes of the path
//! * pair:   key length, key bytes, value bytes (the value runs to the end of the frame)
//! * group header: key length, key bytes, value count
//! * group value:  the raw bytes of one value
//!
//! A key group travels as its header frame followed by exactly `count` value frames, so no
//! single frame grows with the number of values.
//! Encoding enforces `Bounds`: an over-long path, key or value is rejected with
//! `Error::TooLong`. Decoding checks structure only.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::parameters::Bounds;
use crate::record_types::Record;

pub trait WireMessage: Sized {
    fn encode(&self, bounds: &Bounds, buf: &mut Vec<u8>) -> Result<()>;
    fn decode(buf: &[u8]) -> Result<Self>;
}

fn check_len(what: &'static str, len: usize, max: usize) -> Result<()> {
    if len > max {
        Err(Error::TooLong { what, len, max })
    } else {
        Ok(())
    }
}

fn put_u32(buf: &mut Vec<u8>, val: usize) -> Result<()> {
    let val = u32::try_from(val).map_err(|_| Error::Protocol(format!("length {} overflows u32", val)))?;
    buf.extend_from_slice(&val.to_be_bytes());
    Ok(())
}

/// A cursor over a payload that turns every out-of-range access into a protocol error.
struct Decoder<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Decoder<'a> {
        Decoder { buf, off: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .off
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "message needs {} more bytes at offset {}, has {}",
                    n,
                    self.off,
                    self.buf.len() - self.off
                ))
            })?;
        let buf: &'a [u8] = self.buf;
        self.off = end;
        Ok(&buf[end - n..end])
    }

    fn u32(&mut self) -> Result<usize> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
    }

    fn string(&mut self, n: usize) -> Result<String> {
        let b = self.take(n)?;
        String::from_utf8(b.to_vec()).map_err(|e| Error::Protocol(format!("invalid UTF-8: {}", e)))
    }

    fn rest(&mut self) -> Result<String> {
        let n = self.buf.len() - self.off;
        self.string(n)
    }

    fn finish(&self) -> Result<()> {
        if self.off == self.buf.len() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{} trailing bytes after message",
                self.buf.len() - self.off
            )))
        }
    }
}

impl WireMessage for PathBuf {
    fn encode(&self, bounds: &Bounds, buf: &mut Vec<u8>) -> Result<()> {
        let bytes = self.as_os_str().as_bytes();
        check_len("path", bytes.len(), bounds.max_path)?;
        buf.extend_from_slice(bytes);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<PathBuf> {
        if buf.is_empty() {
            return Err(Error::Protocol(String::from("empty path")));
        }
        Ok(PathBuf::from(OsStr::from_bytes(buf)))
    }
}

impl WireMessage for Record {
    fn encode(&self, bounds: &Bounds, buf: &mut Vec<u8>) -> Result<()> {
        check_len("key", self.key.len(), bounds.max_key)?;
        check_len("value", self.value.len(), bounds.max_value)?;
        put_u32(buf, self.key.len())?;
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(self.value.as_bytes());
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Record> {
        let mut d = Decoder::new(buf);
        let klen = d.u32()?;
        let key = d.string(klen)?;
        let value = d.rest()?;
        Ok(Record { key, value })
    }
}

/// The first frame of a streamed key group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupHeader<'a> {
    pub key: Cow<'a, str>,
    pub count: usize,
}

impl<'a> WireMessage for GroupHeader<'a> {
    fn encode(&self, bounds: &Bounds, buf: &mut Vec<u8>) -> Result<()> {
        check_len("key", self.key.len(), bounds.max_key)?;
        put_u32(buf, self.key.len())?;
        buf.extend_from_slice(self.key.as_bytes());
        put_u32(buf, self.count)
    }

    fn decode(buf: &[u8]) -> Result<GroupHeader<'a>> {
        let mut d = Decoder::new(buf);
        let klen = d.u32()?;
        let key = d.string(klen)?;
        let count = d.u32()?;
        d.finish()?;
        Ok(GroupHeader {
            key: Cow::Owned(key),
            count,
        })
    }
}

/// One value frame of a streamed key group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupValue<'a>(pub Cow<'a, str>);

impl<'a> WireMessage for GroupValue<'a> {
    fn encode(&self, bounds: &Bounds, buf: &mut Vec<u8>) -> Result<()> {
        check_len("value", self.0.len(), bounds.max_value)?;
        buf.extend_from_slice(self.0.as_bytes());
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<GroupValue<'a>> {
        Decoder::new(buf).rest().map(|v| GroupValue(Cow::Owned(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<M: WireMessage>(m: &M, bounds: &Bounds) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        m.encode(bounds, &mut buf).map(|_| buf)
    }

    #[test]
    fn test_pair_layout() {
        let buf = encoded(&Record::new("ab", "xyz"), &Bounds::default()).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 2, b'a', b'b', b'x', b'y', b'z']);
        assert_eq!(Record::decode(&buf).unwrap(), Record::new("ab", "xyz"));
    }

    #[test]
    fn test_pair_with_empty_value() {
        let buf = encoded(&Record::new("k", ""), &Bounds::default()).unwrap();
        assert_eq!(Record::decode(&buf).unwrap(), Record::new("k", ""));
    }

    #[test]
    fn test_group_header_layout() {
        let h = GroupHeader {
            key: Cow::Borrowed("c"),
            count: 3,
        };
        let buf = encoded(&h, &Bounds::default()).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 1, b'c', 0, 0, 0, 3]);
        assert_eq!(GroupHeader::decode(&buf).unwrap(), h);

        let v = GroupValue(Cow::Borrowed("xyz"));
        assert_eq!(GroupValue::decode(&encoded(&v, &Bounds::default()).unwrap()).unwrap(), v);
    }

    #[test]
    fn test_bounds_are_rejected_not_truncated() {
        let bounds = Bounds {
            max_path: 8,
            max_key: 3,
            max_value: 2,
        };
        assert!(matches!(
            encoded(&Record::new("abcd", "1"), &bounds),
            Err(Error::TooLong { what: "key", len: 4, max: 3 })
        ));
        assert!(matches!(
            encoded(&Record::new("abc", "123"), &bounds),
            Err(Error::TooLong { what: "value", .. })
        ));
        assert!(matches!(
            encoded(&GroupValue(Cow::Borrowed("123")), &bounds),
            Err(Error::TooLong { what: "value", .. })
        ));
        assert!(matches!(
            encoded(&PathBuf::from("dir/file.txt"), &bounds),
            Err(Error::TooLong { what: "path", len: 12, max: 8 })
        ));
        // exactly at the bound is fine
        assert!(encoded(&PathBuf::from("dir/a.tx"), &bounds).is_ok());
    }

    #[test]
    fn test_path_bytes() {
        let p = PathBuf::from("in/a b.txt");
        let buf = encoded(&p, &Bounds::default()).unwrap();
        assert_eq!(buf, b"in/a b.txt".to_vec());
        assert_eq!(PathBuf::decode(&buf).unwrap(), p);
        assert!(PathBuf::decode(&[]).is_err());
    }

    #[test]
    fn test_malformed_messages() {
        // key length larger than the payload
        assert!(matches!(Record::decode(&[0, 0, 0, 9, b'a']), Err(Error::Protocol(_))));
        // header cut off inside the value count
        assert!(matches!(GroupHeader::decode(&[0, 0, 0, 1, b'k', 0, 0]), Err(Error::Protocol(_))));
        // trailing garbage after a header
        let mut buf = encoded(
            &GroupHeader {
                key: Cow::Borrowed("k"),
                count: 1,
            },
            &Bounds::default(),
        )
        .unwrap();
        buf.push(0);
        assert!(matches!(GroupHeader::decode(&buf), Err(Error::Protocol(_))));
        // invalid UTF-8 key
        assert!(matches!(Record::decode(&[0, 0, 0, 1, 0xff]), Err(Error::Protocol(_))));
    }
}
