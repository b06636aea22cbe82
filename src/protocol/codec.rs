//! Primitive wire types.
//!
//! Every multi-byte integer is big-endian. `Bytes` and `String` are prefixed
//! with a signed 32-bit length where `-1` stands for null.

use bytes::{BufMut, BytesMut};
use orientdb_record::{csv, Document, Rid};
use uuid::Uuid;

use crate::error::ServerError;

pub const NULL_LENGTH: i32 = -1;

/// Upper bound for one length-prefixed value and for the unread part of a
/// response.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Record tag for an absent record.
pub const RECORD_NULL: i16 = -2;
/// Record tag for a bare record id.
pub const RECORD_RID: i16 = -3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ends before the value does.
    Incomplete,
    /// The bytes cannot be a valid value.
    Invalid(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn byte(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn char(&mut self, value: char) -> &mut Self {
        self.byte(value as u8)
    }

    pub fn boolean(&mut self, value: bool) -> &mut Self {
        self.byte(value as u8)
    }

    pub fn short(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16(value);
        self
    }

    pub fn int(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    pub fn long(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64(value);
        self
    }

    pub fn bytes(&mut self, value: Option<&[u8]>) -> &mut Self {
        match value {
            Some(data) => {
                self.buf.put_i32(data.len() as i32);
                self.buf.put_slice(data);
            }
            None => self.buf.put_i32(NULL_LENGTH),
        }
        self
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.bytes(Some(value.as_bytes()))
    }

    pub fn opt_string(&mut self, value: Option<&str>) -> &mut Self {
        self.bytes(value.map(str::as_bytes))
    }

    pub fn uuid(&mut self, value: &Uuid) -> &mut Self {
        for word in value.as_bytes().chunks_exact(4) {
            self.buf.put_slice(word);
        }
        self
    }

    pub fn rid(&mut self, rid: &Rid) -> &mut Self {
        self.short(rid.cluster).long(rid.position)
    }

    /// A document in its CSV record form.
    pub fn object(&mut self, doc: &Document) -> &mut Self {
        self.string(&csv::serialize(doc))
    }

    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// A cursor over received bytes. Reads never advance past a value that is
/// not fully present.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn byte(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn char(&mut self) -> CodecResult<char> {
        Ok(self.byte()? as char)
    }

    pub fn boolean(&mut self) -> CodecResult<bool> {
        Ok(self.byte()? != 0)
    }

    pub fn short(&mut self) -> CodecResult<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub fn int(&mut self) -> CodecResult<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn long(&mut self) -> CodecResult<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub fn bytes(&mut self) -> CodecResult<Option<Vec<u8>>> {
        let len = self.int()?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        if len < 0 {
            return Err(CodecError::Invalid(format!("negative length {}", len)));
        }
        let len = len as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(CodecError::Invalid(format!(
                "length {} exceeds the {} byte limit",
                len, MAX_MESSAGE_SIZE
            )));
        }
        Ok(Some(self.take(len)?.to_vec()))
    }

    pub fn string(&mut self) -> CodecResult<Option<String>> {
        match self.bytes()? {
            Some(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|e| CodecError::Invalid(format!("invalid UTF-8 string: {}", e))),
            None => Ok(None),
        }
    }

    /// A string that is never null on the wire; null reads as empty.
    pub fn text(&mut self) -> CodecResult<String> {
        Ok(self.string()?.unwrap_or_default())
    }

    pub fn uuid(&mut self) -> CodecResult<Uuid> {
        Ok(Uuid::from_bytes(self.array()?))
    }

    pub fn rid(&mut self) -> CodecResult<Rid> {
        let cluster = self.short()?;
        let position = self.long()?;
        Ok(Rid::new(cluster, position))
    }

    /// Error chain: a leading byte, then `(class, message, has_more)` entries
    /// until `has_more` is false, then the serialized trace.
    pub fn error(&mut self) -> CodecResult<ServerError> {
        self.byte()?;
        let mut entries = Vec::new();
        loop {
            let class = self.text()?;
            let message = self.text()?;
            let has_more = self.boolean()?;
            entries.push(ServerError::new(class, message));
            if !has_more {
                break;
            }
        }
        let trace = self.bytes()?;

        let mut head: Option<ServerError> = None;
        for mut entry in entries {
            entry.prev = head.map(Box::new);
            head = Some(entry);
        }
        let mut head = head.ok_or_else(|| CodecError::Invalid("empty error chain".into()))?;
        head.trace = trace;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_is_full_64_bit() {
        let mut w = Writer::new();
        w.long(0x0102_0304_0506_0708).long(-2);
        let data = w.finish();
        assert_eq!(&data[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut r = Reader::new(&data);
        assert_eq!(r.long().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(r.long().unwrap(), -2);
    }

    #[test]
    fn test_null_and_empty_bytes() {
        let mut w = Writer::new();
        w.bytes(None).bytes(Some(&[])).string("hé");
        let data = w.finish();
        assert_eq!(&data[..4], &[0xff, 0xff, 0xff, 0xff]);

        let mut r = Reader::new(&data);
        assert_eq!(r.bytes().unwrap(), None);
        assert_eq!(r.bytes().unwrap(), Some(vec![]));
        assert_eq!(r.string().unwrap().as_deref(), Some("hé"));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_short_buffer_is_incomplete() {
        let mut w = Writer::new();
        w.string("hello");
        let data = w.finish();
        for cut in 0..data.len() {
            let mut r = Reader::new(&data[..cut]);
            assert_eq!(r.string(), Err(CodecError::Incomplete));
        }
    }

    #[test]
    fn test_negative_length_is_invalid() {
        let data = (-5i32).to_be_bytes();
        assert!(matches!(Reader::new(&data).bytes(), Err(CodecError::Invalid(_))));
    }

    #[test]
    fn test_oversized_length_is_invalid() {
        let mut data = i32::MAX.to_be_bytes().to_vec();
        data.extend_from_slice(b"abc");
        assert!(matches!(Reader::new(&data).bytes(), Err(CodecError::Invalid(_))));

        let mut w = Writer::new();
        w.int(MAX_MESSAGE_SIZE as i32);
        let data = w.finish();
        assert_eq!(Reader::new(&data).bytes(), Err(CodecError::Incomplete));
    }

    #[test]
    fn test_rid_and_uuid() {
        let id = Uuid::new_v4();
        let mut w = Writer::new();
        w.rid(&Rid::new(12, 9_000_000_000)).uuid(&id);
        let data = w.finish();
        assert_eq!(data.len(), 2 + 8 + 16);

        let mut r = Reader::new(&data);
        assert_eq!(r.rid().unwrap(), Rid::new(12, 9_000_000_000));
        assert_eq!(r.uuid().unwrap(), id);
    }

    #[test]
    fn test_error_chain_links_earlier_entries() {
        let mut w = Writer::new();
        w.byte(1)
            .string("com.orientechnologies.OException")
            .string("outer")
            .boolean(true)
            .string("java.io.IOException")
            .string("inner")
            .boolean(false)
            .bytes(Some(&b"trace"[..]));
        let data = w.finish();

        let err = Reader::new(&data).error().unwrap();
        assert_eq!(err.message, "inner");
        assert_eq!(err.prev.as_ref().unwrap().message, "outer");
        assert!(err.prev.as_ref().unwrap().prev.is_none());
        assert_eq!(err.trace.as_deref(), Some(&b"trace"[..]));
    }
}
