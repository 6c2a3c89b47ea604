//! Object stream, several non-stream objects packed into one stream.
use super::{FileError, FileResult};
use crate::{
    filter::FILTER_FLATE_DECODE,
    object::{Dictionary, Name, Object, Stream},
    parser::{parse_object, ws_prefixed, ParseResult},
};
use nom::{
    character::complete::{multispace0, multispace1, u32, u64},
    multi::count,
    sequence::{separated_pair, terminated},
};

fn parse_header(n: usize, buf: &[u8]) -> ParseResult<'_, Vec<(u32, u64)>> {
    ws_prefixed(count(
        terminated(separated_pair(u32, multispace1, u64), multispace0),
        n,
    ))(buf)
}

/// Decoded object stream: header of (object number, offset) pairs, offsets
/// relative to `first`.
#[derive(Debug)]
pub struct ObjectStream {
    data: Vec<u8>,
    first: usize,
    entries: Vec<(u32, usize)>,
}

impl ObjectStream {
    /// `data` is the decoded stream payload.
    pub fn parse(d: &Dictionary, data: Vec<u8>) -> FileResult<Self> {
        if !d.is_type("ObjStm") {
            return Err(FileError::Format("object stream type is not ObjStm".into()));
        }
        let n = d.get_int("N", 0)?;
        let first = d.get_int("First", 0)?;
        let (Ok(n), Ok(first)) = (usize::try_from(n), usize::try_from(first)) else {
            return Err(FileError::Format(format!(
                "invalid N {n} or First {first} of object stream"
            )));
        };
        if first > data.len() {
            return Err(FileError::Format(format!(
                "object stream First {first} beyond data"
            )));
        }

        let header = &data[..first];
        let (_, pairs) = parse_header(n, header).map_err(|e| FileError::parse(0, header, e))?;
        let entries = pairs
            .into_iter()
            .map(|(num, offset)| (num, offset as usize))
            .collect();
        Ok(Self {
            data,
            first,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object number and object at `index`.
    pub fn get(&self, index: u32) -> FileResult<(u32, Object)> {
        let &(num, offset) = self.entries.get(index as usize).ok_or_else(|| {
            FileError::Format(format!(
                "index {index} out of object stream of {} objects",
                self.entries.len()
            ))
        })?;
        let start = self.first.saturating_add(offset);
        let input = self
            .data
            .get(start..)
            .ok_or_else(|| FileError::Format(format!("object {num} offset out of stream")))?;
        let (_, o) = parse_object(input).map_err(|e| FileError::parse(start, input, e))?;
        Ok((num, o))
    }
}

/// Builds object stream payload from serialized objects.
#[derive(Debug, Default)]
pub struct ObjectStreamBuilder {
    header: Vec<u8>,
    body: Vec<u8>,
    n: usize,
}

impl ObjectStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append serialized object `data` numbered `num`.
    pub fn push(&mut self, num: u32, data: &[u8]) {
        if self.n > 0 {
            self.header.push(b' ');
            self.body.push(b'\n');
        }
        self.header
            .extend_from_slice(format!("{num} {}", self.body.len()).as_bytes());
        self.body.extend_from_slice(data);
        self.n += 1;
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Stream to be FlateDecode encoded.
    pub fn finish(mut self) -> Stream {
        self.header.push(b'\n');
        let first = self.header.len();
        let mut data = self.header;
        data.extend_from_slice(&self.body);
        let d = Dictionary::new()
            .with("Type", Name::from("ObjStm"))
            .with("N", self.n)
            .with("First", first)
            .with("Filter", FILTER_FLATE_DECODE);
        Stream::new(d, data)
    }
}
