use super::{
    parse_dict, parse_indirect_object, whitespace_or_comment, ws_prefixed, ws_terminated,
    ParseResult,
};
use crate::{
    cursor::ByteCursor,
    file::{FileError, FileResult},
    filter::FilterRegistry,
    object::{Dictionary, Entry, Frame, FrameSet, Object, Section, MAX_OBJECT_NUMBER},
};
use ahash::{HashSet, HashSetExt};
use log::{info, warn};
use memchr::memmem::{find, rfind};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, satisfy, space1, u16, u32},
    combinator::{map, recognize},
    error::context,
    multi::{fold_many1, many0},
    sequence::{preceded, separated_pair, tuple},
};
use std::str::from_utf8;

/// Header must appear in the first bytes of the file.
const HEADER_SEARCH_LEN: usize = 1024;
/// `%%EOF` must appear in the last bytes of the file.
const FOOTER_SEARCH_LEN: usize = 1024;
/// Max distance from `startxref` to `%%EOF`.
const STARTXREF_SEARCH_LEN: usize = 30;

/// Parse `%PDF-M.m`, return version string.
pub fn parse_header(buf: &[u8]) -> ParseResult<'_, &str> {
    let one_digit = || satisfy(|c| c.is_ascii_digit());
    ws_terminated(preceded(
        tag("%PDF-"),
        map(
            recognize(tuple((one_digit(), char('.'), one_digit()))),
            // digits and dot are valid utf8
            |s| from_utf8(s).unwrap_or_default(),
        ),
    ))(buf)
}

/// Locate header in leading bytes, return its offset and version.
pub fn find_header(buf: &[u8]) -> FileResult<(usize, String)> {
    let head = &buf[..buf.len().min(HEADER_SEARCH_LEN)];
    let pos = find(head, b"%PDF-").ok_or_else(|| FileError::Format("header not found".into()))?;
    let (_, ver) = parse_header(&buf[pos..]).map_err(|e| FileError::parse(pos, &buf[pos..], e))?;
    if pos > 0 {
        warn!("{pos} bytes of junk before header");
    }
    Ok((pos, ver.to_owned()))
}

fn parse_startxref(buf: &[u8]) -> ParseResult<'_, u32> {
    preceded(ws_terminated(tag(b"startxref")), ws_terminated(u32))(buf)
}

/// Offset of the newest xref section, read from file footer.
pub fn find_startxref(buf: &[u8]) -> FileResult<u32> {
    let tail_start = buf.len().saturating_sub(FOOTER_SEARCH_LEN);
    let eof = rfind(&buf[tail_start..], b"%%EOF")
        .map(|p| p + tail_start)
        .ok_or_else(|| FileError::Format("%%EOF not found".into()))?;
    let window_start = eof.saturating_sub(STARTXREF_SEARCH_LEN);
    let pos = rfind(&buf[window_start..eof], b"startxref")
        .map(|p| p + window_start)
        .ok_or_else(|| FileError::Format("startxref not found".into()))?;
    let (_, offset) = parse_startxref(&buf[pos..]).map_err(|e| FileError::parse(pos, &buf[pos..], e))?;
    Ok(offset)
}

fn parse_trailer(buf: &[u8]) -> ParseResult<'_, Dictionary> {
    preceded(ws_terminated(tag(b"trailer")), ws_terminated(parse_dict))(buf)
}

/// Parse xref table sections, assumes buf start from `xref`.
pub fn parse_xref_table(buf: &[u8]) -> ParseResult<'_, Vec<Section>> {
    let record_count_parser = context(
        "record count",
        ws_terminated(separated_pair(u32, space1, u32)),
    );
    let record_parser = context(
        "record",
        map(
            ws_terminated(tuple((
                u32,
                space1,
                u16,
                space1,
                alt((tag(b"n"), tag(b"f"))),
            ))),
            |(offset, _, generation, _, ty): (u32, _, u16, _, &[u8])| {
                if ty == b"n" {
                    Entry::InUse { offset, generation }
                } else {
                    Entry::Free {
                        next: offset,
                        generation,
                    }
                }
            },
        ),
    );
    let group = tuple((record_count_parser, many0(record_parser)));
    let parser = fold_many1(group, Vec::new, |mut sections, ((start, count), entries)| {
        if count as usize != entries.len() {
            warn!(
                "xref section {start} declares {count} entries, found {}",
                entries.len()
            );
        }
        sections.push(Section::new(start, entries));
        sections
    });

    preceded(context("xref", ws_terminated(tag(b"xref"))), parser)(buf)
}

fn int_field(d: &Dictionary, key: &str) -> FileResult<Option<u32>> {
    d.get_value(key)
        .map(|o| {
            o.int()
                .ok()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| FileError::Format(format!("invalid xref stream {key}")))
        })
        .transpose()
}

/// Error if any section numbers objects above `MAX_OBJECT_NUMBER`.
fn check_sections(sections: &[Section]) -> FileResult<()> {
    for s in sections {
        let end = u32::try_from(s.entries.len())
            .ok()
            .and_then(|n| s.start.checked_add(n));
        if !end.is_some_and(|end| end <= MAX_OBJECT_NUMBER + 1) {
            return Err(FileError::Format(format!(
                "xref section {} of {} entries out of range",
                s.start,
                s.entries.len()
            )));
        }
    }
    Ok(())
}

/// Read xref stream at `pos`.
fn parse_xref_stream(buf: &[u8], pos: usize, registry: &FilterRegistry) -> FileResult<Frame> {
    let input = &buf[pos..];
    let (_, (id, o)) =
        parse_indirect_object(input, &|_| None).map_err(|e| FileError::parse(pos, input, e))?;
    let Object::Stream(stream) = o else {
        return Err(FileError::Format(format!("xref at {pos} is not a stream")));
    };
    let d = stream.dict();
    if !d.is_type("XRef") {
        warn!("xref stream {id} has no /Type /XRef");
    }

    let widths: Vec<usize> = d
        .get_value("W")
        .and_then(|o| o.opt_arr())
        .map(|arr| {
            arr.iter()
                .filter_map(Object::opt_int)
                .filter(|w| (0..=4).contains(w))
                .map(|w| w as usize)
                .collect()
        })
        .unwrap_or_default();
    let [w1, w2, w3] = widths[..] else {
        return Err(FileError::Format(format!("invalid W of xref stream {id}")));
    };
    let entry_len = w1 + w2 + w3;
    if entry_len == 0 {
        return Err(FileError::Format(format!("zero W of xref stream {id}")));
    }
    let size = int_field(d, "Size")?.ok_or_else(|| FileError::Format("xref stream missing Size".into()))?;
    let index: Vec<(u32, u32)> = match d.get_value("Index") {
        Some(Object::Array(arr)) => arr
            .chunks_exact(2)
            .map(|pair| {
                let field = |o: &Object| o.opt_int().and_then(|v| u32::try_from(v).ok());
                match (field(&pair[0]), field(&pair[1])) {
                    (Some(start), Some(count)) => Ok((start, count)),
                    _ => Err(FileError::Format(format!("invalid Index of xref stream {id}"))),
                }
            })
            .collect::<FileResult<_>>()?,
        _ => vec![(0, size)],
    };

    let data = stream.decoded(registry)?;
    let mut cursor = ByteCursor::new(data);
    let mut sections = Vec::with_capacity(index.len());
    'sections: for (start, count) in index {
        let capacity = (count as usize).min(cursor.remaining().len() / entry_len);
        let mut entries = Vec::with_capacity(capacity);
        for idx in 0..count {
            if cursor.remaining().len() < entry_len {
                warn!("xref stream {id} truncated at entry {}", start.saturating_add(idx));
                sections.push(Section::new(start, entries));
                break 'sections;
            }
            let ty = if w1 == 0 { 1 } else { cursor.read_uint(w1)? };
            let f2 = cursor.read_uint(w2)?;
            let f3 = cursor.read_uint(w3)?;
            entries.push(match ty {
                0 => Entry::Free {
                    next: f2,
                    generation: f3 as u16,
                },
                1 => Entry::InUse {
                    offset: f2,
                    generation: f3 as u16,
                },
                2 => Entry::Compressed {
                    container: f2,
                    index: f3,
                },
                _ => {
                    warn!(
                        "unknown xref stream entry type {ty} of object {}",
                        start.saturating_add(idx)
                    );
                    Entry::Free {
                        next: 0,
                        generation: 0,
                    }
                }
            });
        }
        sections.push(Section::new(start, entries));
    }
    check_sections(&sections)?;

    let mut frame = Frame::new(pos as u32, stream.into_dict(), sections);
    frame.is_stream = true;
    Ok(frame)
}

/// Parse xref section at `pos`, either table or stream form.
pub fn parse_frame(buf: &[u8], pos: u32, registry: &FilterRegistry) -> FileResult<Frame> {
    let p = pos as usize;
    let Some(input) = buf.get(p..) else {
        return Err(FileError::Format(format!("xref offset {pos} out of file")));
    };
    let (input, ()) = whitespace_or_comment(input).map_err(|e| FileError::parse(p, input, e))?;
    if !input.starts_with(b"xref") {
        return parse_xref_stream(buf, buf.len() - input.len(), registry);
    }

    let (_, (sections, trailer)) = tuple((parse_xref_table, ws_prefixed(parse_trailer)))(input)
        .map_err(|e| FileError::parse(buf.len() - input.len(), input, e))?;
    check_sections(&sections)?;
    Ok(Frame::new(pos, trailer, sections))
}

/// Table of the chain root starts from 1 but holds the entry of object 0,
/// a common writer bug, renumber it to start from 0.
fn rebase_root_table(frame: &mut Frame) {
    if frame.is_stream || frame.prev().is_some() {
        return;
    }
    if let Some(first) = frame.sections.first_mut() {
        if first.start > 0 && first.entries.first().is_some_and(Entry::is_free) {
            warn!("xref table starts at {}, renumber from 0", first.start);
            first.start = 0;
        }
    }
}

/// Parse all revisions by following `Prev` from the newest xref.
pub fn parse_frame_set(buf: &[u8], registry: &FilterRegistry) -> FileResult<FrameSet> {
    let mut frames = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(find_startxref(buf)?);
    while let Some(pos) = next {
        if !visited.insert(pos) {
            warn!("loop in xref Prev chain at {pos}");
            break;
        }
        info!("frame pos: {pos}");
        let frame = parse_frame(buf, pos, registry)?;
        next = frame.prev();
        let xref_stm = if frame.is_stream { None } else { frame.xref_stm() };
        frames.push(frame);

        if let Some(stm_pos) = xref_stm.filter(|p| visited.insert(*p)) {
            info!("hybrid xref stream pos: {stm_pos}");
            match parse_frame(buf, stm_pos, registry) {
                Ok(f) => frames.push(f),
                Err(e) => warn!("ignore bad XRefStm at {stm_pos}: {e}"),
            }
        }
    }

    // hybrid stream of the root table is pushed after it
    if let Some(root) = frames.iter_mut().rev().find(|f| !f.is_stream) {
        rebase_root_table(root);
    }
    Ok(FrameSet::new(frames))
}
