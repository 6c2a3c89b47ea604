use crate::object::{
    Array, Dictionary, Name, Numeric, Object, ObjectId, ObjectValueError, PdfString, Stream,
};
use log::warn;
use memchr::memmem;
use nom::{
    branch::alt,
    bytes::complete::{escaped, is_not, tag, take_till, take_while},
    character::{
        complete::{anychar, char, digit0, digit1, multispace1, one_of, u16, u32},
        is_hex_digit,
    },
    combinator::{map, map_res, not, opt, peek, recognize, value},
    error::{ErrorKind, FromExternalError},
    multi::{many0, many0_count},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
};

use super::{fail, whitespace_or_comment, ws, ws_prefixed, ws_terminated, ParseError, ParseResult};

/// Resolve indirect `Length` of a stream.
pub type LengthResolver<'r> = dyn Fn(ObjectId) -> Option<u32> + 'r;

fn external_error<'a>(input: &'a [u8], e: ObjectValueError) -> nom::Err<ParseError<'a>> {
    nom::Err::Error(ParseError::from_external_error(input, ErrorKind::Fail, e))
}

fn parse_number(input: &[u8]) -> ParseResult<'_, Numeric> {
    map_res(
        recognize(pair(
            opt(one_of("+-")),
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
        )),
        Numeric::parse,
    )(input)
}

fn parse_literal_string(input: &[u8]) -> ParseResult<'_, PdfString> {
    fn quoted(input: &[u8]) -> ParseResult<'_, &[u8]> {
        let esc = escaped(is_not("\\()"), '\\', anychar);
        let inner_parser = alt((esc, quoted));
        recognize(delimited(tag(b"("), many0_count(inner_parser), tag(b")")))(input)
    }
    map(quoted, PdfString::from_literal)(input)
}

fn parse_hex_string(input: &[u8]) -> ParseResult<'_, PdfString> {
    let (remains, buf) = recognize(delimited(
        tag(b"<"),
        take_while(|c| is_hex_digit(c) || c.is_ascii_whitespace()),
        tag(b">"),
    ))(input)?;
    let s = PdfString::from_hex(buf).map_err(|e| external_error(input, e))?;
    Ok((remains, s))
}

pub fn parse_object(buf: &[u8]) -> ParseResult<'_, Object> {
    alt((
        map(parse_name, Object::Name),
        map(parse_literal_string, Object::String),
        map(parse_dict, Object::Dictionary),
        map(parse_array, Object::Array),
        map(parse_hex_string, Object::String),
        value(Object::Null, tag(b"null")),
        value(Object::Bool(true), tag(b"true")),
        value(Object::Bool(false), tag(b"false")),
        map(parse_reference, Object::Reference),
        map(parse_number, Object::Number),
    ))(buf)
}

/// Return `Err(ObjectValueError::InvalidNameFormat)` if not two hex char after `#`.
fn normalize_name(s: &[u8]) -> Result<Vec<u8>, ObjectValueError> {
    fn hex_digit(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            b'A'..=b'F' => Some(c - b'A' + 10),
            _ => None,
        }
    }

    let mut result = Vec::with_capacity(s.len());
    let mut iter = s.iter().copied();
    while let Some(next) = iter.next() {
        if next == b'#' {
            let hi = iter.next().and_then(hex_digit);
            let lo = iter.next().and_then(hex_digit);
            match (hi, lo) {
                (Some(hi), Some(lo)) => result.push(hi << 4 | lo),
                _ => return Err(ObjectValueError::InvalidNameFormat),
            }
        } else {
            result.push(next);
        }
    }
    Ok(result)
}

fn is_delimiter(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

pub fn parse_name(input: &[u8]) -> ParseResult<'_, Name> {
    let (remains, buf) = preceded(
        tag(b"/"),
        take_till(|c: u8| c.is_ascii_whitespace() || c == 0 || is_delimiter(c)),
    )(input)?;
    let name = normalize_name(buf).map_err(|e| external_error(input, e))?;
    Ok((remains, Name::new(name)))
}

pub fn parse_array(input: &[u8]) -> ParseResult<'_, Array> {
    delimited(
        ws(tag(b"[")),
        many0(ws_terminated(parse_object)),
        tag(b"]"),
    )(input)
}

pub fn parse_dict(input: &[u8]) -> ParseResult<'_, Dictionary> {
    map(
        delimited(
            ws(tag(b"<<".as_slice())),
            many0(tuple((parse_name, ws(parse_object)))),
            tag(b">>"),
        ),
        |v| v.into_iter().collect(),
    )(input)
}

fn parse_reference(input: &[u8]) -> ParseResult<'_, ObjectId> {
    let (input, (id, gen)) = terminated(
        separated_pair(u32, multispace1, u16),
        // `not(peek(tag("G")))` to not take `RG` graphics operation,
        // such as `0 1 0 RG`, as `0` followed by reference `1 0 R`
        delimited(whitespace_or_comment, tag(b"R"), not(peek(tag("G")))),
    )(input)?;
    Ok((input, ObjectId::new(id, gen)))
}

fn stream_start(input: &[u8]) -> ParseResult<'_, ()> {
    value(
        (),
        delimited(
            whitespace_or_comment,
            tag(b"stream"),
            alt((tag(b"\r\n"), tag(b"\n"), tag(b"\r"))),
        ),
    )(input)
}

fn stream_end(input: &[u8]) -> ParseResult<'_, ()> {
    value(
        (),
        preceded(
            take_while(|c: u8| c.is_ascii_whitespace()),
            tag(b"endstream"),
        ),
    )(input)
}

/// Stream data if `Length` fits, otherwise scan for `endstream`.
fn stream_data<'a>(input: &'a [u8], length: Option<u32>) -> ParseResult<'a, &'a [u8]> {
    if let Some(l) = length.map(|l| l as usize) {
        if l <= input.len() {
            if let Ok((remains, ())) = stream_end(&input[l..]) {
                return Ok((remains, &input[..l]));
            }
        }
        warn!("stream length {l} mismatch, scan for endstream");
    }

    let Some(pos) = memmem::find(input, b"endstream") else {
        return fail(input);
    };
    let mut data = &input[..pos];
    if let Some(d) = data.strip_suffix(b"\n") {
        data = d;
    }
    if let Some(d) = data.strip_suffix(b"\r") {
        data = d;
    }
    Ok((&input[pos + b"endstream".len()..], data))
}

/// Parse object, dictionary followed by stream body becomes a `Stream`.
/// Indirect `Length` resolved by `resolve_length`.
pub fn parse_object_and_stream<'a>(
    input: &'a [u8],
    resolve_length: &LengthResolver<'_>,
) -> ParseResult<'a, Object> {
    let (input, o) = parse_object(input)?;
    let Object::Dictionary(d) = o else {
        return Ok((input, o));
    };
    let Ok((input, ())) = stream_start(input) else {
        return Ok((input, Object::Dictionary(d)));
    };

    let length = match d.get_value("Length") {
        Some(Object::Reference(id)) => resolve_length(*id),
        Some(o) => o.int().ok().and_then(|l| u32::try_from(l).ok()),
        None => None,
    };
    let (input, data) = stream_data(input, length)?;
    Ok((input, Object::Stream(Stream::from_encoded(d, data.to_vec()))))
}

/// Parse `N G obj ... endobj`, `endobj` is optional.
pub fn parse_indirect_object<'a>(
    input: &'a [u8],
    resolve_length: &LengthResolver<'_>,
) -> ParseResult<'a, (ObjectId, Object)> {
    let (input, id) = parse_object_header(input)?;
    let (input, obj) = parse_object_and_stream(input, resolve_length)?;
    let (input, _) = opt(ws_prefixed(tag("endobj")))(input)?;
    Ok((input, (id, obj)))
}

/// Parse `N G obj`, and whitespace after it.
pub fn parse_object_header(input: &[u8]) -> ParseResult<'_, ObjectId> {
    map(
        terminated(
            separated_pair(u32, multispace1, u16),
            ws(tag(b"obj")),
        ),
        |(id, gen)| ObjectId::new(id, gen),
    )(input)
}
