use nom::{
    branch::alt,
    bytes::complete::{tag, take_till},
    combinator::value,
    error::{ErrorKind, ParseError as NomParseError},
    multi::many0_count,
    sequence::{delimited, preceded, terminated},
    IResult, InputTakeAtPosition, Parser,
};

mod file;
mod object;

pub use file::*;
pub use object::*;

// Set `nom::error:VerboseError<&'a[u8]>` for detail error
#[cfg(not(debug_assertions))]
pub type ParseError<'a> = nom::error::Error<&'a [u8]>;
#[cfg(debug_assertions)]
pub type ParseError<'a> = nom::error::VerboseError<&'a [u8]>;
pub type ParseResult<'a, O, E = ParseError<'a>> = IResult<&'a [u8], O, E>;

/// Remaining input at the point parsing failed.
#[cfg(debug_assertions)]
pub(crate) fn error_input<'a>(e: &ParseError<'a>) -> Option<&'a [u8]> {
    e.errors.first().map(|(input, _)| *input)
}

/// Remaining input at the point parsing failed.
#[cfg(not(debug_assertions))]
pub(crate) fn error_input<'a>(e: &ParseError<'a>) -> Option<&'a [u8]> {
    Some(e.input)
}

/// Offset in `buf` where parser failed, `buf` is the input passed to the parser.
pub(crate) fn error_offset(buf: &[u8], e: &nom::Err<ParseError<'_>>) -> usize {
    match e {
        nom::Err::Error(e) | nom::Err::Failure(e) => error_input(e)
            .map_or(0, |remains| buf.len().saturating_sub(remains.len())),
        nom::Err::Incomplete(_) => buf.len(),
    }
}

pub(crate) fn fail<T>(input: &[u8]) -> ParseResult<'_, T> {
    Err(nom::Err::Error(ParseError::from_error_kind(
        input,
        ErrorKind::Fail,
    )))
}

fn comment(buf: &[u8]) -> ParseResult<'_, ()> {
    let (buf, _) = tag(b"%")(buf)?;
    let (rest, content) = take_till(|c| c == b'\n' || c == b'\r')(buf)?;
    if content.starts_with(b"PDF-") || content.starts_with(b"%EOF") {
        return fail(buf);
    }
    Ok((rest, ()))
}

fn whitespace1<T, E: NomParseError<T>>(input: T) -> IResult<T, T, E>
where
    T: InputTakeAtPosition<Item = u8>,
{
    // '\0' not treated as whitespace, after `stream` tag it may be part of
    // stream content.
    input.split_at_position1_complete(
        |c| !(c == b' ' || c == b'\t' || c == b'\r' || c == b'\n' || c == b'\x0C'),
        ErrorKind::MultiSpace,
    )
}

pub(crate) fn whitespace_or_comment(input: &[u8]) -> ParseResult<'_, ()> {
    value((), many0_count(alt((value((), whitespace1), comment))))(input)
}

pub(crate) fn ws_prefixed<'a, F, O>(inner: F) -> impl FnMut(&'a [u8]) -> ParseResult<'a, O>
where
    F: Parser<&'a [u8], O, ParseError<'a>>,
{
    preceded(whitespace_or_comment, inner)
}

/// A combinator that takes a parser `inner` and produces a parser that also consumes both leading and
/// trailing whitespace, returning the output of `inner`.
pub(crate) fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a [u8]) -> ParseResult<'a, O>
where
    F: Parser<&'a [u8], O, ParseError<'a>>,
{
    delimited(whitespace_or_comment, inner, whitespace_or_comment)
}

pub(crate) fn ws_terminated<'a, F, O>(inner: F) -> impl FnMut(&'a [u8]) -> ParseResult<'a, O>
where
    F: Parser<&'a [u8], O, ParseError<'a>>,
{
    terminated(inner, whitespace_or_comment)
}
