//! object mod contains data structure map to low level pdf objects
use ahash::{HashMap, HashMapExt};
use educe::Educe;
use std::{
    borrow::{Borrow, Cow},
    fmt::{Debug, Display},
    iter::Peekable,
};

mod numeric;
pub use numeric::Numeric;
mod stream;
pub use stream::*;
mod xref;
pub use xref::*;
mod frame;
pub use frame::*;

pub type Array = Vec<Object>;

/// Object number and generation number, identifies a revisable object slot.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, PartialOrd, Ord)]
pub struct ObjectId {
    number: u32,
    generation: u16,
}

impl ObjectId {
    pub const fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.number, self.generation)
    }
}

impl From<u32> for ObjectId {
    fn from(number: u32) -> Self {
        Self::new(number, 0)
    }
}

/// Pdf name, raw bytes after `#xx` escapes expanded, without leading `/`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Cow<'static, [u8]>);

impl Name {
    pub const fn from_static(s: &'static str) -> Self {
        Self(Cow::Borrowed(s.as_bytes()))
    }

    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Cow::Owned(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Text projection of the name, invalid utf-8 replaced.
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl Borrow<[u8]> for Name {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.as_str())
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

pub(crate) const KEY_TYPE: Name = Name::from_static("Type");
pub(crate) const KEY_LENGTH: Name = Name::from_static("Length");
pub(crate) const KEY_FILTER: Name = Name::from_static("Filter");
pub(crate) const KEY_DECODE_PARMS: Name = Name::from_static("DecodeParms");

/// Pdf string object, raw bytes. Decode to text is done by `to_text()`.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct PdfString(Vec<u8>);

impl PdfString {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode literal string form, `s` includes enclosing `(` and `)`.
    pub fn from_literal(s: &[u8]) -> Self {
        fn skip_cur_new_line<I: Iterator<Item = u8>>(cur: u8, s: &mut Peekable<I>) -> bool {
            if cur == b'\r' {
                s.next_if_eq(&b'\n');
                true
            } else {
                cur == b'\n'
            }
        }

        fn skip_next_line<I: Iterator<Item = u8>>(s: &mut Peekable<I>) -> bool {
            if s.next_if_eq(&b'\r').is_some() {
                s.next_if_eq(&b'\n');
                true
            } else {
                s.next_if_eq(&b'\n').is_some()
            }
        }

        fn next_oct_byte<I: Iterator<Item = u8>>(s: &mut Peekable<I>) -> Option<u8> {
            let mut result = 0u8;
            let mut hit = false;
            for _ in 0..3 {
                if let Some(c) = s.next_if(|v| matches!(v, b'0'..=b'7')) {
                    hit = true;
                    result = result.wrapping_mul(8).wrapping_add(c - b'0');
                }
            }
            hit.then_some(result)
        }

        debug_assert!(s.len() >= 2 && s[0] == b'(' && s[s.len() - 1] == b')');
        let s = &s[1..s.len() - 1];
        let mut result: Vec<u8> = Vec::with_capacity(s.len());
        let mut iter = s.iter().copied().peekable();

        while let Some(next) = iter.next() {
            match next {
                b'\\' => {
                    if skip_next_line(&mut iter) {
                        continue;
                    }
                    if let Some(b) = next_oct_byte(&mut iter) {
                        result.push(b);
                        continue;
                    }

                    if let Some(b) = iter.next() {
                        match b {
                            b'r' => result.push(b'\r'),
                            b'n' => result.push(b'\n'),
                            b't' => result.push(b'\t'),
                            b'f' => result.push(b'\x0c'),
                            b'b' => result.push(b'\x08'),
                            _ => result.push(b),
                        }
                    }
                }
                _ => {
                    if skip_cur_new_line(next, &mut iter) {
                        result.push(b'\n');
                    } else {
                        result.push(next);
                    }
                }
            }
        }

        Self(result)
    }

    /// Decode hex string form, `s` includes enclosing `<` and `>`.
    /// Whitespace ignored, odd digit count padded with `0`.
    pub fn from_hex(s: &[u8]) -> Result<Self, ObjectValueError> {
        debug_assert!(s.starts_with(b"<") && s.ends_with(b">"));
        let mut digits: Vec<u8> = s[1..s.len() - 1]
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if digits.len() % 2 == 1 {
            digits.push(b'0');
        }
        hex::decode(digits)
            .map(Self)
            .map_err(|_| ObjectValueError::InvalidHexString)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decode as text string: UTF-16BE if starts with BOM, otherwise each
    /// byte maps to the char of same code.
    pub fn to_text(&self) -> String {
        match self.0.strip_prefix(&[0xfe, 0xff]) {
            Some(utf16) => {
                let units = utf16
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]));
                char::decode_utf16(units)
                    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect()
            }
            None => self.0.iter().map(|b| char::from(*b)).collect(),
        }
    }
}

impl Debug for PdfString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "({s})"),
            Err(_) => write!(f, "<{}>", hex::encode_upper(&self.0)),
        }
    }
}

impl From<&str> for PdfString {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

#[derive(PartialEq, Debug, Clone, Default, Educe)]
#[educe(Deref, DerefMut)]
pub struct Dictionary(HashMap<Name, Object>);

impl FromIterator<(Name, Object)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (Name, Object)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn set(&mut self, key: impl Into<Name>, value: impl Into<Object>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder style `set()`.
    pub fn with(mut self, key: impl Into<Name>, value: impl Into<Object>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get_value(&self, key: &str) -> Option<&Object> {
        self.0.get(key.as_bytes())
    }

    pub fn get_value_mut(&mut self, key: &str) -> Option<&mut Object> {
        self.0.get_mut(key.as_bytes())
    }

    pub fn remove_value(&mut self, key: &str) -> Option<Object> {
        self.0.remove(key.as_bytes())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key.as_bytes())
    }

    /// Return `default` if key not exist, error if value not integer.
    pub fn get_int(&self, key: &str, default: i64) -> Result<i64, ObjectValueError> {
        self.get_value(key).map_or(Ok(default), |o| o.int())
    }

    pub fn get_opt_int(&self, key: &str) -> Result<Option<i64>, ObjectValueError> {
        self.get_value(key).map(|o| o.int()).transpose()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ObjectValueError> {
        self.get_value(key).map_or(Ok(default), |o| o.bool())
    }

    pub fn get_name(&self, key: &str) -> Result<Option<&Name>, ObjectValueError> {
        self.get_value(key).map(|o| o.name()).transpose()
    }

    /// Return true if `/Type` of the dictionary is `ty`.
    pub fn is_type(&self, ty: &str) -> bool {
        matches!(self.0.get(&KEY_TYPE), Some(Object::Name(n)) if n == ty)
    }
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum ObjectValueError {
    #[error("unexpected type")]
    UnexpectedType,
    #[error("invalid hex string")]
    InvalidHexString,
    #[error("invalid name format")]
    InvalidNameFormat,
    #[error("invalid number")]
    InvalidNumber,
    #[error("Dict key not found")]
    DictKeyNotFound,
    #[error("Stream length not defined")]
    StreamLengthNotDefined,
    #[error("External stream not supported")]
    ExternalStreamNotSupported,
    #[error("Unknown filter {0}")]
    UnknownFilter(Name),
    #[error("Filter decode error: {0}")]
    FilterDecodeError(String),
    #[error("Filter encode error: {0}")]
    FilterEncodeError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[derive(Clone, PartialEq, Debug)]
pub enum Object {
    Null,
    Bool(bool),
    Number(Numeric),
    Name(Name),
    String(PdfString),
    Array(Array),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

macro_rules! copy_value_access {
    ($method:ident, $opt_method:ident, $branch:ident, $t:ty) => {
        impl Object {
            /// Return None if value not specific type.
            pub fn $opt_method(&self) -> Option<$t> {
                match self {
                    Self::$branch(v) => Some(*v),
                    _ => None,
                }
            }

            /// Return `ObjectValueError::UnexpectedType` if value not expected type.
            pub fn $method(&self) -> Result<$t, ObjectValueError> {
                match self {
                    Self::$branch(v) => Ok(*v),
                    _ => Err(ObjectValueError::UnexpectedType),
                }
            }
        }
    };
}

macro_rules! ref_value_access {
    ($method:ident, $opt_method:ident, $branch:ident, $t:ty) => {
        impl Object {
            /// Return None if value not specific type.
            pub fn $opt_method(&self) -> Option<&$t> {
                match self {
                    Self::$branch(v) => Some(v),
                    _ => None,
                }
            }

            /// Return `ObjectValueError::UnexpectedType` if value not expected type.
            pub fn $method(&self) -> Result<&$t, ObjectValueError> {
                match self {
                    Self::$branch(v) => Ok(v),
                    _ => Err(ObjectValueError::UnexpectedType),
                }
            }
        }
    };
}

copy_value_access!(bool, opt_bool, Bool, bool);
copy_value_access!(reference, opt_reference, Reference, ObjectId);
ref_value_access!(number, opt_number, Number, Numeric);
ref_value_access!(name, opt_name, Name, Name);
ref_value_access!(string, opt_string, String, PdfString);
ref_value_access!(arr, opt_arr, Array, Array);
ref_value_access!(stream, opt_stream, Stream, Stream);

impl Object {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer value of an integral number.
    pub fn int(&self) -> Result<i64, ObjectValueError> {
        match self {
            Self::Number(n) => n.as_i64().ok_or(ObjectValueError::UnexpectedType),
            _ => Err(ObjectValueError::UnexpectedType),
        }
    }

    pub fn opt_int(&self) -> Option<i64> {
        self.int().ok()
    }

    /// Dictionary, or dictionary part of a stream.
    pub fn dict(&self) -> Result<&Dictionary, ObjectValueError> {
        match self {
            Self::Dictionary(d) => Ok(d),
            Self::Stream(s) => Ok(s.dict()),
            _ => Err(ObjectValueError::UnexpectedType),
        }
    }

    pub fn opt_dict(&self) -> Option<&Dictionary> {
        self.dict().ok()
    }

    pub fn dict_mut(&mut self) -> Result<&mut Dictionary, ObjectValueError> {
        match self {
            Self::Dictionary(d) => Ok(d),
            Self::Stream(s) => Ok(s.dict_mut()),
            _ => Err(ObjectValueError::UnexpectedType),
        }
    }

    pub fn arr_mut(&mut self) -> Result<&mut Array, ObjectValueError> {
        match self {
            Self::Array(a) => Ok(a),
            _ => Err(ObjectValueError::UnexpectedType),
        }
    }

    pub fn into_dict(self) -> Result<Dictionary, ObjectValueError> {
        match self {
            Self::Dictionary(d) => Ok(d),
            _ => Err(ObjectValueError::UnexpectedType),
        }
    }

    /// References directly contained in this object, recursively through
    /// arrays, dictionaries and stream dictionaries.
    pub fn iter_references(&self) -> Box<dyn Iterator<Item = ObjectId> + '_> {
        match self {
            Self::Reference(id) => Box::new(std::iter::once(*id)),
            Self::Array(a) => Box::new(a.iter().flat_map(|o| o.iter_references())),
            Self::Dictionary(d) => Box::new(d.values().flat_map(|o| o.iter_references())),
            Self::Stream(s) => Box::new(s.dict().values().flat_map(|o| o.iter_references())),
            _ => Box::new(std::iter::empty()),
        }
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Numeric> for Object {
    fn from(value: Numeric) -> Self {
        Self::Number(value)
    }
}

macro_rules! int_into_object {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Object {
                fn from(v: $t) -> Self {
                    Self::Number(v.into())
                }
            }
        )*
    };
}

int_into_object!(i32, i64, u32, u64, usize);

impl From<Name> for Object {
    fn from(value: Name) -> Self {
        Self::Name(value)
    }
}

impl From<PdfString> for Object {
    fn from(value: PdfString) -> Self {
        Self::String(value)
    }
}

impl From<Array> for Object {
    fn from(value: Array) -> Self {
        Self::Array(value)
    }
}

impl From<Dictionary> for Object {
    fn from(value: Dictionary) -> Self {
        Self::Dictionary(value)
    }
}

impl From<Stream> for Object {
    fn from(value: Stream) -> Self {
        Self::Stream(value)
    }
}

impl From<ObjectId> for Object {
    fn from(value: ObjectId) -> Self {
        Self::Reference(value)
    }
}

/// Convert &str to Object based on first char,
/// if start with '(' or '<', convert to String
/// if start with '/' convert to Name, panic otherwise
#[cfg(test)]
impl<'a> From<&'a str> for Object {
    fn from(value: &'a str) -> Self {
        let b = value.as_bytes();
        match b[0] {
            b'(' => Self::String(PdfString::from_literal(b)),
            b'<' => Self::String(PdfString::from_hex(b).unwrap()),
            b'/' => Self::Name(Name::new(&b[1..])),
            _ => panic!("invalid object"),
        }
    }
}
