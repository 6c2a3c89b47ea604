//! Stream codecs, looked up by filter name.
//!
//! Codecs are external collaborators of the object store: `Stream` only knows
//! filter names and parameters, and asks a `FilterRegistry` to run them.
use crate::object::{Dictionary, Name, ObjectValueError};
use ahash::{HashMap, HashMapExt};
use anyhow::{anyhow, bail, Result as AnyResult};
use log::error;
use std::{fmt::Debug, iter::once, rc::Rc};

mod ascii85;
mod run_length;

pub const FILTER_FLATE_DECODE: Name = Name::from_static("FlateDecode");
pub const FILTER_LZW_DECODE: Name = Name::from_static("LZWDecode");
pub const FILTER_ASCII_HEX_DECODE: Name = Name::from_static("ASCIIHexDecode");
pub const FILTER_ASCII85_DECODE: Name = Name::from_static("ASCII85Decode");
pub const FILTER_RUN_LENGTH_DECODE: Name = Name::from_static("RunLengthDecode");

/// Codec of one filter. `params` is the filter's `DecodeParms` entry.
pub trait Codec {
    fn decode(&self, data: &[u8], params: Option<&Dictionary>) -> AnyResult<Vec<u8>>;

    fn encode(&self, data: &[u8], params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        let _ = (data, params);
        bail!("encode not supported")
    }
}

/// Filter name to codec map.
#[derive(Clone)]
pub struct FilterRegistry {
    codecs: HashMap<Name, Rc<dyn Codec>>,
}

impl Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.codecs.keys().collect();
        names.sort();
        f.debug_tuple("FilterRegistry").field(&names).finish()
    }
}

impl Default for FilterRegistry {
    /// Registry with built-in codecs, registered under full and abbreviated names.
    fn default() -> Self {
        let mut r = Self::empty();
        r.register_all(&[FILTER_FLATE_DECODE, "Fl".into()], FlateCodec);
        r.register_all(&[FILTER_LZW_DECODE, "LZW".into()], LzwCodec);
        r.register_all(&[FILTER_ASCII_HEX_DECODE, "AHx".into()], AsciiHexCodec);
        r.register_all(&[FILTER_ASCII85_DECODE, "A85".into()], Ascii85Codec);
        r.register_all(&[FILTER_RUN_LENGTH_DECODE, "RL".into()], RunLengthCodec);
        r
    }
}

impl FilterRegistry {
    /// Registry without any codec.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register codec, replace existing one of the same name.
    pub fn register(&mut self, name: impl Into<Name>, codec: impl Codec + 'static) {
        self.codecs.insert(name.into(), Rc::new(codec));
    }

    fn register_all(&mut self, names: &[Name], codec: impl Codec + 'static) {
        let codec: Rc<dyn Codec> = Rc::new(codec);
        for name in names {
            self.codecs.insert(name.clone(), codec.clone());
        }
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.codecs.contains_key(name)
    }

    fn codec(&self, name: &Name) -> Result<&Rc<dyn Codec>, ObjectValueError> {
        self.codecs.get(name).ok_or_else(|| {
            error!("Unknown filter: {}", name);
            ObjectValueError::UnknownFilter(name.clone())
        })
    }

    pub fn decode(
        &self,
        name: &Name,
        data: &[u8],
        params: Option<&Dictionary>,
    ) -> Result<Vec<u8>, ObjectValueError> {
        self.codec(name)?.decode(data, params).map_err(|e| {
            error!("Failed to decode stream using {}: {}", name, &e);
            ObjectValueError::FilterDecodeError(format!("{name}: {e}"))
        })
    }

    pub fn encode(
        &self,
        name: &Name,
        data: &[u8],
        params: Option<&Dictionary>,
    ) -> Result<Vec<u8>, ObjectValueError> {
        self.codec(name)?.encode(data, params).map_err(|e| {
            error!("Failed to encode stream using {}: {}", name, &e);
            ObjectValueError::FilterEncodeError(format!("{name}: {e}"))
        })
    }
}

/// Parameters shared by LZWDecode and FlateDecode.
#[derive(Debug, Clone, PartialEq)]
struct LZWFlateParams {
    predictor: i64,
    colors: i64,
    bits_per_component: i64,
    columns: i64,
    early_change: i64,
}

impl LZWFlateParams {
    fn new(d: Option<&Dictionary>) -> AnyResult<Self> {
        let get = |key: &str, default: i64| -> AnyResult<i64> {
            d.map_or(Ok(default), |d| d.get_int(key, default))
                .map_err(|e| anyhow!("{key}: {e}"))
        };
        Ok(Self {
            predictor: get("Predictor", 1)?,
            colors: get("Colors", 1)?,
            bits_per_component: get("BitsPerComponent", 8)?,
            columns: get("Columns", 1)?,
            early_change: get("EarlyChange", 1)?,
        })
    }

    /// Bytes per row, excluding png predictor tag byte.
    fn row_bytes(&self) -> AnyResult<usize> {
        self.bits(self.columns).map(|bits| bits.div_ceil(8).max(1))
    }

    /// Bytes per complete pixel, at least 1.
    fn pixel_bytes(&self) -> AnyResult<usize> {
        self.bits(1).map(|bits| bits.div_ceil(8).max(1))
    }

    /// Bits of `pixels` pixels, error on negative or overflowed params.
    fn bits(&self, pixels: i64) -> AnyResult<usize> {
        [self.colors, self.bits_per_component, pixels]
            .into_iter()
            .try_fold(1usize, |acc, v| {
                usize::try_from(v).ok().and_then(|v| acc.checked_mul(v))
            })
            .ok_or_else(|| {
                anyhow!(
                    "invalid predictor params, Colors {} BitsPerComponent {} Columns {}",
                    self.colors,
                    self.bits_per_component,
                    self.columns
                )
            })
    }

    fn decode_predictor(&self, buf: Vec<u8>) -> AnyResult<Vec<u8>> {
        match self.predictor {
            1 => Ok(buf),
            2 => tiff_predictor(buf, self),
            10..=15 => png_predictor(&buf, self.row_bytes()?, self.pixel_bytes()?),
            p => bail!("Unknown predictor: {p}"),
        }
    }
}

/// Paeth, returns a, b, or c, whichever is closet to a + b - c
fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let aa = i16::from(a);
    let bb = i16::from(b);
    let cc = i16::from(c);

    let p = aa + bb - cc;

    let da = (p - aa).abs();
    let db = (p - bb).abs();
    let dc = (p - cc).abs();

    if da <= db && da <= dc {
        a
    } else if db <= dc {
        b
    } else {
        c
    }
}

/// Restore data processed by png predictor, each row prefixed by a tag byte.
fn png_predictor(buf: &[u8], columns: usize, bpp: usize) -> AnyResult<Vec<u8>> {
    if buf.len() <= columns {
        return Ok(vec![]);
    }
    let first_row = vec![0u8; columns];
    let mut r = vec![0u8; buf.len() / (columns + 1) * columns];
    let mut upper_row: &[u8] = &first_row;
    for (cur_row, dest_row) in buf.chunks_exact(columns + 1).zip(r.chunks_mut(columns)) {
        let (flag, cur_row) = cur_row.split_first().ok_or_else(|| anyhow!("empty row"))?;
        for i in 0..columns {
            let left = if i >= bpp { dest_row[i - bpp] } else { 0 };
            let up = upper_row[i];
            let left_up = if i >= bpp { upper_row[i - bpp] } else { 0 };
            dest_row[i] = match flag {
                0 => cur_row[i],
                1 => cur_row[i].wrapping_add(left),
                2 => cur_row[i].wrapping_add(up),
                3 => cur_row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => cur_row[i].wrapping_add(paeth(left, up, left_up)),
                _ => bail!("Unknown png predictor: {}", flag),
            };
        }
        upper_row = dest_row;
    }
    Ok(r)
}

/// Tiff predictor 2, 8 bits per component only.
fn tiff_predictor(mut buf: Vec<u8>, params: &LZWFlateParams) -> AnyResult<Vec<u8>> {
    if params.bits_per_component != 8 {
        bail!(
            "tiff predictor with {} bits per component",
            params.bits_per_component
        );
    }
    let bpp = params.pixel_bytes()?;
    for row in buf.chunks_mut(params.row_bytes()?) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    Ok(buf)
}

fn ensure_no_predictor(params: Option<&Dictionary>) -> AnyResult<LZWFlateParams> {
    let p = LZWFlateParams::new(params)?;
    if p.predictor != 1 {
        bail!("encode with predictor {} not supported", p.predictor);
    }
    Ok(p)
}

struct FlateCodec;

impl Codec for FlateCodec {
    fn decode(&self, data: &[u8], params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        use flate2::bufread::{DeflateDecoder, ZlibDecoder};
        use std::io::Read;

        let params = LZWFlateParams::new(params)?;
        let mut r = Vec::with_capacity(data.len() * 2);
        if ZlibDecoder::new(data).read_to_end(&mut r).is_err() {
            r.clear();
            DeflateDecoder::new(data).read_to_end(&mut r)?;
        }
        params.decode_predictor(r)
    }

    fn encode(&self, data: &[u8], params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        use flate2::{write::ZlibEncoder, Compression};
        use std::io::Write;

        ensure_no_predictor(params)?;
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }
}

struct LzwCodec;

impl Codec for LzwCodec {
    fn decode(&self, data: &[u8], params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        use weezl::{decode::Decoder, BitOrder};

        let params = LZWFlateParams::new(params)?;
        let mut decoder = if params.early_change == 1 {
            Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
        } else {
            Decoder::new(BitOrder::Msb, 8)
        };
        let mut r = Vec::with_capacity(data.len() * 2);
        let rv = decoder.into_stream(&mut r).decode_all(data);
        rv.status?;
        params.decode_predictor(r)
    }

    fn encode(&self, data: &[u8], params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        use weezl::{encode::Encoder, BitOrder};

        let params = ensure_no_predictor(params)?;
        let mut encoder = if params.early_change == 1 {
            Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
        } else {
            Encoder::new(BitOrder::Msb, 8)
        };
        Ok(encoder.encode(data)?)
    }
}

struct AsciiHexCodec;

impl Codec for AsciiHexCodec {
    fn decode(&self, data: &[u8], _params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        let mut digits: Vec<u8> = data
            .iter()
            .copied()
            .take_while(|b| *b != b'>')
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if digits.len() % 2 == 1 {
            digits.push(b'0');
        }
        Ok(hex::decode(digits)?)
    }

    fn encode(&self, data: &[u8], _params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        Ok(hex::encode_upper(data).bytes().chain(once(b'>')).collect())
    }
}

struct Ascii85Codec;

impl Codec for Ascii85Codec {
    fn decode(&self, data: &[u8], _params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        Ok(ascii85::decode(data)?)
    }

    fn encode(&self, data: &[u8], _params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        Ok(ascii85::encode(data))
    }
}

struct RunLengthCodec;

impl Codec for RunLengthCodec {
    fn decode(&self, data: &[u8], _params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        run_length::decode(data)
    }

    fn encode(&self, data: &[u8], _params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        Ok(run_length::encode(data))
    }
}

#[cfg(test)]
mod tests;
