use super::*;
use crate::object::Object;
use hex_literal::hex;
use test_case::test_case;

fn params(entries: &[(&str, i32)]) -> Dictionary {
    entries
        .iter()
        .map(|(k, v)| (Name::from(*k), Object::from(*v)))
        .collect()
}

#[test_case(b"BOu!rD]j7BEbo7~>", b"hello world"; "with tail")]
#[test_case(b"<~BOu!rD]j7BEbo7~>", b"hello world"; "with prefix")]
#[test_case(b"BOu!r D]j7B\nEbo7 ~>\n", b"hello world"; "whitespace")]
#[test_case(b"z@:E^~>", b"\0\0\0\0abc"; "zero group")]
#[test_case(b"~>", b""; "empty")]
fn ascii85_decode(data: &[u8], exp: &[u8]) {
    assert_eq!(ascii85::decode(data).unwrap(), exp);
}

#[test_case(b"B~>"; "lone tail symbol")]
#[test_case(b"BOu!v~>"; "symbol out of range")]
#[test_case(b"s8W-\"~>"; "group overflow")]
fn ascii85_decode_error(data: &[u8]) {
    assert!(ascii85::decode(data).is_err());
}

#[test_case(b"hello world" => b"BOu!rD]j7BEbo7~>".to_vec())]
#[test_case(b"\0\0\0\0abc" => b"z@:E^~>".to_vec())]
#[test_case(b"" => b"~>".to_vec())]
fn ascii85_encode(data: &[u8]) -> Vec<u8> {
    ascii85::encode(data)
}

#[test_case(&hex!("02 616263 fe 78 80") => b"abcxxx".to_vec(); "literal and repeat")]
#[test_case(&hex!("00 41") => b"A".to_vec(); "no eod")]
#[test_case(&hex!("80 00 41") => Vec::<u8>::new(); "stop at eod")]
fn run_length_decode(data: &[u8]) -> Vec<u8> {
    run_length::decode(data).unwrap()
}

#[test]
fn run_length_truncated() {
    assert!(run_length::decode(&hex!("05 41 42")).is_err());
    assert!(run_length::decode(&hex!("fe")).is_err());
}

#[test]
fn run_length_encode() {
    assert_eq!(run_length::encode(b"abcxxx"), hex!("02 616263 fe 78 80"));
    let long = vec![7u8; 300];
    let encoded = run_length::encode(&long);
    assert_eq!(encoded, hex!("81 07 81 07 d5 07 80"));
    assert_eq!(run_length::decode(&encoded).unwrap(), long);
}

#[test_case(b"616263>", b"abc"; "simple")]
#[test_case(b"61 62\n6>", b"ab`"; "odd digits with whitespace")]
#[test_case(b"4a4B", b"JK"; "mixed case no end marker")]
fn ascii_hex_decode(data: &[u8], exp: &[u8]) {
    let r = FilterRegistry::default();
    assert_eq!(r.decode(&"AHx".into(), data, None).unwrap(), exp);
}

#[test]
fn flate_decode() {
    let r = FilterRegistry::default();
    let data = hex!("789ccb48cdc9c957c84090003a2e067d");
    assert_eq!(
        r.decode(&FILTER_FLATE_DECODE, &data, None).unwrap(),
        b"hello hello hello"
    );
    let encoded = r.encode(&"Fl".into(), b"some data", None).unwrap();
    assert_eq!(
        r.decode(&FILTER_FLATE_DECODE, &encoded, None).unwrap(),
        b"some data"
    );
}

#[test]
fn lzw_encode_decode() {
    let r = FilterRegistry::default();
    let data = b"-----A---B-----A---B-----A---B";
    for early_change in [0, 1] {
        let p = params(&[("EarlyChange", early_change)]);
        let encoded = r.encode(&FILTER_LZW_DECODE, data, Some(&p)).unwrap();
        assert_eq!(r.decode(&FILTER_LZW_DECODE, &encoded, Some(&p)).unwrap(), data);
    }
}

#[test]
fn png_predictor_rows() {
    // row 1: None, row 2: Up, row 3: Sub
    let buf = hex!("00 010203 02 010101 01 050101");
    assert_eq!(png_predictor(&buf, 3, 1).unwrap(), hex!("010203 020304 050607"));
}

#[test]
fn png_predictor_unknown_tag() {
    assert!(png_predictor(&hex!("05 01"), 1, 1).is_err());
}

#[test]
fn png_predictor_multi_byte_pixel() {
    // Sub with 2 bytes per pixel adds byte two positions left
    let buf = hex!("01 0a14 0101");
    assert_eq!(png_predictor(&buf, 4, 2).unwrap(), hex!("0a14 0b15"));
}

#[test_case(1, 2, 3 => 1)]
#[test_case(10, 20, 5 => 20)]
#[test_case(10, 20, 30 => 10)]
#[test_case(5, 5, 10 => 5)]
fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    paeth(a, b, c)
}

#[test]
fn flate_with_png_predictor_params() {
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    let mut e = ZlibEncoder::new(vec![], Compression::default());
    e.write_all(&hex!("02 0102 02 0101")).unwrap();
    let data = e.finish().unwrap();
    let p = params(&[("Predictor", 12), ("Columns", 2)]);
    let r = FilterRegistry::default();
    assert_eq!(
        r.decode(&FILTER_FLATE_DECODE, &data, Some(&p)).unwrap(),
        hex!("0102 0203")
    );
}

#[test]
fn tiff_predictor_rows() {
    let p = LZWFlateParams::new(Some(&params(&[("Predictor", 2), ("Columns", 3)]))).unwrap();
    assert_eq!(
        p.decode_predictor(hex!("010101 050101").to_vec()).unwrap(),
        hex!("010203 050607")
    );
}

#[test_case(&[("Colors", i32::MAX), ("BitsPerComponent", i32::MAX), ("Columns", i32::MAX)]; "overflow")]
#[test_case(&[("Colors", -1)]; "negative colors")]
#[test_case(&[("Columns", -3)]; "negative columns")]
fn png_predictor_invalid_params(entries: &[(&str, i32)]) {
    let mut entries = entries.to_vec();
    entries.push(("Predictor", 12));
    let p = LZWFlateParams::new(Some(&params(&entries))).unwrap();
    assert!(p.decode_predictor(hex!("00 0102").to_vec()).is_err());
}

#[test]
fn png_predictor_row_longer_than_data() {
    assert_eq!(png_predictor(&hex!("00 0102"), 1000, 1).unwrap(), b"");
}

#[test]
fn unknown_filter() {
    let r = FilterRegistry::default();
    assert_eq!(
        r.decode(&"JBIG2Decode".into(), b"", None),
        Err(ObjectValueError::UnknownFilter("JBIG2Decode".into()))
    );
}

#[test]
fn decode_error_wrapped() {
    let r = FilterRegistry::default();
    assert!(matches!(
        r.decode(&FILTER_ASCII85_DECODE, b"BOu!v~>", None),
        Err(ObjectValueError::FilterDecodeError(_))
    ));
}

struct Reverse;

impl Codec for Reverse {
    fn decode(&self, data: &[u8], _params: Option<&Dictionary>) -> AnyResult<Vec<u8>> {
        Ok(data.iter().rev().copied().collect())
    }
}

#[test]
fn register_custom_codec() {
    let mut r = FilterRegistry::empty();
    assert!(!r.contains(&FILTER_FLATE_DECODE));
    r.register("Reverse", Reverse);
    assert_eq!(r.decode(&"Reverse".into(), b"abc", None).unwrap(), b"cba");
    assert!(matches!(
        r.encode(&"Reverse".into(), b"abc", None),
        Err(ObjectValueError::FilterEncodeError(_))
    ));
}
