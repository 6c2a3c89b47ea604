use super::*;
use crate::filter::{FILTER_ASCII_HEX_DECODE, FILTER_FLATE_DECODE};

#[test]
fn no_filter() {
    let r = FilterRegistry::default();
    let s = Stream::new(Dictionary::new(), b"abc".to_vec());
    assert_eq!(s.raw(), None);
    assert_eq!(s.encoded(&r).unwrap(), b"abc");
    assert_eq!(s.raw(), Some(&b"abc"[..]));
}

#[test]
fn encode_by_declared_filters() {
    let r = FilterRegistry::default();
    let s = Stream::new(
        Dictionary::new().with(KEY_FILTER, FILTER_ASCII_HEX_DECODE),
        b"hi".to_vec(),
    );
    assert_eq!(s.encoded(&r).unwrap(), b"6869>");

    let s = Stream::from_encoded(s.dict().clone(), b"68 69>".to_vec());
    assert_eq!(s.decoded(&r).unwrap(), b"hi");
}

#[test]
fn filter_chain_in_decode_order() {
    let r = FilterRegistry::default();
    let d = Dictionary::new().with(
        KEY_FILTER,
        vec![
            Object::from(FILTER_ASCII_HEX_DECODE),
            Object::from(FILTER_FLATE_DECODE),
        ],
    );
    let s = Stream::new(d.clone(), b"hello hello".to_vec());
    let encoded = s.encoded(&r).unwrap().to_vec();
    assert!(encoded.ends_with(b">"));

    let s = Stream::from_encoded(d, encoded);
    assert_eq!(s.decoded(&r).unwrap(), b"hello hello");
    let names: Vec<_> = s.filters().unwrap().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec![FILTER_ASCII_HEX_DECODE, FILTER_FLATE_DECODE]);
}

#[test]
fn decode_params_by_position() {
    let parms = Dictionary::new().with("Predictor", 12);
    let d = Dictionary::new()
        .with(KEY_FILTER, FILTER_FLATE_DECODE)
        .with(KEY_DECODE_PARMS, parms.clone());
    let s = Stream::from_encoded(d, vec![]);
    assert_eq!(
        s.filters().unwrap(),
        vec![(FILTER_FLATE_DECODE, Some(&parms))]
    );

    let d = Dictionary::new()
        .with(
            KEY_FILTER,
            vec![
                Object::from(FILTER_ASCII_HEX_DECODE),
                Object::from(FILTER_FLATE_DECODE),
            ],
        )
        .with(KEY_DECODE_PARMS, vec![Object::Null, parms.clone().into()]);
    let s = Stream::from_encoded(d, vec![]);
    assert_eq!(
        s.filters().unwrap(),
        vec![
            (FILTER_ASCII_HEX_DECODE, None),
            (FILTER_FLATE_DECODE, Some(&parms))
        ]
    );
}

#[test]
fn external_stream_not_supported() {
    let s = Stream::from_encoded(
        Dictionary::new().with("FFilter", FILTER_FLATE_DECODE),
        vec![],
    );
    assert_eq!(s.filters(), Err(ObjectValueError::ExternalStreamNotSupported));
}

#[test]
fn unknown_filter() {
    let s = Stream::from_encoded(
        Dictionary::new().with(KEY_FILTER, Name::from("Foo")),
        b"x".to_vec(),
    );
    assert!(s.decoded(&FilterRegistry::default()).is_err());
}

#[test]
fn set_filters_reencodes() {
    let r = FilterRegistry::default();
    let mut s = Stream::from_encoded(
        Dictionary::new()
            .with(KEY_FILTER, FILTER_ASCII_HEX_DECODE)
            .with(KEY_DECODE_PARMS, Dictionary::new()),
        b"6869>".to_vec(),
    );
    s.set_filters(&r, vec![]).unwrap();
    assert!(!s.dict().contains("Filter"));
    assert!(!s.dict().contains("DecodeParms"));
    assert_eq!(s.encoded(&r).unwrap(), b"hi");

    s.set_filters(&r, vec![FILTER_ASCII_HEX_DECODE]).unwrap();
    assert_eq!(s.dict().get_name("Filter"), Ok(Some(&FILTER_ASCII_HEX_DECODE)));
    assert_eq!(s.encoded(&r).unwrap(), b"6869>");
}

#[test]
fn set_payload_drops_other_form() {
    let r = FilterRegistry::default();
    let mut s = Stream::new(Dictionary::new(), b"a".to_vec());
    s.set_encoded(b"b".to_vec());
    assert_eq!(s.decoded(&r).unwrap(), b"b");
    s.set_decoded(b"c".to_vec());
    assert_eq!(s.raw(), None);
    assert_eq!(s.encoded(&r).unwrap(), b"c");
}

#[test]
fn equality_by_dict_and_data() {
    let a = Stream::new(Dictionary::new(), b"x".to_vec());
    assert_eq!(a, Stream::new(Dictionary::new(), b"x".to_vec()));
    assert_ne!(a, Stream::new(Dictionary::new(), b"y".to_vec()));
    assert_ne!(
        a,
        Stream::new(Dictionary::new().with("A", 1), b"x".to_vec())
    );
}
