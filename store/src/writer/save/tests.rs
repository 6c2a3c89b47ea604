use super::*;
use test_case::test_case;

#[test_case(0 => 1)]
#[test_case(255 => 1)]
#[test_case(256 => 2)]
#[test_case(0x1_0000 => 3)]
#[test_case(u32::MAX => 4)]
fn field_width(v: u32) -> usize {
    byte_width(v)
}

#[test]
fn xref_table_format() {
    let mut w = ByteWriter::new();
    w.write_str("%PDF-1.7\n");
    let sections = group_sections([
        (0, Entry::FREE_HEAD),
        (
            1,
            Entry::InUse {
                offset: 15,
                generation: 0,
            },
        ),
        (
            3,
            Entry::Free {
                next: 0,
                generation: 2,
            },
        ),
    ]);
    let trailer = Dictionary::new().with("Size", 4);
    let pos = write_xref_table(&mut w, &sections, &trailer, &FilterRegistry::default()).unwrap();
    assert_eq!(pos, 9);
    assert_eq!(
        &w.as_bytes()[pos..],
        b"xref\n0 2\n0000000000 65535 f \n0000000015 00000 n \n3 1\n0000000000 00002 f \ntrailer\n<</Size 4>>\n"
    );
}

#[test]
fn compressed_entry_not_in_table() {
    let sections = group_sections([(
        1,
        Entry::Compressed {
            container: 2,
            index: 0,
        },
    )]);
    let r = write_xref_table(
        &mut ByteWriter::new(),
        &sections,
        &Dictionary::new(),
        &FilterRegistry::default(),
    );
    assert!(matches!(r, Err(FileError::Format(_))));
}

#[test]
fn inline_streams_extracted() {
    let s = Stream::new(Dictionary::new(), b"x".to_vec());
    let mut o: Object = Dictionary::new()
        .with("A", vec![Object::from(1), s.clone().into()])
        .with("B", s.clone())
        .into();
    let mut next = 10;
    let mut out = vec![];
    extract_inline_streams(&mut o, &mut next, &mut out);
    assert_eq!(next, 12);
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|(_, o)| o == &Object::Stream(s.clone())));

    let mut refs: Vec<_> = o.iter_references().collect();
    refs.sort();
    assert_eq!(refs, vec![ObjectId::new(10, 0), ObjectId::new(11, 0)]);

    // top level stream stays
    let mut top = Object::Stream(s);
    extract_inline_streams(&mut top, &mut next, &mut out);
    assert!(matches!(top, Object::Stream(_)));
    assert_eq!(next, 12);
}

#[test]
fn renumber_references() {
    let mut o: Object = vec![
        Object::from(ObjectId::new(1, 0)),
        Dictionary::new().with("P", ObjectId::new(2, 0)).into(),
    ]
    .into();
    renumber(&mut o, &[0, 2, 1]);
    assert_eq!(
        o,
        Object::Array(vec![
            ObjectId::new(2, 0).into(),
            Dictionary::new().with("P", ObjectId::new(1, 0)).into(),
        ])
    );
}

#[test]
fn collector_numbers_each_reference_once() {
    let doc = Document::new();
    let mut c = Collector::new(&doc);
    let pages: Object = ObjectId::new(2, 0).into();
    assert_eq!(c.relink(&pages).unwrap(), ObjectId::new(1, 0).into());
    assert_eq!(c.relink(&pages).unwrap(), ObjectId::new(1, 0).into());
    // missing object written as null
    assert_eq!(
        c.relink(&ObjectId::new(9, 0).into()).unwrap(),
        Object::Null
    );

    let font: Object = Dictionary::new().with("Type", Name::from("Font")).into();
    assert_eq!(c.relink(&font).unwrap(), ObjectId::new(2, 0).into());
    let plain: Object = Dictionary::new().with("A", 1).into();
    assert_eq!(c.relink(&plain).unwrap(), plain);

    c.collect().unwrap();
    assert_eq!(c.objects.len(), 2);
    assert!(c.objects[0].dict().unwrap().is_type("Pages"));
    assert_eq!(c.objects[1], font);
}

#[test]
fn collector_drops_stream_length() {
    let doc = Document::new();
    let mut c = Collector::new(&doc);
    let s = Stream::new(
        Dictionary::new().with("Length", ObjectId::new(2, 0)),
        b"abc".to_vec(),
    );
    assert_eq!(
        c.relink(&s.into()).unwrap(),
        ObjectId::new(1, 0).into()
    );
    c.collect().unwrap();
    assert_eq!(c.objects.len(), 1);
    assert!(!c.objects[0].dict().unwrap().contains("Length"));
}

#[test]
fn kids_elements_promoted() {
    let doc = Document::new();
    let mut c = Collector::new(&doc);
    let d = Dictionary::new()
        .with("Kids", vec![Object::from(Dictionary::new().with("A", 1))])
        .with("Other", vec![Object::from(Dictionary::new().with("A", 1))]);
    let r = c.relink_dict(&d).unwrap();
    assert_eq!(
        r.get_value("Kids"),
        Some(&Object::Array(vec![ObjectId::new(1, 0).into()]))
    );
    assert_eq!(r.get_value("Other"), d.get_value("Other"));
}
