use nipdf_store::{
    filter::FILTER_FLATE_DECODE, object::Numeric, Authorization, Cipher, Dictionary, Document,
    EncryptionOptions, FileError, Name, Object, ObjectId, PdfString, SaveOptions, Stream,
};
use test_case::test_case;
use test_log::test;

/// Build file of classic xref table, objects numbered from 1 in order.
fn table_pdf(objects: &[&str], trailer: &str) -> Vec<u8> {
    let mut buf = b"%PDF-1.5\n".to_vec();
    let mut offsets = vec![];
    for (i, body) in objects.iter().enumerate() {
        offsets.push(buf.len());
        buf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }
    let xref_pos = buf.len();
    buf.extend_from_slice(
        format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes(),
    );
    for offset in offsets {
        buf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    buf.extend_from_slice(
        format!("trailer\n{trailer}\nstartxref\n{xref_pos}\n%%EOF\n").as_bytes(),
    );
    buf
}

fn one_page_pdf() -> Vec<u8> {
    table_pdf(
        &[
            "<</Type /Catalog /Pages 2 0 R>>",
            "<</Type /Pages /Kids [3 0 R] /Count 1>>",
            "<</Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R>>",
            "<</Length 5>>\nstream\nBT ET\nendstream",
        ],
        "<</Size 5 /Root 1 0 R>>",
    )
}

fn contains(buf: &[u8], s: &str) -> bool {
    buf.windows(s.len()).any(|w| w == s.as_bytes())
}

fn page_count(doc: &Document) -> i64 {
    let pages = doc.get_dict(doc.root().unwrap(), "Pages").unwrap().unwrap();
    pages.get_int("Count", -1).unwrap()
}

fn first_page(doc: &Document) -> &Dictionary {
    let pages = doc.get_dict(doc.root().unwrap(), "Pages").unwrap().unwrap();
    let kids = doc.get(pages, "Kids").unwrap().unwrap().arr().unwrap();
    doc.deref(&kids[0]).unwrap().dict().unwrap()
}

#[test_case(true; "object streams")]
#[test_case(false; "xref table")]
fn save_one_page(object_streams: bool) {
    let doc = Document::open(one_page_pdf(), None).unwrap();
    let buf = doc
        .save(&SaveOptions::default().object_streams(object_streams))
        .unwrap();
    assert!(buf.starts_with(b"%PDF-1.5\n"));
    assert!(buf.ends_with(b"%%EOF\n"));
    assert_eq!(contains(&buf, "/Type /XRef"), object_streams);
    assert_eq!(contains(&buf, "/Type /ObjStm"), object_streams);
    assert_eq!(contains(&buf, "\nxref\n"), !object_streams);

    let doc = Document::open(buf, None).unwrap();
    assert_eq!(page_count(&doc), 1);
    let page = first_page(&doc);
    assert!(page.is_type("Page"));
    let contents = doc.get(page, "Contents").unwrap().unwrap().stream().unwrap();
    assert_eq!(contents.decoded(doc.filters()).unwrap(), b"BT ET");
    // parent points back to the same page tree object
    let parent = doc.get(page, "Parent").unwrap().unwrap();
    let pages = doc.get(doc.root().unwrap(), "Pages").unwrap().unwrap();
    assert!(std::ptr::eq(parent, pages));
}

#[test]
fn new_document_save() {
    let mut doc = Document::new();
    let info = doc.add_object(Dictionary::new().with("Title", PdfString::from("new")));
    doc.trailer_mut().set("Info", info);
    let buf = doc.save(&SaveOptions::default().file_id([7; 16])).unwrap();
    assert!(buf.starts_with(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n"));

    let doc = Document::open(buf, None).unwrap();
    assert_eq!(page_count(&doc), 0);
    assert_eq!(doc.file_id(), Some(&[7u8; 16][..]));
    let title = doc.info().unwrap().unwrap().get_value("Title").unwrap();
    assert_eq!(title, &Object::String("new".into()));
}

#[test]
fn shared_object_written_once() {
    let doc = Document::open(
        table_pdf(
            &[
                "<</Type /Catalog /Pages 2 0 R>>",
                "<</Type /Pages /Kids [3 0 R 4 0 R] /Count 2>>",
                "<</Type /Page /Parent 2 0 R /Resources <</Font <</F1 5 0 R>>>>>>",
                "<</Type /Page /Parent 2 0 R /Resources <</Font <</F1 5 0 R>>>>>>",
                "<</Type /Font /Subtype /Type1 /BaseFont /Helvetica>>",
            ],
            "<</Size 6 /Root 1 0 R>>",
        ),
        None,
    )
    .unwrap();
    let buf = doc.save(&SaveOptions::default()).unwrap();
    let doc = Document::open(buf, None).unwrap();

    let pages = doc.get_dict(doc.root().unwrap(), "Pages").unwrap().unwrap();
    let kids = doc.get(pages, "Kids").unwrap().unwrap().arr().unwrap();
    let font_of = |kid: &Object| {
        let page = doc.deref(kid).unwrap().dict().unwrap();
        let resources = doc.get_dict(page, "Resources").unwrap().unwrap();
        let fonts = doc.get_dict(resources, "Font").unwrap().unwrap();
        fonts.get_value("F1").unwrap().reference().unwrap()
    };
    assert_eq!(font_of(&kids[0]), font_of(&kids[1]));
    // five objects, their object stream and the xref stream
    assert_eq!(doc.object_ids().len(), 7);
}

#[test]
fn inline_values_promoted() {
    let doc = Document::open(
        table_pdf(
            &[
                "<</Type /Catalog /Pages <</Type /Pages /Kids [<</Type /Page>>] /Count 1>>>>",
                "<</Title (t)>>",
            ],
            "<</Size 3 /Root 1 0 R /Info <</Producer (p)>>>>",
        ),
        None,
    )
    .unwrap();
    let buf = doc.save(&SaveOptions::default().object_streams(false)).unwrap();
    let doc = Document::open(buf, None).unwrap();

    let root = doc.root().unwrap();
    let pages = root.get_value("Pages").unwrap();
    assert!(matches!(pages, Object::Reference(_)));
    let kids = doc.deref(pages).unwrap().dict().unwrap().get_value("Kids").unwrap();
    assert!(matches!(kids.arr().unwrap()[0], Object::Reference(_)));
    assert!(matches!(doc.trailer().get_value("Info"), Some(Object::Reference(_))));
    assert_eq!(
        doc.info().unwrap().unwrap().get_value("Producer"),
        Some(&Object::String("p".into()))
    );
    // not reachable from trailer
    assert_eq!(doc.object_ids().len(), 4);
}

#[test]
fn dangling_reference_saved_as_null() {
    let doc = Document::open(
        table_pdf(
            &["<</Type /Catalog /Outlines 9 0 R /A [9 0 R]>>"],
            "<</Size 2 /Root 1 0 R>>",
        ),
        None,
    )
    .unwrap();
    let buf = doc.save(&SaveOptions::default()).unwrap();
    let doc = Document::open(buf, None).unwrap();
    let root = doc.root().unwrap();
    assert_eq!(root.get_value("Outlines"), Some(&Object::Null));
    assert_eq!(root.get_value("A"), Some(&Object::Array(vec![Object::Null])));
}

#[test]
fn many_objects_split_into_object_streams() {
    let mut doc = Document::new();
    let ids: Vec<Object> = (0..25)
        .map(|i| doc.add_object(Dictionary::new().with("I", i)).into())
        .collect();
    doc.get_mut(ObjectId::new(1, 0))
        .unwrap()
        .dict_mut()
        .unwrap()
        .set("Items", ids);
    let buf = doc
        .save(&SaveOptions::default().max_objects_per_stream(10))
        .unwrap();
    assert_eq!(
        buf.windows(13).filter(|w| *w == b"/Type /ObjStm").count(),
        3
    );

    let doc = Document::open(buf, None).unwrap();
    let items = doc.root().unwrap().get_value("Items").unwrap().arr().unwrap();
    assert_eq!(items.len(), 25);
    for (i, item) in items.iter().enumerate() {
        let d = doc.deref(item).unwrap().dict().unwrap();
        assert_eq!(d.get_int("I", -1).unwrap(), i as i64);
    }
}

#[test_case(true; "object streams")]
#[test_case(false; "xref table")]
fn every_value_kind_survives_save(object_streams: bool) {
    let payload = b"stream payload stream payload".repeat(10);
    let graph = Dictionary::new()
        .with("Decimal", Numeric::new(-12345, 3))
        .with("Int", 42)
        .with("Odd Key#(/)", Name::new(b"a b#(/)%\x80".to_vec()))
        .with("Binary", PdfString::new(vec![0, 0xff, b'\n', b'(', 7]))
        .with("Escaped", PdfString::new(b"a\r\\b\n(c) \t)".to_vec()))
        .with("True", true)
        .with("False", false)
        .with(
            "Nested",
            vec![
                Object::from(1),
                Object::Null,
                vec![
                    Object::from(Name::from("x")),
                    Dictionary::new().with("K", Numeric::new(5, 1)).into(),
                ]
                .into(),
            ],
        );
    let stream = Stream::new(
        Dictionary::new().with("Filter", FILTER_FLATE_DECODE),
        payload.clone(),
    );

    let mut doc = Document::new();
    let root = doc.get_mut(ObjectId::new(1, 0)).unwrap().dict_mut().unwrap();
    root.set("Graph", graph.clone());
    root.set("Data", stream);
    let buf = doc
        .save(&SaveOptions::default().object_streams(object_streams))
        .unwrap();

    let doc = Document::open(buf, None).unwrap();
    let root = doc.root().unwrap();
    assert_eq!(root.get_value("Graph"), Some(&Object::Dictionary(graph)));
    let data = root.get_value("Data").unwrap();
    assert!(matches!(data, Object::Reference(_)));
    let data = doc.deref(data).unwrap().stream().unwrap();
    assert_eq!(
        data.dict().get_value("Filter"),
        Some(&Object::Name(FILTER_FLATE_DECODE))
    );
    assert_eq!(data.decoded(doc.filters()).unwrap(), payload);
}

#[test]
fn incremental_save_unchanged() {
    let buf = one_page_pdf();
    let doc = Document::open(buf.clone(), None).unwrap();
    assert_eq!(doc.save_incremental().unwrap(), buf);
}

#[test]
fn incremental_save_table() {
    let orig = one_page_pdf();
    let mut doc = Document::open(orig.clone(), None).unwrap();
    doc.get_mut(ObjectId::new(3, 0))
        .unwrap()
        .dict_mut()
        .unwrap()
        .set("Rotate", 90);
    let info = doc.add_object(Dictionary::new().with("Title", PdfString::from("t")));
    doc.trailer_mut().set("Info", info);
    doc.delete_object(ObjectId::new(4, 0)).unwrap();

    let buf = doc.save_incremental().unwrap();
    assert!(buf.starts_with(&orig));
    assert!(contains(&buf[orig.len()..], "\nxref\n"));
    assert!(contains(&buf[orig.len()..], "/Prev "));

    let doc = Document::open(buf, None).unwrap();
    let page = first_page(&doc);
    assert_eq!(page.get_int("Rotate", 0).unwrap(), 90);
    assert_eq!(doc.get(page, "Contents").unwrap(), None);
    assert_eq!(doc.resolve(ObjectId::new(4, 0)).unwrap(), &Object::Null);
    assert_eq!(doc.resolve(ObjectId::new(4, 1)).unwrap(), &Object::Null);
    assert_eq!(
        doc.info().unwrap().unwrap().get_value("Title"),
        Some(&Object::String("t".into()))
    );
}

#[test]
fn incremental_save_xref_stream() {
    let orig = Document::open(one_page_pdf(), None)
        .unwrap()
        .save(&SaveOptions::default())
        .unwrap();
    let mut doc = Document::open(orig.clone(), None).unwrap();
    let root_id = doc.root_id().unwrap();
    doc.get_mut(root_id)
        .unwrap()
        .dict_mut()
        .unwrap()
        .set("PageMode", Name::from("UseOutlines"));
    // inline stream moved to its own object
    let xobject = Stream::new(Dictionary::new(), b"q Q".to_vec());
    doc.add_object(Dictionary::new().with("X", xobject));

    let buf = doc.save_incremental().unwrap();
    assert!(buf.starts_with(&orig));
    let appended = &buf[orig.len()..];
    assert!(contains(appended, "/Type /XRef"));
    assert!(contains(appended, "/Index ["));

    let doc = Document::open(buf, None).unwrap();
    assert_eq!(
        doc.root().unwrap().get_name("PageMode").unwrap(),
        Some(&Name::from("UseOutlines"))
    );
    assert_eq!(page_count(&doc), 1);
    let added = doc.object_ids().into_iter().find_map(|id| {
        let o = doc.resolve(id).ok()?;
        o.opt_dict()?.get_value("X").cloned()
    });
    let x = doc.deref(added.as_ref().unwrap()).unwrap().stream().unwrap();
    assert_eq!(x.decoded(doc.filters()).unwrap(), b"q Q");
}

#[test]
fn incremental_save_new_document_is_full_save() {
    let doc = Document::new();
    let buf = doc.save_incremental().unwrap();
    let doc = Document::open(buf, None).unwrap();
    assert_eq!(page_count(&doc), 0);
}

#[test_case(Cipher::Rc4; "rc4")]
#[test_case(Cipher::Aes128; "aes")]
fn encrypted_save(cipher: Cipher) {
    let mut doc = Document::open(one_page_pdf(), None).unwrap();
    let info = doc.add_object(Dictionary::new().with("Title", PdfString::from("secret title")));
    doc.trailer_mut().set("Info", info);
    let options = SaveOptions::default().encryption(
        EncryptionOptions::new("")
            .owner_password("owner")
            .cipher(cipher),
    );
    let buf = doc.save(&options).unwrap();
    assert!(!contains(&buf, "secret title"));
    assert!(!contains(&buf, "BT ET"));
    assert!(contains(&buf, "\nxref\n"));
    assert!(!contains(&buf, "/Type /ObjStm"));

    let user = Document::open(buf.clone(), None).unwrap();
    assert_eq!(user.authorization(), Authorization::User);
    assert_eq!(
        user.info().unwrap().unwrap().get_value("Title"),
        Some(&Object::String("secret title".into()))
    );
    let contents = user.get(first_page(&user), "Contents").unwrap().unwrap();
    assert_eq!(
        contents.stream().unwrap().decoded(user.filters()).unwrap(),
        b"BT ET"
    );

    let owner = Document::open(buf.clone(), Some("owner")).unwrap();
    assert_eq!(owner.authorization(), Authorization::Owner);
    assert!(matches!(
        Document::open(buf, Some("nobody")),
        Err(FileError::Authentication)
    ));
}

#[test]
fn encrypted_incremental_save() {
    let doc = Document::open(one_page_pdf(), None).unwrap();
    let buf = doc
        .save(&SaveOptions::default().encryption(EncryptionOptions::new("user")))
        .unwrap();

    let mut doc = Document::open(buf.clone(), Some("user")).unwrap();
    let id = doc.add_object(PdfString::from("appended"));
    let root_id = doc.root_id().unwrap();
    doc.get_mut(root_id).unwrap().dict_mut().unwrap().set("Extra", id);
    let buf = doc.save_incremental().unwrap();
    assert!(!contains(&buf, "appended"));

    let doc = Document::open(buf, Some("user")).unwrap();
    assert_eq!(
        doc.get(doc.root().unwrap(), "Extra").unwrap(),
        Some(&Object::String("appended".into()))
    );
}

#[test]
fn decrypted_on_full_save() {
    let mut doc = Document::open(one_page_pdf(), None).unwrap();
    let info = doc.add_object(Dictionary::new().with("Title", PdfString::from("plain")));
    doc.trailer_mut().set("Info", info);
    let encrypted = doc
        .save(&SaveOptions::default().encryption(EncryptionOptions::new("")))
        .unwrap();

    let buf = Document::open(encrypted, None)
        .unwrap()
        .save(&SaveOptions::default().object_streams(false))
        .unwrap();
    assert!(contains(&buf, "(plain)"));
    let doc = Document::open(buf, None).unwrap();
    assert!(!doc.is_encrypted());
}
