//! Object serializer.
use crate::{
    cursor::ByteWriter,
    file::FileResult,
    filter::FilterRegistry,
    object::{Dictionary, Name, Object, ObjectId, PdfString, Stream, KEY_LENGTH},
};

mod save;
pub use save::*;

fn is_regular(b: u8) -> bool {
    b.is_ascii_graphic()
        && !matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
        )
}

/// Serializes objects into a `ByteWriter`, stream data encoded through
/// `filters`.
pub struct ObjectWriter<'a> {
    w: &'a mut ByteWriter,
    filters: &'a FilterRegistry,
}

impl<'a> ObjectWriter<'a> {
    pub fn new(w: &'a mut ByteWriter, filters: &'a FilterRegistry) -> Self {
        Self { w, filters }
    }

    pub fn position(&self) -> usize {
        self.w.position()
    }

    pub fn write_name(&mut self, name: &Name) {
        self.w.write_u8(b'/');
        for &b in name.as_bytes() {
            if is_regular(b) {
                self.w.write_u8(b);
            } else {
                self.w.write_str(&format!("#{b:02X}"));
            }
        }
    }

    /// Literal form if all bytes printable, hex form otherwise.
    pub fn write_string(&mut self, s: &PdfString) {
        let bytes = s.as_bytes();
        if !bytes
            .iter()
            .all(|b| b.is_ascii_graphic() || matches!(b, b' ' | b'\n' | b'\r' | b'\t'))
        {
            self.w.write_u8(b'<');
            self.w.write_str(&hex::encode_upper(bytes));
            self.w.write_u8(b'>');
            return;
        }

        self.w.write_u8(b'(');
        for &b in bytes {
            match b {
                b'(' | b')' | b'\\' => {
                    self.w.write_u8(b'\\');
                    self.w.write_u8(b);
                }
                b'\n' => self.w.write_bytes(b"\\n"),
                b'\r' => self.w.write_bytes(b"\\r"),
                b'\t' => self.w.write_bytes(b"\\t"),
                _ => self.w.write_u8(b),
            }
        }
        self.w.write_u8(b')');
    }

    /// Keys written in sorted order, output is deterministic.
    pub fn write_dict(&mut self, d: &Dictionary) -> FileResult<()> {
        let mut entries: Vec<_> = d.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        self.w.write_bytes(b"<<");
        for (i, (k, v)) in entries.into_iter().enumerate() {
            if i > 0 {
                self.w.write_u8(b' ');
            }
            self.write_name(k);
            self.w.write_u8(b' ');
            self.write_object(v)?;
        }
        self.w.write_bytes(b">>");
        Ok(())
    }

    /// `Length` of the dictionary replaced by length of encoded data.
    pub fn write_stream(&mut self, s: &Stream) -> FileResult<()> {
        let data = s.encoded(self.filters)?;
        let mut d = s.dict().clone();
        d.set(KEY_LENGTH, data.len());
        self.write_dict(&d)?;
        self.w.write_bytes(b"\nstream\n");
        self.w.write_bytes(data);
        self.w.write_bytes(b"\nendstream");
        Ok(())
    }

    pub fn write_object(&mut self, o: &Object) -> FileResult<()> {
        match o {
            Object::Null => self.w.write_bytes(b"null"),
            Object::Bool(true) => self.w.write_bytes(b"true"),
            Object::Bool(false) => self.w.write_bytes(b"false"),
            Object::Number(n) => self.w.write_str(&n.to_string()),
            Object::Name(n) => self.write_name(n),
            Object::String(s) => self.write_string(s),
            Object::Array(arr) => {
                self.w.write_u8(b'[');
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        self.w.write_u8(b' ');
                    }
                    self.write_object(v)?;
                }
                self.w.write_u8(b']');
            }
            Object::Dictionary(d) => self.write_dict(d)?,
            Object::Stream(s) => self.write_stream(s)?,
            Object::Reference(id) => self.w.write_str(&format!("{id} R")),
        }
        Ok(())
    }

    /// Write `N G obj ... endobj`, return offset of the object.
    pub fn write_indirect(&mut self, id: ObjectId, o: &Object) -> FileResult<usize> {
        let pos = self.w.position();
        self.w.write_str(&format!("{id} obj\n"));
        self.write_object(o)?;
        self.w.write_bytes(b"\nendobj\n");
        Ok(pos)
    }
}

/// Serialize object to bytes, as stored in an object stream.
pub fn object_to_bytes(o: &Object, filters: &FilterRegistry) -> FileResult<Vec<u8>> {
    let mut w = ByteWriter::new();
    ObjectWriter::new(&mut w, filters).write_object(o)?;
    Ok(w.into_inner())
}
