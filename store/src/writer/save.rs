//! Full save and incremental save.
use super::{object_to_bytes, ObjectWriter};
use crate::{
    cursor::ByteWriter,
    file::{Document, EncryptionOptions, FileError, FileResult, ObjectStreamBuilder, SecurityHandler},
    filter::{FilterRegistry, FILTER_FLATE_DECODE},
    object::{group_sections, Dictionary, Entry, Name, Object, ObjectId, PdfString, Section, Stream},
};
use ahash::{HashMap, HashMapExt};
use log::debug;
use rand::RngCore;
use std::{collections::BTreeMap, mem};

/// Dictionary types always written as indirect objects.
const INDIRECT_TYPES: [&str; 4] = ["Catalog", "Pages", "Page", "Font"];
/// Dictionary elements of these arrays are written as indirect objects.
const INDIRECT_ELEMENT_KEYS: [&str; 2] = ["Kids", "Fields"];
/// Trailer keys regenerated on save.
const TRAILER_SKIP_KEYS: [&str; 5] = ["Size", "ID", "Encrypt", "Prev", "XRefStm"];

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    /// Pack non-stream objects into object streams, and write xref in
    /// stream form. Ignored if encrypted.
    pub object_streams: bool,
    pub max_objects_per_stream: usize,
    pub encryption: Option<EncryptionOptions>,
    /// Random id generated if not set and the document has none.
    pub file_id: Option<[u8; 16]>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            object_streams: true,
            max_objects_per_stream: 100,
            encryption: None,
            file_id: None,
        }
    }
}

impl SaveOptions {
    pub fn object_streams(mut self, enabled: bool) -> Self {
        self.object_streams = enabled;
        self
    }

    pub fn max_objects_per_stream(mut self, n: usize) -> Self {
        self.max_objects_per_stream = n;
        self
    }

    pub fn encryption(mut self, encryption: EncryptionOptions) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn file_id(mut self, id: [u8; 16]) -> Self {
        self.file_id = Some(id);
        self
    }
}

fn random_file_id() -> Vec<u8> {
    let mut id = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut id);
    id.to_vec()
}

fn offset_u32(pos: usize) -> FileResult<u32> {
    u32::try_from(pos).map_err(|_| FileError::Format(format!("offset {pos} exceeds 4GB")))
}

/// Bytes needed to store `v`, at least 1.
fn byte_width(v: u32) -> usize {
    (((32 - v.leading_zeros()) + 7) / 8).max(1) as usize
}

fn is_indirect_type(d: &Dictionary) -> bool {
    INDIRECT_TYPES.iter().any(|t| d.is_type(t))
}

/// Walks reachable objects from trailer, assigns output numbers.
///
/// Objects already indirect keep one output number however many times they
/// are referenced. Inline values are promoted to indirect objects by
/// their kind or position.
struct Collector<'d> {
    doc: &'d Document,
    numbers: HashMap<ObjectId, u32>,
    /// Output object numbered `n` at index `n - 1`.
    objects: Vec<Object>,
    queue: Vec<(ObjectId, u32)>,
}

impl<'d> Collector<'d> {
    fn new(doc: &'d Document) -> Self {
        Self {
            doc,
            numbers: HashMap::new(),
            objects: vec![],
            queue: vec![],
        }
    }

    fn allocate(&mut self, o: Object) -> u32 {
        self.objects.push(o);
        self.objects.len() as u32
    }

    fn promote(&mut self, o: Object) -> Object {
        ObjectId::new(self.allocate(o), 0).into()
    }

    /// Reference to null or missing object written as null.
    fn reference(&mut self, id: ObjectId) -> FileResult<Object> {
        if let Some(n) = self.numbers.get(&id) {
            return Ok(ObjectId::new(*n, 0).into());
        }
        let doc = self.doc;
        if doc.resolve(id)?.is_null() {
            return Ok(Object::Null);
        }
        let n = self.allocate(Object::Null);
        self.numbers.insert(id, n);
        self.queue.push((id, n));
        Ok(ObjectId::new(n, 0).into())
    }

    fn relink_dict(&mut self, d: &Dictionary) -> FileResult<Dictionary> {
        let mut r = Dictionary::new();
        for (k, v) in d.iter() {
            let v = match v {
                Object::Array(arr) if INDIRECT_ELEMENT_KEYS.iter().any(|key| k == key) => {
                    let mut elements = Vec::with_capacity(arr.len());
                    for e in arr {
                        elements.push(match e {
                            Object::Dictionary(_) => {
                                let e = self.relink_children(e)?;
                                self.promote(e)
                            }
                            _ => self.relink(e)?,
                        });
                    }
                    Object::Array(elements)
                }
                _ => self.relink(v)?,
            };
            r.insert(k.clone(), v);
        }
        Ok(r)
    }

    /// Copy of `o` with references renumbered, `o` itself not promoted.
    fn relink_children(&mut self, o: &Object) -> FileResult<Object> {
        Ok(match o {
            Object::Reference(id) => self.reference(*id)?,
            Object::Array(arr) => Object::Array(
                arr.iter()
                    .map(|v| self.relink(v))
                    .collect::<FileResult<_>>()?,
            ),
            Object::Dictionary(d) => Object::Dictionary(self.relink_dict(d)?),
            Object::Stream(s) => {
                let mut s = s.clone();
                let mut d = s.dict().clone();
                d.remove_value("Length");
                *s.dict_mut() = self.relink_dict(&d)?;
                Object::Stream(s)
            }
            o => o.clone(),
        })
    }

    /// Copy of inline value `o`, promoted if it must be an indirect object.
    fn relink(&mut self, o: &Object) -> FileResult<Object> {
        let r = self.relink_children(o)?;
        let promote = match &r {
            Object::Stream(_) => true,
            Object::Dictionary(d) => is_indirect_type(d),
            _ => false,
        };
        Ok(if promote { self.promote(r) } else { r })
    }

    fn collect(&mut self) -> FileResult<()> {
        let doc = self.doc;
        while let Some((id, n)) = self.queue.pop() {
            let o = self.relink_children(doc.resolve(id)?)?;
            self.objects[n as usize - 1] = o;
        }
        Ok(())
    }
}

/// Change reference numbers by `map`, indexed by old number.
fn renumber(o: &mut Object, map: &[u32]) {
    match o {
        Object::Reference(id) => *id = ObjectId::new(map[id.number() as usize], 0),
        Object::Array(arr) => arr.iter_mut().for_each(|v| renumber(v, map)),
        Object::Dictionary(d) => d.values_mut().for_each(|v| renumber(v, map)),
        Object::Stream(s) => s.dict_mut().values_mut().for_each(|v| renumber(v, map)),
        _ => {}
    }
}

fn write_footer(w: &mut ByteWriter, xref_pos: usize) {
    w.write_str(&format!("startxref\n{xref_pos}\n%%EOF\n"));
}

fn write_xref_table(
    w: &mut ByteWriter,
    sections: &[Section],
    trailer: &Dictionary,
    filters: &FilterRegistry,
) -> FileResult<usize> {
    let pos = w.position();
    w.write_str("xref\n");
    for section in sections {
        w.write_str(&format!("{} {}\n", section.start, section.entries.len()));
        for (number, entry) in section.iter() {
            let line = match entry {
                Entry::Free { next, generation } => format!("{next:010} {generation:05} f \n"),
                Entry::InUse { offset, generation } => {
                    format!("{offset:010} {generation:05} n \n")
                }
                Entry::Compressed { .. } => {
                    return Err(FileError::Format(format!(
                        "compressed object {number} in xref table"
                    )))
                }
            };
            w.write_str(&line);
        }
    }
    w.write_str("trailer\n");
    ObjectWriter::new(w, filters).write_dict(trailer)?;
    w.write_u8(b'\n');
    Ok(pos)
}

/// Write xref stream object `id`, its own entry added. `trailer` provides
/// trailer keys merged into the stream dictionary.
fn write_xref_stream(
    w: &mut ByteWriter,
    id: ObjectId,
    mut entries: BTreeMap<u32, Entry>,
    mut trailer: Dictionary,
    filters: &FilterRegistry,
) -> FileResult<usize> {
    let pos = w.position();
    entries.insert(
        id.number(),
        Entry::InUse {
            offset: offset_u32(pos)?,
            generation: id.generation(),
        },
    );
    let (w2, w3) = entries.values().fold((1, 1), |(w2, w3), e| {
        let (_, f2, f3) = e.fields();
        (byte_width(f2).max(w2), byte_width(f3).max(w3))
    });
    let sections = group_sections(entries);

    let mut data = ByteWriter::new();
    for (_, e) in sections.iter().flat_map(Section::iter) {
        let (t, f2, f3) = e.fields();
        data.write_uint(1, t);
        data.write_uint(w2, f2);
        data.write_uint(w3, f3);
    }

    trailer.set("Type", Name::from("XRef"));
    trailer.set("W", vec![Object::from(1), w2.into(), w3.into()]);
    if !matches!(sections.as_slice(), [s] if s.start == 0) {
        let index: Vec<Object> = sections
            .iter()
            .flat_map(|s| [Object::from(s.start), s.entries.len().into()])
            .collect();
        trailer.set("Index", index);
    }
    trailer.set("Filter", FILTER_FLATE_DECODE);
    ObjectWriter::new(w, filters)
        .write_indirect(id, &Stream::new(trailer, data.into_inner()).into())?;
    Ok(pos)
}

/// Move inline streams nested in `o` out as new objects numbered from `next`.
fn extract_inline_streams(o: &mut Object, next: &mut u32, out: &mut Vec<(ObjectId, Object)>) {
    fn visit(v: &mut Object, next: &mut u32, out: &mut Vec<(ObjectId, Object)>) {
        if matches!(v, Object::Stream(_)) {
            let id = ObjectId::new(*next, 0);
            *next += 1;
            out.push((id, mem::replace(v, id.into())));
        } else {
            extract_inline_streams(v, next, out);
        }
    }

    match o {
        Object::Array(arr) => arr.iter_mut().for_each(|v| visit(v, next, out)),
        Object::Dictionary(d) => d.values_mut().for_each(|v| visit(v, next, out)),
        Object::Stream(s) => s.dict_mut().values_mut().for_each(|v| visit(v, next, out)),
        _ => {}
    }
}

impl Document {
    /// Serialize reachable objects into a new file, objects renumbered
    /// from 1.
    pub fn save(&self, options: &SaveOptions) -> FileResult<Vec<u8>> {
        self.root_id()?;
        let filters = self.filters();
        let file_id = options
            .file_id
            .map(|id| id.to_vec())
            .or_else(|| self.file_id().map(<[u8]>::to_vec))
            .unwrap_or_else(random_file_id);
        let security = options
            .encryption
            .as_ref()
            .map(|e| SecurityHandler::create(e, &file_id))
            .transpose()?;
        let compress = options.object_streams && security.is_none();

        let mut collector = Collector::new(self);
        let mut trailer = Dictionary::new();
        for (k, v) in self.trailer().iter() {
            if TRAILER_SKIP_KEYS.iter().any(|key| k == key) {
                continue;
            }
            let v = match v {
                Object::Dictionary(_) if k == "Info" => {
                    let v = collector.relink_children(v)?;
                    collector.promote(v)
                }
                _ => collector.relink(v)?,
            };
            trailer.insert(k.clone(), v);
        }
        collector.collect()?;
        let mut objects = collector.objects;

        // grouped objects numbered before standalone ones
        let (members, standalone): (Vec<usize>, Vec<usize>) = (0..objects.len())
            .partition(|&i| compress && !matches!(objects[i], Object::Stream(_)));
        let mut map = vec![0u32; objects.len() + 1];
        for (new, old) in members.iter().chain(&standalone).enumerate() {
            map[old + 1] = new as u32 + 1;
        }
        objects.iter_mut().for_each(|o| renumber(o, &map));
        trailer.values_mut().for_each(|o| renumber(o, &map));
        let mut take = |i: usize| mem::replace(&mut objects[i], Object::Null);
        let members: Vec<Object> = members.into_iter().map(&mut take).collect();
        let standalone: Vec<Object> = standalone.into_iter().map(&mut take).collect();
        debug!(
            "save {} objects, {} in object streams",
            members.len() + standalone.len(),
            members.len()
        );

        let mut w = ByteWriter::new();
        w.write_str(&format!("%PDF-{}\n", self.header_version()));
        w.write_bytes(b"%\xE2\xE3\xCF\xD3\n");
        let mut entries = BTreeMap::from([(0, Entry::FREE_HEAD)]);
        let mut next = (members.len() + standalone.len()) as u32 + 1;

        let max = options.max_objects_per_stream.max(1);
        for (chunk_idx, chunk) in members.chunks(max).enumerate() {
            let container = next;
            next += 1;
            let mut builder = ObjectStreamBuilder::new();
            for (i, o) in chunk.iter().enumerate() {
                let number = (chunk_idx * max + i) as u32 + 1;
                builder.push(number, &object_to_bytes(o, filters)?);
                entries.insert(
                    number,
                    Entry::Compressed {
                        container,
                        index: i as u32,
                    },
                );
            }
            let offset = ObjectWriter::new(&mut w, filters)
                .write_indirect(ObjectId::new(container, 0), &builder.finish().into())?;
            entries.insert(container, Entry::InUse { offset: offset_u32(offset)?, generation: 0 });
        }

        let first_standalone = members.len() as u32 + 1;
        for (i, mut o) in standalone.into_iter().enumerate() {
            let id = ObjectId::new(first_standalone + i as u32, 0);
            if let Some((handler, _)) = &security {
                handler.encrypt_object(id, &mut o, filters)?;
            }
            let offset = ObjectWriter::new(&mut w, filters).write_indirect(id, &o)?;
            entries.insert(id.number(), Entry::InUse { offset: offset_u32(offset)?, generation: 0 });
        }

        if let Some((_, encrypt)) = security {
            let id = ObjectId::new(next, 0);
            next += 1;
            let offset = ObjectWriter::new(&mut w, filters).write_indirect(id, &encrypt.into())?;
            entries.insert(id.number(), Entry::InUse { offset: offset_u32(offset)?, generation: 0 });
            trailer.set("Encrypt", id);
        }
        let id = PdfString::new(file_id);
        trailer.set("ID", vec![Object::from(id.clone()), id.into()]);

        let xref_pos = if compress {
            trailer.set("Size", next + 1);
            write_xref_stream(&mut w, ObjectId::new(next, 0), entries, trailer, filters)?
        } else {
            trailer.set("Size", next);
            write_xref_table(&mut w, &group_sections(entries), &trailer, filters)?
        };
        write_footer(&mut w, xref_pos);
        Ok(w.into_inner())
    }

    /// Append changed objects and a new xref section to the original file.
    /// Document without a source file is fully saved.
    pub fn save_incremental(&self) -> FileResult<Vec<u8>> {
        let Some(newest) = self.frames().newest() else {
            return self.save(&SaveOptions::default());
        };
        let deleted: Vec<(u32, u16)> = self.deleted().collect();
        if self.modified().next().is_none() && deleted.is_empty() {
            return Ok(self.buf().to_vec());
        }
        let filters = self.filters();

        let mut next = self.next_number();
        let mut pending = vec![];
        for number in self.modified() {
            if let Some(id) = self.object_id(number) {
                pending.push((id, self.resolve(id)?.clone()));
            }
        }
        let mut objects = vec![];
        while let Some((id, mut o)) = pending.pop() {
            extract_inline_streams(&mut o, &mut next, &mut pending);
            objects.push((id, o));
        }
        objects.sort_by_key(|(id, _)| id.number());

        let mut w = ByteWriter::with_prefix(self.buf().to_vec());
        if !self.buf().ends_with(b"\n") {
            w.write_u8(b'\n');
        }
        let mut entries = BTreeMap::new();
        for (id, mut o) in objects {
            if let Some(handler) = self.security() {
                let is_xref = o.opt_dict().is_some_and(|d| d.is_type("XRef"));
                if self.encrypt_id() != Some(id) && !is_xref {
                    handler.encrypt_object(id, &mut o, filters)?;
                }
            }
            let offset = ObjectWriter::new(&mut w, filters).write_indirect(id, &o)?;
            entries.insert(
                id.number(),
                Entry::InUse {
                    offset: offset_u32(offset)?,
                    generation: id.generation(),
                },
            );
        }

        // deleted objects chained into free list from object 0
        if let Some(&(first, _)) = deleted.first() {
            entries.insert(
                0,
                Entry::Free {
                    next: first,
                    generation: 65535,
                },
            );
            for (i, &(number, generation)) in deleted.iter().enumerate() {
                entries.insert(
                    number,
                    Entry::Free {
                        next: deleted.get(i + 1).map_or(0, |d| d.0),
                        generation: generation.saturating_add(1),
                    },
                );
            }
        }

        let mut trailer = self.trailer().clone();
        trailer.set("Prev", newest.xref_pos);
        let size = next.max(self.frames().size());
        debug!(
            "incremental save {} objects, prev xref at {}",
            entries.len(),
            newest.xref_pos
        );
        let xref_pos = if newest.is_stream {
            trailer.set("Size", size.saturating_add(1));
            write_xref_stream(&mut w, ObjectId::new(size, 0), entries, trailer, filters)?
        } else {
            trailer.set("Size", size);
            write_xref_table(&mut w, &group_sections(entries), &trailer, filters)?
        };
        write_footer(&mut w, xref_pos);
        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests;
