//! Document object store: revision chain, lazily resolved object cache and
//! decryption context.
use crate::{
    cursor::CursorError,
    filter::FilterRegistry,
    object::{
        Dictionary, Entry, FrameSet, Name, Object, ObjectId, ObjectValueError, KEY_TYPE,
    },
    parser::{error_offset, find_header, parse_frame_set, parse_indirect_object, ParseError},
};
use ahash::{HashMap, HashMapExt};
use log::{info, warn};
use once_cell::unsync::OnceCell;
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
};

pub(crate) mod encrypt;
pub use encrypt::{Authorization, Cipher, EncryptionOptions, Permissions, SecurityHandler};
mod object_stream;
pub use object_stream::{ObjectStream, ObjectStreamBuilder};

/// Max hops of reference to reference chain.
const MAX_DEREF_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("format error: {0}")]
    Format(String),
    #[error("password authentication failed")]
    Authentication,
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("password contains non-ASCII characters")]
    InvalidPassword,
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),
    #[error(transparent)]
    ObjectValue(#[from] ObjectValueError),
    #[error(transparent)]
    Cursor(#[from] CursorError),
}

pub type FileResult<T> = Result<T, FileError>;

impl FileError {
    /// Format error at the position where nom failed, `input` starts at
    /// byte `start` of the file.
    pub(crate) fn parse(start: usize, input: &[u8], e: nom::Err<ParseError<'_>>) -> Self {
        let pos = start + error_offset(input, &e);
        FileError::Format(format!("parse error at {pos}"))
    }
}

/// Options of `Document::open_with()`.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub password: Option<String>,
    pub filters: FilterRegistry,
}

impl OpenOptions {
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }
}

/// Object number slot, `entry` is None for objects created in memory.
#[derive(Debug)]
struct Slot {
    generation: u16,
    entry: Option<Entry>,
    object: OnceCell<Object>,
}

impl Slot {
    fn loaded(generation: u16, o: Object) -> Self {
        Self {
            generation,
            entry: None,
            object: OnceCell::with_value(o),
        }
    }
}

/// Pdf document. Objects are parsed on first `resolve()` and cached, the
/// same id always resolves to the same instance.
pub struct Document {
    buf: Vec<u8>,
    version: String,
    frames: FrameSet,
    trailer: Dictionary,
    slots: HashMap<u32, Slot>,
    object_streams: HashMap<u32, OnceCell<ObjectStream>>,
    /// Object numbers being loaded, innermost last.
    loading: RefCell<Vec<u32>>,
    /// Array elements waiting to be resolved.
    pending: RefCell<Vec<ObjectId>>,
    encrypt_id: Option<ObjectId>,
    security: Option<SecurityHandler>,
    filters: FilterRegistry,
    modified: BTreeSet<u32>,
    /// Deleted object number to its generation.
    deleted: BTreeMap<u32, u16>,
    next_number: u32,
    null: Object,
}

impl Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version)
            .field("revisions", &self.frames.iter().count())
            .field("objects", &self.slots.len())
            .field("authorization", &self.authorization())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document of a catalog and an empty page tree.
    pub fn new() -> Self {
        let catalog = Dictionary::new()
            .with(KEY_TYPE, Name::from("Catalog"))
            .with("Pages", ObjectId::new(2, 0));
        let pages = Dictionary::new()
            .with(KEY_TYPE, Name::from("Pages"))
            .with("Kids", Vec::<Object>::new())
            .with("Count", 0);
        let mut slots = HashMap::with_capacity(2);
        slots.insert(1, Slot::loaded(0, catalog.into()));
        slots.insert(2, Slot::loaded(0, pages.into()));

        Self {
            buf: vec![],
            version: "1.7".to_owned(),
            frames: FrameSet::default(),
            trailer: Dictionary::new()
                .with("Root", ObjectId::new(1, 0))
                .with("Size", 3),
            slots,
            object_streams: HashMap::new(),
            loading: RefCell::new(vec![]),
            pending: RefCell::new(vec![]),
            encrypt_id: None,
            security: None,
            filters: FilterRegistry::default(),
            modified: BTreeSet::from([1, 2]),
            deleted: BTreeMap::new(),
            next_number: 3,
            null: Object::Null,
        }
    }

    /// Open document, `password` used for encrypted document, empty
    /// password tried if None.
    pub fn open(buf: impl Into<Vec<u8>>, password: Option<&str>) -> FileResult<Self> {
        Self::open_with(
            buf,
            OpenOptions {
                password: password.map(str::to_owned),
                ..Default::default()
            },
        )
    }

    pub fn open_with(buf: impl Into<Vec<u8>>, options: OpenOptions) -> FileResult<Self> {
        let buf = buf.into();
        let (_, version) = find_header(&buf)?;
        let frames = parse_frame_set(&buf, &options.filters)?;
        let trailer = frames.trailer();

        let entry_count = frames
            .iter()
            .flat_map(|f| &f.sections)
            .map(|s| s.entries.len())
            .sum::<usize>();
        let mut slots = HashMap::with_capacity(entry_count);
        let mut object_streams = HashMap::new();
        for (number, entry) in frames.iter().flat_map(|f| f.entries()) {
            if number == 0 || slots.contains_key(&number) {
                continue;
            }
            if let Entry::Compressed { container, .. } = entry {
                object_streams.entry(container).or_insert_with(OnceCell::new);
            }
            slots.insert(
                number,
                Slot {
                    generation: entry.generation(),
                    entry: Some(entry),
                    object: OnceCell::new(),
                },
            );
        }
        let next_number = slots
            .keys()
            .max()
            .map_or(1, |n| n + 1)
            .max(frames.size())
            .max(1);
        info!(
            "opened pdf {version}, {} revisions, {} objects",
            frames.iter().count(),
            slots.len()
        );

        let mut doc = Self {
            buf,
            version,
            frames,
            trailer,
            slots,
            object_streams,
            loading: RefCell::new(vec![]),
            pending: RefCell::new(vec![]),
            encrypt_id: None,
            security: None,
            filters: options.filters,
            modified: BTreeSet::new(),
            deleted: BTreeMap::new(),
            next_number,
            null: Object::Null,
        };
        doc.open_security(options.password.as_deref().unwrap_or_default())?;
        Ok(doc)
    }

    fn open_security(&mut self, password: &str) -> FileResult<()> {
        let encrypt = match self.trailer.get_value("Encrypt") {
            None | Some(Object::Null) => return Ok(()),
            Some(Object::Reference(id)) => {
                let id = *id;
                self.encrypt_id = Some(id);
                // parsed without caching, handler not ready yet
                match self.slots.get(&id.number()).and_then(|s| s.entry) {
                    Some(entry) if !entry.is_free() => self.load(id, entry)?.into_dict()?,
                    _ => return Err(FileError::Format(format!("encrypt object {id} not found"))),
                }
            }
            Some(o) => o.dict()?.clone(),
        };
        let doc_id = self.file_id().unwrap_or_default().to_vec();
        self.security = Some(SecurityHandler::open(
            &encrypt,
            &doc_id,
            password.as_bytes(),
        )?);
        Ok(())
    }

    /// Resolve indirect object. Missing object or object of other
    /// generation resolves to `Object::Null`.
    pub fn resolve(&self, id: ObjectId) -> FileResult<&Object> {
        let r = self.resolve_slot(id)?;
        if self.loading.borrow().is_empty() {
            self.resolve_pending();
        }
        Ok(r)
    }

    fn resolve_slot(&self, id: ObjectId) -> FileResult<&Object> {
        let Some(slot) = self.slots.get(&id.number()) else {
            warn!("object {id} not found, resolved as null");
            return Ok(&self.null);
        };
        if let Some(o) = slot.object.get() {
            return Ok(self.check_generation(id, slot, o));
        }

        let entry = match slot.entry {
            None | Some(Entry::Free { .. }) => return Ok(&self.null),
            Some(entry) => entry,
        };
        if slot.generation != id.generation() {
            warn!("object {id} generation not match {}", slot.generation);
            return Ok(&self.null);
        }
        if self.loading.borrow().contains(&id.number()) {
            return Err(FileError::Format(format!(
                "object {id} references itself while loading"
            )));
        }
        let o = slot.object.get_or_try_init(|| self.load(id, entry))?;
        self.pending.borrow_mut().extend(array_references(o));
        Ok(o)
    }

    fn check_generation<'a>(&'a self, id: ObjectId, slot: &Slot, o: &'a Object) -> &'a Object {
        if slot.generation == id.generation() {
            o
        } else {
            warn!("object {id} generation not match {}", slot.generation);
            &self.null
        }
    }

    /// Resolve objects referenced by array elements, errors are logged and
    /// ignored.
    fn resolve_pending(&self) {
        loop {
            let Some(id) = self.pending.borrow_mut().pop() else {
                break;
            };
            if let Err(e) = self.resolve_slot(id) {
                warn!("failed to resolve array element {id}: {e}");
            }
        }
    }

    fn load(&self, id: ObjectId, entry: Entry) -> FileResult<Object> {
        self.loading.borrow_mut().push(id.number());
        let r = self.load_entry(id, entry);
        self.loading.borrow_mut().pop();
        r
    }

    fn load_entry(&self, id: ObjectId, entry: Entry) -> FileResult<Object> {
        match entry {
            Entry::Free { .. } => Ok(Object::Null),
            Entry::InUse { offset, .. } => {
                let start = offset as usize;
                let input = self.buf.get(start..).ok_or_else(|| {
                    FileError::Format(format!("object {id} offset {offset} out of file"))
                })?;
                let resolve_length = |id: ObjectId| {
                    self.resolve_slot(id)
                        .ok()
                        .and_then(Object::opt_int)
                        .and_then(|v| u32::try_from(v).ok())
                };
                let (_, (parsed_id, mut o)) = parse_indirect_object(input, &resolve_length)
                    .map_err(|e| FileError::parse(start, input, e))?;
                if parsed_id != id {
                    return Err(FileError::Format(format!(
                        "expect object {id} at {offset}, but found {parsed_id}"
                    )));
                }
                if let Some(security) = &self.security {
                    if self.encrypt_id != Some(id) && !is_xref_stream(&o) {
                        security.decrypt_object(id, &mut o)?;
                    }
                }
                Ok(o)
            }
            Entry::Compressed { container, index } => {
                let (number, o) = self.object_stream(container)?.get(index)?;
                if number != id.number() {
                    warn!("object stream {container} index {index} is object {number}, expect {id}");
                }
                Ok(o)
            }
        }
    }

    fn object_stream(&self, container: u32) -> FileResult<&ObjectStream> {
        let cell = self
            .object_streams
            .get(&container)
            .ok_or_else(|| FileError::Format(format!("object stream {container} not found")))?;
        if let Some(s) = cell.get() {
            return Ok(s);
        }
        if self.loading.borrow().contains(&container) {
            return Err(FileError::Format(format!(
                "object stream {container} references itself while loading"
            )));
        }
        cell.get_or_try_init(|| {
            let o = self.resolve_slot(ObjectId::new(container, 0))?;
            let s = o.opt_stream().ok_or_else(|| {
                FileError::Format(format!("object stream {container} is not a stream"))
            })?;
            ObjectStream::parse(s.dict(), s.decoded(&self.filters)?.to_vec())
        })
    }

    /// Follow references until non-reference object.
    pub fn deref<'a>(&'a self, o: &'a Object) -> FileResult<&'a Object> {
        let mut o = o;
        for _ in 0..MAX_DEREF_DEPTH {
            match o {
                Object::Reference(id) => o = self.resolve(*id)?,
                _ => return Ok(o),
            }
        }
        Err(FileError::Format("reference chain too long".into()))
    }

    /// Dictionary value, reference resolved. Return None if key not exist or
    /// value is null.
    pub fn get<'a>(&'a self, d: &'a Dictionary, key: &str) -> FileResult<Option<&'a Object>> {
        match d.get_value(key) {
            None => Ok(None),
            Some(o) => self.deref(o).map(|o| (!o.is_null()).then_some(o)),
        }
    }

    /// Like `get()`, value must be a dictionary or stream.
    pub fn get_dict<'a>(&'a self, d: &'a Dictionary, key: &str) -> FileResult<Option<&'a Dictionary>> {
        Ok(self.get(d, key)?.map(Object::dict).transpose()?)
    }

    /// Mutable object, the object will be written by incremental save.
    pub fn get_mut(&mut self, id: ObjectId) -> FileResult<&mut Object> {
        self.resolve(id)?;
        let slot = self
            .slots
            .get_mut(&id.number())
            .filter(|s| {
                s.generation == id.generation() && !matches!(s.entry, Some(Entry::Free { .. }))
            })
            .ok_or(FileError::ObjectNotFound(id))?;
        let o = slot.object.get_mut().ok_or(FileError::ObjectNotFound(id))?;
        self.modified.insert(id.number());
        Ok(o)
    }

    /// Add new indirect object.
    pub fn add_object(&mut self, o: impl Into<Object>) -> ObjectId {
        let number = self.next_number;
        self.next_number += 1;
        self.slots.insert(number, Slot::loaded(0, o.into()));
        self.modified.insert(number);
        self.trailer.set("Size", self.next_number);
        ObjectId::new(number, 0)
    }

    /// Replace object, or add it if `id` is a free slot.
    pub fn set_object(&mut self, id: ObjectId, o: impl Into<Object>) {
        self.slots.insert(id.number(), Slot::loaded(id.generation(), o.into()));
        self.deleted.remove(&id.number());
        self.modified.insert(id.number());
        if id.number() >= self.next_number {
            self.next_number = id.number().saturating_add(1);
            self.trailer.set("Size", self.next_number);
        }
    }

    /// Remove object, references to it resolve to null.
    pub fn delete_object(&mut self, id: ObjectId) -> FileResult<()> {
        match self.slots.get(&id.number()) {
            Some(slot) if slot.generation == id.generation() => {
                self.slots.remove(&id.number());
                self.modified.remove(&id.number());
                self.deleted.insert(id.number(), id.generation());
                Ok(())
            }
            _ => Err(FileError::ObjectNotFound(id)),
        }
    }

    /// Current object id of the slot, None if object number not used.
    pub fn object_id(&self, number: u32) -> Option<ObjectId> {
        self.slots
            .get(&number)
            .filter(|s| !matches!(s.entry, Some(Entry::Free { .. })))
            .map(|s| ObjectId::new(number, s.generation))
    }

    /// Ids of all objects, free slots excluded, sorted by object number.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut r: Vec<_> = self.slots.keys().filter_map(|n| self.object_id(*n)).collect();
        r.sort();
        r
    }

    /// Trailer merged from all revisions.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn trailer_mut(&mut self) -> &mut Dictionary {
        &mut self.trailer
    }

    pub fn root_id(&self) -> FileResult<ObjectId> {
        self.trailer
            .get_value("Root")
            .and_then(Object::opt_reference)
            .ok_or_else(|| FileError::Format("Root of trailer not found".into()))
    }

    /// Document catalog.
    pub fn root(&self) -> FileResult<&Dictionary> {
        Ok(self.resolve(self.root_id()?)?.dict()?)
    }

    /// Document information dictionary.
    pub fn info(&self) -> FileResult<Option<&Dictionary>> {
        self.get_dict(&self.trailer, "Info")
    }

    /// First part of trailer `ID`.
    pub fn file_id(&self) -> Option<&[u8]> {
        self.trailer
            .get_value("ID")
            .and_then(Object::opt_arr)
            .and_then(|arr| arr.first())
            .and_then(Object::opt_string)
            .map(|s| s.as_bytes())
    }

    pub fn encrypt_dict(&self) -> FileResult<Option<&Dictionary>> {
        self.get_dict(&self.trailer, "Encrypt")
    }

    /// Header version, or catalog `Version` if it is newer.
    pub fn version(&self) -> String {
        fn parse(s: &str) -> Option<(u32, u32)> {
            let (major, minor) = s.split_once('.')?;
            Some((major.parse().ok()?, minor.parse().ok()?))
        }

        let catalog_ver = self
            .root()
            .ok()
            .and_then(|root| root.get_name("Version").ok().flatten())
            .map(|n| n.as_str().into_owned());
        match catalog_ver {
            Some(v) if parse(&v) > parse(&self.version) => v,
            _ => self.version.clone(),
        }
    }

    /// Version of the file header.
    pub fn header_version(&self) -> &str {
        &self.version
    }

    pub fn is_encrypted(&self) -> bool {
        self.security.is_some()
    }

    pub fn authorization(&self) -> Authorization {
        self.security
            .as_ref()
            .map_or(Authorization::None, SecurityHandler::authorization)
    }

    pub fn permissions(&self) -> Permissions {
        self.security
            .as_ref()
            .map_or(Permissions::all(), SecurityHandler::permissions)
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub(crate) fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn frames(&self) -> &FrameSet {
        &self.frames
    }

    pub(crate) fn security(&self) -> Option<&SecurityHandler> {
        self.security.as_ref()
    }

    pub(crate) fn encrypt_id(&self) -> Option<ObjectId> {
        self.encrypt_id
    }

    pub(crate) fn next_number(&self) -> u32 {
        self.next_number
    }

    /// Objects modified or added since open.
    pub(crate) fn modified(&self) -> impl Iterator<Item = u32> + '_ {
        self.modified.iter().copied()
    }

    pub(crate) fn deleted(&self) -> impl Iterator<Item = (u32, u16)> + '_ {
        self.deleted.iter().map(|(n, g)| (*n, *g))
    }
}

fn is_xref_stream(o: &Object) -> bool {
    matches!(o, Object::Stream(s) if s.dict().is_type("XRef"))
}

/// References that are elements of arrays nested in `o`.
fn array_references(o: &Object) -> Vec<ObjectId> {
    fn walk(o: &Object, r: &mut Vec<ObjectId>) {
        match o {
            Object::Array(arr) => {
                for v in arr {
                    match v {
                        Object::Reference(id) => r.push(*id),
                        _ => walk(v, r),
                    }
                }
            }
            Object::Dictionary(d) => d.values().for_each(|v| walk(v, r)),
            Object::Stream(s) => s.dict().values().for_each(|v| walk(v, r)),
            _ => {}
        }
    }

    let mut r = vec![];
    walk(o, &mut r);
    r
}
