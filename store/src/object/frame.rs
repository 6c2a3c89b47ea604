use super::{Dictionary, Entry, Object, ObjectId, Section, MAX_OBJECT_NUMBER};
use log::warn;

/// One revision of the file: xref section and its trailer.
///
/// Each incremental update appends a new frame whose trailer points to the
/// previous one through `Prev`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub xref_pos: u32,
    pub trailer: Dictionary,
    pub sections: Vec<Section>,
    /// xref stored in stream form
    pub is_stream: bool,
}

fn opt_u32(d: &Dictionary, key: &str) -> Option<u32> {
    d.get_value(key)
        .and_then(Object::opt_int)
        .and_then(|v| u32::try_from(v).ok())
}

impl Frame {
    pub fn new(xref_pos: u32, trailer: Dictionary, sections: Vec<Section>) -> Self {
        Self {
            xref_pos,
            trailer,
            sections,
            is_stream: false,
        }
    }

    pub fn lookup(&self, number: u32) -> Option<Entry> {
        self.sections.iter().find_map(|s| s.get(number))
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, Entry)> + '_ {
        self.sections.iter().flat_map(Section::iter)
    }

    pub fn prev(&self) -> Option<u32> {
        opt_u32(&self.trailer, "Prev")
    }

    /// Offset of the xref stream of a hybrid-reference file.
    pub fn xref_stm(&self) -> Option<u32> {
        opt_u32(&self.trailer, "XRefStm")
    }

    /// Trailer `Size`, falls back to the end of the last section if missing
    /// or above `MAX_OBJECT_NUMBER`.
    pub fn size(&self) -> u32 {
        opt_u32(&self.trailer, "Size")
            .filter(|&size| {
                let valid = size <= MAX_OBJECT_NUMBER + 1;
                if !valid {
                    warn!("ignore trailer Size {size} of xref at {}", self.xref_pos);
                }
                valid
            })
            .unwrap_or_else(|| self.sections.iter().map(Section::end).max().unwrap_or(0))
    }
}

/// All revisions of a file, newest first.
#[derive(Debug, Clone, Default)]
pub struct FrameSet(Vec<Frame>);

impl FrameSet {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self(frames)
    }

    pub fn newest(&self) -> Option<&Frame> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.0.iter()
    }

    pub fn push_newest(&mut self, frame: Frame) {
        self.0.insert(0, frame);
    }

    /// Find entry of object number from newest revision to oldest.
    /// Object 0 not listed in any revision is the free list head.
    pub fn lookup(&self, number: u32) -> Option<Entry> {
        self.0
            .iter()
            .find_map(|f| f.lookup(number))
            .or((number == 0).then_some(Entry::FREE_HEAD))
    }

    /// Merged trailer, newer revision's keys win. Keys describing the xref
    /// itself are removed.
    pub fn trailer(&self) -> Dictionary {
        let mut r = Dictionary::new();
        for f in self.0.iter().rev() {
            for (k, v) in f.trailer.iter() {
                r.insert(k.clone(), v.clone());
            }
        }
        for key in [
            "Prev", "XRefStm", "Type", "W", "Index", "Length", "Filter", "DecodeParms",
        ] {
            r.remove_value(key);
        }
        r
    }

    /// Largest `Size` of all revisions.
    pub fn size(&self) -> u32 {
        self.0.iter().map(Frame::size).max().unwrap_or(0)
    }

    pub fn root_id(&self) -> Option<ObjectId> {
        self.0
            .iter()
            .find_map(|f| f.trailer.get_value("Root").and_then(Object::opt_reference))
    }
}
