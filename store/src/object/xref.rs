/// Largest object number accepted from a file.
pub const MAX_OBJECT_NUMBER: u32 = 8_388_607;

/// Location of an object number in one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// Slot not in use. `next` is the next free object number, `generation`
    /// the generation to use when the number is reused.
    Free { next: u32, generation: u16 },
    /// Stored as `N G obj ... endobj` at byte `offset`.
    InUse { offset: u32, generation: u16 },
    /// Stored at `index` of the object stream numbered `container`.
    Compressed { container: u32, index: u32 },
}

impl Entry {
    /// Head of free list, object number 0.
    pub const FREE_HEAD: Entry = Entry::Free {
        next: 0,
        generation: 65535,
    };

    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free { .. })
    }

    /// Generation number of the object, objects in object stream always 0.
    pub fn generation(&self) -> u16 {
        match self {
            Self::Free { generation, .. } | Self::InUse { generation, .. } => *generation,
            Self::Compressed { .. } => 0,
        }
    }

    /// Entry as xref stream record fields: (type, field 2, field 3).
    pub fn fields(&self) -> (u32, u32, u32) {
        match *self {
            Self::Free { next, generation } => (0, next, generation.into()),
            Self::InUse { offset, generation } => (1, offset, generation.into()),
            Self::Compressed { container, index } => (2, container, index),
        }
    }
}

/// Entries of a run of contiguous object numbers, starting at `start`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Section {
    pub start: u32,
    pub entries: Vec<Entry>,
}

impl Section {
    pub fn new(start: u32, entries: Vec<Entry>) -> Self {
        Self { start, entries }
    }

    /// One past the last object number of the section.
    pub fn end(&self) -> u32 {
        u32::try_from(self.entries.len())
            .ok()
            .and_then(|n| self.start.checked_add(n))
            .unwrap_or(u32::MAX)
    }

    pub fn get(&self, number: u32) -> Option<Entry> {
        number
            .checked_sub(self.start)
            .and_then(|idx| self.entries.get(idx as usize))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Entry)> + '_ {
        (self.start..self.end()).zip(self.entries.iter().copied())
    }
}

/// Bucket entries into sections of contiguous object numbers.
/// `entries` must be sorted by object number without duplicates.
pub fn group_sections(entries: impl IntoIterator<Item = (u32, Entry)>) -> Vec<Section> {
    let mut r: Vec<Section> = vec![];
    for (number, entry) in entries {
        match r.last_mut() {
            Some(section) if section.end() == number => section.entries.push(entry),
            _ => r.push(Section::new(number, vec![entry])),
        }
    }
    r
}
