use std::fmt;

use log::debug;

use crate::codec::{Entry, RefField};
use crate::{Result, TransplantError};

/// Byte offset of a record, measured from the start of the entry-table
/// region. Zero is the "no reference" sentinel.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RefOffset(u32);

impl RefOffset {
    pub const NULL: RefOffset = RefOffset(0);

    pub const fn new(raw: u32) -> Self {
        RefOffset(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset of the record at `index`. `None` if it does not fit in 32 bits.
    pub fn from_index(index: usize, entry_size: usize) -> Option<Self> {
        index
            .checked_mul(entry_size)
            .and_then(|off| u32::try_from(off).ok())
            .map(RefOffset)
    }

    /// Index of the referenced record, or `None` for the null sentinel and
    /// offsets that fall between records.
    pub fn index(self, entry_size: usize) -> Option<usize> {
        let off = self.0 as usize;
        if self.is_null() || entry_size == 0 || off % entry_size != 0 {
            return None;
        }
        Some(off / entry_size)
    }

    fn shifted(self, delta: u32) -> Option<Self> {
        if self.is_null() {
            return Some(self);
        }
        self.0.checked_add(delta).map(RefOffset)
    }
}

impl fmt::Display for RefOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// A reference that a relocation at a given insertion point would leave
/// pointing at the wrong record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RelocationHazard {
    pub entry: usize,
    pub field: RefField,
    pub offset: RefOffset,
    /// `true` when an unmoved record points at or past the insertion point,
    /// `false` when a moved record points below it.
    pub forward: bool,
}

impl fmt::Display for RelocationHazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.forward {
            "unmoved entry points past the insertion point"
        } else {
            "moved entry points before the insertion point"
        };
        write!(
            f,
            "entry {} {} -> {} ({})",
            self.entry, self.field, self.offset, direction
        )
    }
}

/// Ordered, index-addressed sequence of decoded records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTable<E> {
    entries: Vec<E>,
}

impl<E: Entry> EntryTable<E> {
    pub fn from_entries(entries: Vec<E>) -> Self {
        EntryTable { entries }
    }

    /// Decode `count` consecutive records from the start of `bytes`.
    pub fn load(bytes: &[u8], count: usize) -> Result<Self> {
        let needed = count.checked_mul(E::SIZE).ok_or(TransplantError::TruncatedInput {
            needed: usize::MAX,
            available: bytes.len(),
        })?;

        if bytes.len() < needed {
            return Err(TransplantError::TruncatedInput {
                needed,
                available: bytes.len(),
            });
        }

        let entries = bytes[..needed]
            .chunks_exact(E::SIZE)
            .map(E::decode)
            .collect::<Result<Vec<_>>>()?;

        Ok(EntryTable { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.entries.len() * E::SIZE
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Result<&E> {
        let len = self.entries.len();
        self.entries
            .get(index)
            .ok_or(TransplantError::IndexOutOfRange { index, len })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut E> {
        let len = self.entries.len();
        self.entries
            .get_mut(index)
            .ok_or(TransplantError::IndexOutOfRange { index, len })
    }

    pub fn set(&mut self, index: usize, entry: E) -> Result<()> {
        *self.get_mut(index)? = entry;
        Ok(())
    }

    /// Insert `entry` before position `index`. References are not touched;
    /// call [`EntryTable::relocate_references`] once the batch is complete.
    pub fn insert_at(&mut self, index: usize, entry: E) -> Result<()> {
        if index > self.entries.len() {
            return Err(TransplantError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        self.entries.insert(index, entry);
        Ok(())
    }

    /// Insert `entries` at consecutive positions starting at `index`, in the
    /// order given. Returns how many were inserted.
    pub fn insert_batch<I>(&mut self, index: usize, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = E>,
    {
        if index > self.entries.len() {
            return Err(TransplantError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        let before = self.entries.len();
        self.entries.splice(index..index, entries);
        Ok(self.entries.len() - before)
    }

    /// Shift every non-null reference held by records that sat at or after
    /// `insertion_index` before the batch of `inserted_count` records was
    /// inserted. Must run exactly once per batch.
    pub fn relocate_references(
        &mut self,
        insertion_index: usize,
        inserted_count: usize,
        entry_size: usize,
    ) -> Result<()> {
        if inserted_count == 0 || E::REFERENCE_FIELDS.is_empty() {
            return Ok(());
        }

        let len = self.entries.len();
        let first_moved = insertion_index
            .checked_add(inserted_count)
            .filter(|&first| first <= len)
            .ok_or(TransplantError::IndexOutOfRange {
                index: insertion_index.saturating_add(inserted_count),
                len,
            })?;

        let delta = inserted_count
            .checked_mul(entry_size)
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| {
                TransplantError::Config(format!(
                    "relocation delta for {} entries of {} bytes exceeds the 32-bit offset range",
                    inserted_count, entry_size
                ))
            })?;

        let mut shifted = 0usize;
        for (index, entry) in self.entries.iter_mut().enumerate().skip(first_moved) {
            for &field in E::REFERENCE_FIELDS {
                let Some(reference) = entry.reference_mut(field) else {
                    continue;
                };
                if reference.is_null() {
                    continue;
                }
                let offset = reference.get();
                *reference = reference
                    .shifted(delta)
                    .ok_or(TransplantError::InconsistentReferences {
                        entry: index,
                        field,
                        offset,
                    })?;
                shifted += 1;
            }
        }

        debug!(
            "relocated {} {} reference(s) from entry {} by +0x{:X}",
            shifted,
            E::FORMAT,
            first_moved,
            delta
        );

        Ok(())
    }

    /// Every non-null reference held by the table, with its owner's index.
    pub fn references(&self) -> impl Iterator<Item = (usize, RefField, RefOffset)> + '_ {
        self.entries.iter().enumerate().flat_map(|(index, entry)| {
            E::REFERENCE_FIELDS
                .iter()
                .map(move |&field| (index, field, entry.reference(field)))
                .filter(|(_, _, reference)| !reference.is_null())
        })
    }

    /// Fail if any non-null reference lands between records or past the end
    /// of the table.
    pub fn check_references(&self) -> Result<()> {
        let len = self.entries.len();
        for (entry, field, reference) in self.references() {
            match reference.index(E::SIZE) {
                Some(target) if target < len => {}
                _ => {
                    return Err(TransplantError::InconsistentReferences {
                        entry,
                        field,
                        offset: reference.get(),
                    })
                }
            }
        }
        Ok(())
    }

    /// References that a relocation at `insertion_index` would not preserve.
    /// Run this on the table as it is before inserting.
    pub fn relocation_hazards(&self, insertion_index: usize) -> Vec<RelocationHazard> {
        let boundary = insertion_index as u64 * E::SIZE as u64;
        self.references()
            .filter_map(|(entry, field, offset)| {
                let points_past = u64::from(offset.get()) >= boundary;
                let moved = entry >= insertion_index;
                if moved != points_past {
                    Some(RelocationHazard {
                        entry,
                        field,
                        offset,
                        forward: points_past,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.byte_len()];
        for (entry, chunk) in self.entries.iter().zip(out.chunks_exact_mut(E::SIZE)) {
            entry.encode_into(chunk);
        }
        out
    }
}

impl<'a, E> IntoIterator for &'a EntryTable<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::expect_record_len;
    use byteorder::{ByteOrder, LittleEndian};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const NODE_SIZE: usize = 8;

    /// Minimal linked record: sibling and child offsets only.
    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Node {
        sibling: RefOffset,
        child: RefOffset,
    }

    impl Node {
        fn new(sibling: u32, child: u32) -> Self {
            Node {
                sibling: RefOffset::new(sibling),
                child: RefOffset::new(child),
            }
        }
    }

    impl Entry for Node {
        const SIZE: usize = NODE_SIZE;
        const FORMAT: &'static str = "NODE";
        const REFERENCE_FIELDS: &'static [RefField] = &[RefField::Sibling, RefField::Child];

        fn decode(bytes: &[u8]) -> Result<Self> {
            expect_record_len::<Self>(bytes)?;
            Ok(Node::new(
                LittleEndian::read_u32(&bytes[0..4]),
                LittleEndian::read_u32(&bytes[4..8]),
            ))
        }

        fn encode_into(&self, out: &mut [u8]) {
            LittleEndian::write_u32(&mut out[0..4], self.sibling.get());
            LittleEndian::write_u32(&mut out[4..8], self.child.get());
        }

        fn reference(&self, field: RefField) -> RefOffset {
            match field {
                RefField::Sibling => self.sibling,
                RefField::Child => self.child,
                _ => RefOffset::NULL,
            }
        }

        fn reference_mut(&mut self, field: RefField) -> Option<&mut RefOffset> {
            match field {
                RefField::Sibling => Some(&mut self.sibling),
                RefField::Child => Some(&mut self.child),
                _ => None,
            }
        }
    }

    fn off(index: usize) -> u32 {
        (index * NODE_SIZE) as u32
    }

    #[test]
    fn load_rejects_short_input() {
        let bytes = vec![0u8; NODE_SIZE * 3 - 1];
        match EntryTable::<Node>::load(&bytes, 3) {
            Err(TransplantError::TruncatedInput { needed, available }) => {
                assert_eq!(needed, 24);
                assert_eq!(available, 23);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn load_ignores_bytes_past_count() {
        let mut bytes = vec![0u8; NODE_SIZE * 2 + 5];
        LittleEndian::write_u32(&mut bytes[8..12], off(1));
        let table = EntryTable::<Node>::load(&bytes, 2).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().sibling.get(), off(1));
        assert_eq!(table.encode(), bytes[..16].to_vec());
    }

    #[test]
    fn get_and_set_are_bounds_checked() {
        let mut table = EntryTable::from_entries(vec![Node::new(0, 0); 2]);
        assert!(matches!(
            table.get(2),
            Err(TransplantError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(table.set(5, Node::new(0, 0)).is_err());
        table.set(1, Node::new(off(1), 0)).unwrap();
        assert_eq!(table.get(1).unwrap().sibling.get(), off(1));
    }

    #[test]
    fn insert_at_shifts_later_entries_without_relocating() {
        let mut table =
            EntryTable::from_entries(vec![Node::new(0, 0), Node::new(off(2), 0), Node::new(0, 0)]);
        table.insert_at(1, Node::new(0, off(1))).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(1).unwrap(), &Node::new(0, off(1)));
        // Insertion alone leaves offsets untouched.
        assert_eq!(table.get(2).unwrap(), &Node::new(off(2), 0));

        assert!(table.insert_at(6, Node::new(0, 0)).is_err());
        table.insert_at(4, Node::new(0, 0)).unwrap();
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn batch_keeps_given_order_at_consecutive_positions() {
        let mut table = EntryTable::from_entries(vec![Node::new(0, 0); 4]);
        let count = table
            .insert_batch(2, vec![Node::new(1, 0), Node::new(2, 0)])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(table.get(2).unwrap().sibling.get(), 1);
        assert_eq!(table.get(3).unwrap().sibling.get(), 2);
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn relocation_only_touches_moved_entries() {
        let mut table = EntryTable::from_entries(vec![
            Node::new(0, 0),
            Node::new(0, off(1)),
            Node::new(off(3), off(4)),
            Node::new(0, off(4)),
            Node::new(0, 0),
        ]);
        table
            .insert_batch(2, vec![Node::new(0, off(1)), Node::new(off(1), 0)])
            .unwrap();
        table.relocate_references(2, 2, NODE_SIZE).unwrap();

        let delta = 2 * NODE_SIZE as u32;
        assert_eq!(table.get(1).unwrap(), &Node::new(0, off(1)));
        // Inserted entries keep their values.
        assert_eq!(table.get(2).unwrap(), &Node::new(0, off(1)));
        assert_eq!(table.get(3).unwrap(), &Node::new(off(1), 0));
        // Moved entries shift, zero sentinels stay zero.
        assert_eq!(table.get(4).unwrap(), &Node::new(off(3) + delta, off(4) + delta));
        assert_eq!(table.get(5).unwrap(), &Node::new(0, off(4) + delta));
        assert_eq!(table.get(6).unwrap(), &Node::new(0, 0));
        table.check_references().unwrap();
    }

    #[test]
    fn relocation_rejects_batch_past_end() {
        let mut table = EntryTable::from_entries(vec![Node::new(0, 0); 3]);
        assert!(matches!(
            table.relocate_references(2, 2, NODE_SIZE),
            Err(TransplantError::IndexOutOfRange { index: 4, len: 3 })
        ));
    }

    #[test]
    fn relocation_overflow_is_reported() {
        let mut table = EntryTable::from_entries(vec![Node::new(0, 0), Node::new(u32::MAX - 4, 0)]);
        table.insert_at(1, Node::new(0, 0)).unwrap();
        match table.relocate_references(1, 1, NODE_SIZE) {
            Err(TransplantError::InconsistentReferences { entry, field, .. }) => {
                assert_eq!(entry, 2);
                assert_eq!(field, RefField::Sibling);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn check_flags_misaligned_and_out_of_bounds() {
        let misaligned = EntryTable::from_entries(vec![Node::new(0, 0), Node::new(3, 0)]);
        assert!(matches!(
            misaligned.check_references(),
            Err(TransplantError::InconsistentReferences { entry: 1, offset: 3, .. })
        ));

        let dangling = EntryTable::from_entries(vec![Node::new(0, 0), Node::new(0, off(2))]);
        assert!(matches!(
            dangling.check_references(),
            Err(TransplantError::InconsistentReferences {
                entry: 1,
                field: RefField::Child,
                ..
            })
        ));
    }

    #[test]
    fn hazards_cover_both_directions() {
        let table = EntryTable::from_entries(vec![
            Node::new(0, 0),
            Node::new(off(3), 0), // unmoved, points past
            Node::new(0, off(1)), // unmoved, points back: fine
            Node::new(0, off(1)), // moved, points before
            Node::new(off(3), 0), // moved, points past: fine
        ]);
        let hazards = table.relocation_hazards(3);
        assert_eq!(hazards.len(), 2);
        assert_eq!(hazards[0].entry, 1);
        assert!(hazards[0].forward);
        assert_eq!(hazards[1].entry, 3);
        assert_eq!(hazards[1].field, RefField::Child);
        assert!(!hazards[1].forward);
    }

    #[test]
    fn randomized_relocation_preserves_logical_targets() {
        let mut rng = StdRng::seed_from_u64(0x5EED);

        for _ in 0..200 {
            let len = rng.gen_range(2..64usize);
            let at = rng.gen_range(1..=len);
            let inserted = rng.gen_range(1..4usize);

            // Every record only points inside its own half, so the table is
            // hazard-free for this insertion point.
            let pick = |rng: &mut StdRng, index: usize| -> u32 {
                let (lo, hi) = if index < at { (1, at) } else { (at, len) };
                if lo >= hi || rng.gen_bool(0.3) {
                    0
                } else {
                    off(rng.gen_range(lo..hi))
                }
            };
            let original: Vec<Node> = (0..len)
                .map(|i| {
                    let sibling = pick(&mut rng, i);
                    let child = pick(&mut rng, i);
                    Node::new(sibling, child)
                })
                .collect();

            let mut table = EntryTable::from_entries(original.clone());
            assert!(table.relocation_hazards(at).is_empty());
            table
                .insert_batch(at, vec![Node::new(0, 0); inserted])
                .unwrap();
            table.relocate_references(at, inserted, NODE_SIZE).unwrap();
            table.check_references().unwrap();
            assert_eq!(table.len(), len + inserted);

            let new_pos = |i: usize| if i < at { i } else { i + inserted };
            for (i, before) in original.iter().enumerate() {
                let after = table.get(new_pos(i)).unwrap();
                for field in [RefField::Sibling, RefField::Child] {
                    let old = before.reference(field);
                    let new = after.reference(field);
                    match old.index(NODE_SIZE) {
                        None => assert!(new.is_null()),
                        Some(target) => {
                            assert_eq!(new.index(NODE_SIZE), Some(new_pos(target)))
                        }
                    }
                }
            }
        }
    }
}
