use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::codec::Entry;
use crate::store::ContainerStore;
use crate::table::EntryTable;
use crate::{Result, TransplantError};

pub const HEADER_SIZE: usize = 0x14;
const LITTLE_ENDIAN_MARK: u16 = 0xFFFE;

/// Record types that live in their own signed container.
pub trait ContainerFormat: Entry {
    const SIGNATURE: [u8; 4];
}

/// Fixed header shared by the BAC and BCM containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub signature: [u8; 4],
    pub endianness: u16,
    pub header_size: u16,
    pub unk_08: u32,
    pub entry_count: u32,
    pub data_start: u32,
}

impl ContainerHeader {
    fn parse(raw: &[u8]) -> Self {
        let mut signature = [0u8; 4];
        signature.copy_from_slice(&raw[0..4]);
        ContainerHeader {
            signature,
            endianness: LittleEndian::read_u16(&raw[4..6]),
            header_size: LittleEndian::read_u16(&raw[6..8]),
            unk_08: LittleEndian::read_u32(&raw[8..12]),
            entry_count: LittleEndian::read_u32(&raw[12..16]),
            data_start: LittleEndian::read_u32(&raw[16..20]),
        }
    }

    fn write(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.signature);
        LittleEndian::write_u16(&mut out[4..6], self.endianness);
        LittleEndian::write_u16(&mut out[6..8], self.header_size);
        LittleEndian::write_u32(&mut out[8..12], self.unk_08);
        LittleEndian::write_u32(&mut out[12..16], self.entry_count);
        LittleEndian::write_u32(&mut out[16..20], self.data_start);
    }
}

/// A parsed container: header, the opaque bytes around the table, and the
/// table itself. Bytes outside the table are written back untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFile<E> {
    header: ContainerHeader,
    preamble: Vec<u8>,
    table: EntryTable<E>,
    trailer: Vec<u8>,
}

impl<E: ContainerFormat> ContainerFile<E> {
    /// Wrap a table in a minimal header with no preamble or trailer.
    pub fn from_table(table: EntryTable<E>) -> Self {
        ContainerFile {
            header: ContainerHeader {
                signature: E::SIGNATURE,
                endianness: LITTLE_ENDIAN_MARK,
                header_size: HEADER_SIZE as u16,
                unk_08: 0,
                entry_count: table.len() as u32,
                data_start: HEADER_SIZE as u32,
            },
            preamble: Vec::new(),
            table,
            trailer: Vec::new(),
        }
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(TransplantError::TruncatedInput {
                needed: HEADER_SIZE,
                available: raw.len(),
            });
        }

        let header = ContainerHeader::parse(raw);

        if header.signature != E::SIGNATURE {
            return Err(TransplantError::InvalidHeader {
                format: E::FORMAT,
                reason: format!(
                    "signature is {:?}, expected {:?}",
                    String::from_utf8_lossy(&header.signature),
                    String::from_utf8_lossy(&E::SIGNATURE)
                ),
            });
        }

        if header.endianness != LITTLE_ENDIAN_MARK {
            let reason = if header.endianness == LITTLE_ENDIAN_MARK.swap_bytes() {
                "big-endian files are not supported".to_string()
            } else {
                format!("unknown endianness mark 0x{:04X}", header.endianness)
            };
            return Err(TransplantError::InvalidHeader {
                format: E::FORMAT,
                reason,
            });
        }

        let data_start = header.data_start as usize;
        if data_start < HEADER_SIZE || data_start > raw.len() {
            return Err(TransplantError::InvalidHeader {
                format: E::FORMAT,
                reason: format!(
                    "data start 0x{:X} outside 0x{:X}..=0x{:X}",
                    data_start,
                    HEADER_SIZE,
                    raw.len()
                ),
            });
        }

        let table = EntryTable::load(&raw[data_start..], header.entry_count as usize)?;
        let table_end = data_start + table.byte_len();

        Ok(ContainerFile {
            header,
            preamble: raw[HEADER_SIZE..data_start].to_vec(),
            table,
            trailer: raw[table_end..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = self.header;
        header.entry_count = self.table.len() as u32;

        let mut out = vec![0u8; HEADER_SIZE];
        header.write(&mut out);
        out.extend_from_slice(&self.preamble);
        out.extend_from_slice(&self.table.encode());
        out.extend_from_slice(&self.trailer);
        out
    }

    pub fn load<S: ContainerStore + ?Sized>(store: &S, path: &Path) -> Result<Self> {
        let raw = store.load_file(path)?;
        let file = Self::from_bytes(&raw)?;
        debug!(
            "loaded {} \"{}\": {} entries, {} bytes",
            E::FORMAT,
            path.display(),
            file.entry_count(),
            raw.len()
        );
        Ok(file)
    }

    pub fn save<S: ContainerStore + ?Sized>(&self, store: &S, path: &Path) -> Result<()> {
        store.save_file(path, &self.to_bytes())
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn entry_count(&self) -> usize {
        self.table.len()
    }

    pub fn entry(&self, index: usize) -> Result<&E> {
        self.table.get(index)
    }

    pub fn table(&self) -> &EntryTable<E> {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut EntryTable<E> {
        &mut self.table
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bac::{BacFile, BAC_ENTRY_SIZE};
    use crate::bcm::BcmFile;
    use crate::store::MemoryStore;

    /// Assemble a little-endian container image.
    pub(crate) fn container_bytes(
        signature: &[u8; 4],
        count: u32,
        preamble: &[u8],
        records: &[u8],
        trailer: &[u8],
    ) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(signature);
        LittleEndian::write_u16(&mut out[4..6], LITTLE_ENDIAN_MARK);
        LittleEndian::write_u16(&mut out[6..8], HEADER_SIZE as u16);
        LittleEndian::write_u32(&mut out[8..12], 0x0102_0304);
        LittleEndian::write_u32(&mut out[12..16], count);
        LittleEndian::write_u32(&mut out[16..20], (HEADER_SIZE + preamble.len()) as u32);
        out.extend_from_slice(preamble);
        out.extend_from_slice(records);
        out.extend_from_slice(trailer);
        out
    }

    #[test]
    fn keeps_preamble_and_trailer() {
        let records = vec![0u8; BAC_ENTRY_SIZE * 2];
        let raw = container_bytes(b"#BAC", 2, &[1, 2, 3, 4], &records, &[0xEE; 7]);
        let file = BacFile::from_bytes(&raw).unwrap();
        assert_eq!(file.header().unk_08, 0x0102_0304);
        assert_eq!(file.header().data_start, 0x18);
        assert_eq!(file.to_bytes(), raw);
    }

    #[test]
    fn rejects_wrong_signature() {
        let raw = container_bytes(b"#BCM", 0, &[], &[], &[]);
        assert!(matches!(
            BacFile::from_bytes(&raw),
            Err(TransplantError::InvalidHeader { format: "BAC", .. })
        ));
    }

    #[test]
    fn rejects_big_endian_files() {
        let mut raw = container_bytes(b"#BCM", 0, &[], &[], &[]);
        LittleEndian::write_u16(&mut raw[4..6], 0xFEFF);
        match BcmFile::from_bytes(&raw) {
            Err(TransplantError::InvalidHeader { reason, .. }) => {
                assert!(reason.contains("big-endian"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn rejects_short_header_and_bad_data_start() {
        assert!(matches!(
            BacFile::from_bytes(&[0u8; 8]),
            Err(TransplantError::TruncatedInput { needed: HEADER_SIZE, available: 8 })
        ));

        let mut raw = container_bytes(b"#BAC", 0, &[], &[], &[]);
        LittleEndian::write_u32(&mut raw[16..20], 0x100);
        assert!(matches!(
            BacFile::from_bytes(&raw),
            Err(TransplantError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn declared_count_beyond_data_is_truncated() {
        let raw = container_bytes(b"#BAC", 3, &[], &vec![0u8; BAC_ENTRY_SIZE * 2], &[]);
        assert!(matches!(
            BacFile::from_bytes(&raw),
            Err(TransplantError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn entry_count_follows_table_on_save() {
        let raw = container_bytes(b"#BAC", 1, &[], &vec![0u8; BAC_ENTRY_SIZE], b"end");
        let mut file = BacFile::from_bytes(&raw).unwrap();
        let extra = file.entry(0).unwrap().clone();
        file.table_mut().insert_at(1, extra).unwrap();

        let out = file.to_bytes();
        assert_eq!(LittleEndian::read_u32(&out[12..16]), 2);
        assert_eq!(out.len(), raw.len() + BAC_ENTRY_SIZE);
        assert!(out.ends_with(b"end"));
    }

    #[test]
    fn load_and_save_go_through_the_store() {
        let store = MemoryStore::new();
        let path = Path::new("HUM_PLAYER.bac");
        assert!(matches!(
            BacFile::load(&store, path),
            Err(TransplantError::NotFound { .. })
        ));

        let raw = container_bytes(b"#BAC", 1, &[], &vec![0u8; BAC_ENTRY_SIZE], &[]);
        store.insert(path, raw.clone());
        let file = BacFile::load(&store, path).unwrap();
        file.save(&store, Path::new("copy.bac")).unwrap();
        assert_eq!(store.get(Path::new("copy.bac")), Some(raw));
    }
}
