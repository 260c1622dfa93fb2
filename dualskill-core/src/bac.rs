use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::codec::{expect_record_len, Entry};
use crate::container::{ContainerFile, ContainerFormat};
use crate::transplant::Rejection;
use crate::{Result, TransplantError};

pub const BAC_ENTRY_SIZE: usize = 0x10;
const BAC_PAYLOAD_SIZE: usize = BAC_ENTRY_SIZE - 4;

/// One BAC action record. Records are independent of each other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BacEntry {
    pub valid: bool,
    pub payload: [u8; BAC_PAYLOAD_SIZE],
}

impl BacEntry {
    pub fn empty() -> Self {
        BacEntry {
            valid: false,
            payload: [0; BAC_PAYLOAD_SIZE],
        }
    }
}

impl Entry for BacEntry {
    const SIZE: usize = BAC_ENTRY_SIZE;
    const FORMAT: &'static str = "BAC";

    fn decode(bytes: &[u8]) -> Result<Self> {
        expect_record_len::<Self>(bytes)?;

        let valid = match LittleEndian::read_u32(&bytes[0..4]) {
            0 => false,
            1 => true,
            other => {
                return Err(TransplantError::MalformedEntry {
                    format: Self::FORMAT,
                    reason: format!("validity word is 0x{:X}, expected 0 or 1", other),
                })
            }
        };

        let mut payload = [0u8; BAC_PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[4..]);

        Ok(BacEntry { valid, payload })
    }

    fn encode_into(&self, out: &mut [u8]) {
        LittleEndian::write_u32(&mut out[0..4], u32::from(self.valid));
        out[4..BAC_ENTRY_SIZE].copy_from_slice(&self.payload);
    }
}

impl ContainerFormat for BacEntry {
    const SIGNATURE: [u8; 4] = *b"#BAC";
}

pub type BacFile = ContainerFile<BacEntry>;

/// Which BAC records carry the feature and how large a table must be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacRules {
    pub min_entries: usize,
    pub entries_to_copy: Vec<usize>,
}

impl Default for BacRules {
    fn default() -> Self {
        BacRules {
            min_entries: 477,
            entries_to_copy: vec![475, 476],
        }
    }
}

impl BacFile {
    fn check_min_entries(&self, rules: &BacRules) -> std::result::Result<(), Rejection> {
        if self.entry_count() < rules.min_entries {
            return Err(Rejection::new(format!(
                "has less than {} entries ({})",
                rules.min_entries,
                self.entry_count()
            )));
        }
        Ok(())
    }

    fn designated(&self, index: usize) -> std::result::Result<&BacEntry, Rejection> {
        self.entry(index)
            .map_err(|_| Rejection::new(format!("entry {} is missing", index)))
    }

    /// Gate for the character that already has the feature.
    pub fn qualifies_for_src(&self, rules: &BacRules) -> std::result::Result<(), Rejection> {
        self.check_min_entries(rules)?;
        for &index in &rules.entries_to_copy {
            if !self.designated(index)?.valid {
                return Err(Rejection::new(format!("entry {} is empty", index)));
            }
        }
        Ok(())
    }

    /// Gate for the character receiving the feature.
    pub fn qualifies_for_dst(&self, rules: &BacRules) -> std::result::Result<(), Rejection> {
        self.check_min_entries(rules)?;
        for &index in &rules.entries_to_copy {
            if self.designated(index)?.valid {
                return Err(Rejection::new(format!("entry {} is not empty", index)));
            }
        }
        Ok(())
    }

    /// Overwrite the designated records with the source's copies.
    pub fn copy_entries_from(&mut self, src: &BacFile, rules: &BacRules) -> Result<()> {
        for &index in &rules.entries_to_copy {
            let entry = src.entry(index)?.clone();
            self.table_mut().set(index, entry)?;
        }
        Ok(())
    }
}
