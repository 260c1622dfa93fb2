use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::codec::{expect_record_len, Entry, RefField};
use crate::container::{ContainerFile, ContainerFormat};
use crate::table::RefOffset;
use crate::transplant::Rejection;
use crate::Result;

pub const BCM_ENTRY_SIZE: usize = 0x70;

const LEAD_SIZE: usize = 0x28;
const ACTIVATE_OFFSET: usize = 0x28;
const TAIL_START: usize = 0x2C;
const LINKS_OFFSET: usize = 0x60;
const TAIL_SIZE: usize = LINKS_OFFSET - TAIL_START;

/// One BCM input/condition record.
///
/// The four links are byte offsets from the start of the entry table; see
/// [`RefOffset`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BcmEntry {
    pub lead: [u8; LEAD_SIZE],
    pub bac_entry_to_activate: u32,
    pub tail: [u8; TAIL_SIZE],
    pub sibling: RefOffset,
    pub child: RefOffset,
    pub parent: RefOffset,
    pub root: RefOffset,
}

impl BcmEntry {
    pub fn new(bac_entry_to_activate: u32) -> Self {
        BcmEntry {
            lead: [0; LEAD_SIZE],
            bac_entry_to_activate,
            tail: [0; TAIL_SIZE],
            sibling: RefOffset::NULL,
            child: RefOffset::NULL,
            parent: RefOffset::NULL,
            root: RefOffset::NULL,
        }
    }
}

impl Entry for BcmEntry {
    const SIZE: usize = BCM_ENTRY_SIZE;
    const FORMAT: &'static str = "BCM";
    const REFERENCE_FIELDS: &'static [RefField] = &RefField::ALL;

    fn decode(bytes: &[u8]) -> Result<Self> {
        expect_record_len::<Self>(bytes)?;

        let mut lead = [0u8; LEAD_SIZE];
        lead.copy_from_slice(&bytes[..LEAD_SIZE]);
        let mut tail = [0u8; TAIL_SIZE];
        tail.copy_from_slice(&bytes[TAIL_START..LINKS_OFFSET]);

        let link = |i: usize| {
            let at = LINKS_OFFSET + i * 4;
            RefOffset::new(LittleEndian::read_u32(&bytes[at..at + 4]))
        };

        Ok(BcmEntry {
            lead,
            bac_entry_to_activate: LittleEndian::read_u32(&bytes[ACTIVATE_OFFSET..TAIL_START]),
            tail,
            sibling: link(0),
            child: link(1),
            parent: link(2),
            root: link(3),
        })
    }

    fn encode_into(&self, out: &mut [u8]) {
        out[..LEAD_SIZE].copy_from_slice(&self.lead);
        LittleEndian::write_u32(&mut out[ACTIVATE_OFFSET..TAIL_START], self.bac_entry_to_activate);
        out[TAIL_START..LINKS_OFFSET].copy_from_slice(&self.tail);
        for (i, field) in RefField::ALL.iter().enumerate() {
            let at = LINKS_OFFSET + i * 4;
            LittleEndian::write_u32(&mut out[at..at + 4], self.reference(*field).get());
        }
    }

    fn reference(&self, field: RefField) -> RefOffset {
        match field {
            RefField::Sibling => self.sibling,
            RefField::Child => self.child,
            RefField::Parent => self.parent,
            RefField::Root => self.root,
        }
    }

    fn reference_mut(&mut self, field: RefField) -> Option<&mut RefOffset> {
        Some(match field {
            RefField::Sibling => &mut self.sibling,
            RefField::Child => &mut self.child,
            RefField::Parent => &mut self.parent,
            RefField::Root => &mut self.root,
        })
    }
}

impl ContainerFormat for BcmEntry {
    const SIGNATURE: [u8; 4] = *b"#BCM";
}

pub type BcmFile = ContainerFile<BcmEntry>;

/// Which BCM records trigger the feature and where they go in a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BcmRules {
    pub min_entries: usize,
    /// Donor records to transplant, ascending and consecutive.
    pub control_entries: Vec<usize>,
    pub activation_target: u32,
    /// Position of the first transplanted record in the recipient.
    pub insert_at: usize,
}

impl Default for BcmRules {
    fn default() -> Self {
        BcmRules {
            min_entries: 5,
            control_entries: vec![3, 4],
            activation_target: 476,
            insert_at: 3,
        }
    }
}

impl BcmFile {
    fn check_min_entries(&self, rules: &BcmRules) -> std::result::Result<(), Rejection> {
        if self.entry_count() < rules.min_entries {
            return Err(Rejection::new(format!(
                "has less than {} entries ({})",
                rules.min_entries,
                self.entry_count()
            )));
        }
        Ok(())
    }

    fn activation_of(&self, index: usize) -> std::result::Result<u32, Rejection> {
        self.entry(index)
            .map(|entry| entry.bac_entry_to_activate)
            .map_err(|_| Rejection::new(format!("entry {} is missing", index)))
    }

    /// Gate for the character that already has the feature.
    pub fn qualifies_for_src(&self, rules: &BcmRules) -> std::result::Result<(), Rejection> {
        self.check_min_entries(rules)?;
        for &index in &rules.control_entries {
            if self.activation_of(index)? != rules.activation_target {
                return Err(Rejection::new(format!(
                    "bac entry to activate in entry {} is not {}",
                    index, rules.activation_target
                )));
            }
        }
        Ok(())
    }

    /// Gate for the character receiving the feature.
    pub fn qualifies_for_dst(&self, rules: &BcmRules) -> std::result::Result<(), Rejection> {
        self.check_min_entries(rules)?;
        for &index in &rules.control_entries {
            if self.activation_of(index)? == rules.activation_target {
                return Err(Rejection::new(format!(
                    "bac entry to activate in entry {} is already {}",
                    index, rules.activation_target
                )));
            }
        }
        Ok(())
    }

    /// Copy the donor's control records into this table and relocate the
    /// links of every record that moved. Returns the number inserted.
    pub fn graft_control_entries(&mut self, src: &BcmFile, rules: &BcmRules) -> Result<usize> {
        let grafted = rules
            .control_entries
            .iter()
            .map(|&index| src.entry(index).cloned())
            .collect::<Result<Vec<_>>>()?;

        let table = self.table_mut();
        let inserted = table.insert_batch(rules.insert_at, grafted)?;
        table.relocate_references(rules.insert_at, inserted, BCM_ENTRY_SIZE)?;
        table.check_references()?;

        Ok(inserted)
    }
}
