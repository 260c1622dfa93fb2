use std::fmt;

use crate::table::RefOffset;
use crate::{Result, TransplantError};

/// Link fields a record may carry towards other records of the same table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RefField {
    Sibling,
    Child,
    Parent,
    Root,
}

impl RefField {
    pub const ALL: [RefField; 4] = [
        RefField::Sibling,
        RefField::Child,
        RefField::Parent,
        RefField::Root,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RefField::Sibling => "sibling",
            RefField::Child => "child",
            RefField::Parent => "parent",
            RefField::Root => "root",
        }
    }
}

impl fmt::Display for RefField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixed-width record of an entry-table container.
///
/// `decode` and `encode_into` always work on slices of exactly `SIZE`
/// bytes, and `encode_into(decode(b))` reproduces `b`.
pub trait Entry: Clone {
    const SIZE: usize;
    /// Short name used in diagnostics ("BAC", "BCM").
    const FORMAT: &'static str;
    /// Reference fields carried by this record, in on-disk order.
    const REFERENCE_FIELDS: &'static [RefField] = &[];

    fn decode(bytes: &[u8]) -> Result<Self>;

    fn encode_into(&self, out: &mut [u8]);

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.encode_into(&mut out);
        out
    }

    fn reference(&self, _field: RefField) -> RefOffset {
        RefOffset::NULL
    }

    fn reference_mut(&mut self, _field: RefField) -> Option<&mut RefOffset> {
        None
    }
}

pub(crate) fn expect_record_len<E: Entry>(bytes: &[u8]) -> Result<()> {
    if bytes.len() != E::SIZE {
        return Err(TransplantError::MalformedEntry {
            format: E::FORMAT,
            reason: format!(
                "record is {} bytes, expected {}",
                bytes.len(),
                E::SIZE
            ),
        });
    }
    Ok(())
}
