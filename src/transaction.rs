use std::collections::BTreeMap;
use std::fmt;

use crate::{TbError, TbResult};

/// One handshake payload: an open set of named integer fields.
///
/// `next_delay` is driver metadata (idle cycles inserted after this
/// transaction's handshake), not a field, and does not take part in equality.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    fields: BTreeMap<String, u64>,
    pub next_delay: u32,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: &str, value: u64) {
        self.fields.insert(field.to_string(), value);
    }

    /// Builder form of [`Transaction::set`].
    pub fn with(mut self, field: &str, value: u64) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_next_delay(mut self, cycles: u32) -> Self {
        self.next_delay = cycles;
        self
    }

    pub fn get(&self, field: &str) -> TbResult<u64> {
        self.fields
            .get(field)
            .copied()
            .ok_or_else(|| TbError::MissingField {
                field: field.to_string(),
            })
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, u64)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Fails with both field dumps when `self` (observed) differs from `reference`.
    pub fn assert_equal_ref(&self, reference: &Transaction, path: &str) -> TbResult {
        if self == reference {
            Ok(())
        } else {
            Err(TbError::Mismatch {
                path: path.to_string(),
                uut: self.to_string(),
                reference: reference.to_string(),
            })
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Transaction {}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.fields.keys().map(|k| k.len()).max().unwrap_or(0);
        for (name, value) in self.fields.iter() {
            writeln!(f, "{} {}: 0x{:x}", name, " ".repeat(width - name.len()), value)?;
        }
        Ok(())
    }
}
