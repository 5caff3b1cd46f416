use std::collections::HashMap;

use serde::Serialize;

use crate::unitrad::RawPage;

/// Availability of one holding, ordered by specificity: `Unknown` is the
/// bottom of the lattice and never overwrites a known status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Availability {
    Available,
    CheckedOut,
    ReservableOnly,
    Unknown,
}

impl Availability {
    /// Decode a wire status string. Anything unrecognized is `Unknown`.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "available" | "ok" | "in_stock" => Availability::Available,
            "checkedout" | "checked-out" | "checked_out" | "on_loan" => Availability::CheckedOut,
            "reservable" | "reservable-only" | "reserve_only" => Availability::ReservableOnly,
            _ => Availability::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != Availability::Unknown
    }

    /// Lattice join with a newer report: a known status is last-write-wins,
    /// `Unknown` never downgrades what is already known.
    pub fn refine(self, newer: Availability) -> Availability {
        if newer.is_known() {
            newer
        } else {
            self
        }
    }
}

/// One library's copy of an item, normalized from a raw fragment.
/// Immutable once emitted except for monotonic status refinement.
#[derive(Debug, Clone, Serialize)]
pub struct HoldingRecord {
    pub library_system: String,
    pub item_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    pub status: Availability,
}

impl HoldingRecord {
    /// Dedup key shared with [`AggregatedResult`].
    pub fn key(&self) -> (String, String) {
        (self.library_system.clone(), self.item_id.clone())
    }
}

/// Holdings accumulated over one search, keyed by (library system, item id).
///
/// Insertion order of first sight is preserved so identical replayed page
/// sequences serialize identically. Records are only added or refined,
/// never removed.
#[derive(Debug, Default)]
pub struct AggregatedResult {
    records: Vec<HoldingRecord>,
    index: HashMap<(String, String), usize>,
}

impl AggregatedResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one raw page. Pure in the functional sense: no effects beyond
    /// the returned value, and the input collection is consumed.
    pub fn merge(mut self, page: RawPage) -> Self {
        for fragment in page.fragments {
            let record = HoldingRecord {
                library_system: fragment.library_system,
                item_id: fragment.item_id,
                title: fragment.title,
                isbn: fragment.isbn,
                status: Availability::from_wire(&fragment.status),
            };
            match self.index.get(&record.key()).copied() {
                Some(at) => {
                    let existing = &mut self.records[at];
                    existing.status = existing.status.refine(record.status);
                    if existing.isbn.is_none() {
                        existing.isbn = record.isbn;
                    }
                }
                None => {
                    self.index.insert(record.key(), self.records.len());
                    self.records.push(record);
                }
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in first-seen order.
    pub fn records(&self) -> &[HoldingRecord] {
        &self.records
    }

    /// Consume the aggregate, yielding records in first-seen order.
    pub fn into_records(self) -> Vec<HoldingRecord> {
        self.records
    }
}
