/*!
 * Schema definitions for pharmacy, claims, and revert files
 *
 * Input files carry named columns (CSV headers or JSON object keys). This module
 * names the columns each record kind needs, the aliases tolerated for them, and
 * checks that a loaded table provides every required column.
 */

use std::collections::{BTreeMap, BTreeSet};

use crate::data_types::RecordKind;
use crate::error::{PipelineError, Result};

/// A row as read from a file: column name to trimmed, non-empty text value
pub type RawRow = BTreeMap<String, String>;

/// Column layout for one record kind
#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    pub kind: RecordKind,
    /// Columns that must be present in at least one loaded row
    pub required: &'static [&'static str],
    /// `(alias, canonical)` pairs folded into the canonical name on load
    pub aliases: &'static [(&'static str, &'static str)],
}

/// Pharmacy files; the identifier may be published as `id` or `npi`
pub const PHARMACY_SCHEMA: RecordSchema = RecordSchema {
    kind: RecordKind::Pharmacy,
    required: &["npi", "chain"],
    aliases: &[("id", "npi")],
};

/// Claims files
pub const CLAIM_SCHEMA: RecordSchema = RecordSchema {
    kind: RecordKind::Claim,
    required: &["id", "npi", "ndc", "quantity", "price"],
    aliases: &[],
};

/// Revert files
pub const REVERT_SCHEMA: RecordSchema = RecordSchema {
    kind: RecordKind::Revert,
    required: &["claim_id"],
    aliases: &[],
};

impl RecordSchema {
    /// Schema for a record kind
    pub fn for_kind(kind: RecordKind) -> &'static RecordSchema {
        match kind {
            RecordKind::Pharmacy => &PHARMACY_SCHEMA,
            RecordKind::Claim => &CLAIM_SCHEMA,
            RecordKind::Revert => &REVERT_SCHEMA,
        }
    }

    /// Fold aliased keys into their canonical names
    ///
    /// A canonical key already present wins over its alias.
    pub fn normalize_row(&self, mut row: RawRow) -> RawRow {
        for (alias, canonical) in self.aliases {
            if let Some(value) = row.remove(*alias) {
                row.entry(canonical.to_string()).or_insert(value);
            }
        }
        row
    }

    /// Check that every required column appears somewhere in the loaded rows
    ///
    /// An empty table passes; emptiness is judged by the caller.
    pub fn validate_columns<'r, I>(&self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = &'r RawRow>,
    {
        let mut any_rows = false;
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for row in rows {
            any_rows = true;
            seen.extend(row.keys().map(String::as_str));
        }
        if !any_rows {
            return Ok(());
        }

        for column in self.required {
            if !seen.contains(column) {
                return Err(PipelineError::MissingColumn {
                    kind: self.kind,
                    column: column.to_string(),
                    found_columns: seen.iter().map(|c| c.to_string()).collect(),
                });
            }
        }

        Ok(())
    }
}
