//! Per-table staging state machine: the five pending-entry sets plus
//! `pending_default`, and the `add`/`del` resolution rules that move
//! entries between them.

use super::backend::{Obj, TableOps};
use super::entry::{key_equal, ActionDescriptor, FieldMatchType, MatchType, TableEntry, TableParams, MatchFieldInfo};
use crate::error::{CtlError, Result};

/// Immutable metadata plus the five staged-entry sets for one table.
pub struct Table {
    pub name: String,
    pub match_fields: Vec<MatchFieldInfo>,
    /// Action ids enabled for this table (indices into the controller's
    /// action list).
    pub allowed_actions: Vec<u32>,
    pub ops: Box<dyn TableOps>,
    pub is_stub: bool,
    pub params: TableParams,
    pub default_action_is_const: bool,

    /// Keys currently part of the table; preserved with no action-data
    /// changes across a commit unless staged otherwise.
    pub entries: Vec<TableEntry>,
    /// Keys to be added on the next commit.
    pub pending_add: Vec<TableEntry>,
    /// Pre-modification copies of keys whose action data is being
    /// changed; paired 1:1 with `pending_modify1`.
    pub pending_modify0: Vec<TableEntry>,
    /// Post-modification copies of keys whose action data is being
    /// changed.
    pub pending_modify1: Vec<TableEntry>,
    /// Keys to be deleted on the next commit.
    pub pending_delete: Vec<TableEntry>,
    /// The default action staged to replace the table's current default,
    /// if any.
    pub pending_default: Option<TableEntry>,

    /// Counts of backend ops successfully applied during the current
    /// commit's rollfwd0 phase, used to bound rollback: `n_add` counts
    /// `pending_add` entries added, `n_modify` counts `pending_modify1`
    /// entries added (overwriting their `pending_modify0` pair), `n_delete`
    /// counts `pending_delete` entries deleted.
    pub n_add: usize,
    pub n_modify: usize,
    pub n_delete: usize,

    /// For a non-incremental backend, the object displaced by this
    /// commit's pre-swap `rollfwd0` rebuild, kept around so `rollback` can
    /// reinstate it instead of leaving `ts_next` with no object at all.
    /// `None` outside of an in-flight commit.
    pub rollback_obj: Option<Obj>,
}

impl Table {
    fn key_mask0(&self) -> &[u8] {
        &self.params.key_mask0
    }

    fn find(&self, list: &[TableEntry], entry: &TableEntry) -> Option<usize> {
        let mask = self.key_mask0();
        list.iter().position(|e| key_equal(mask, entry, e))
    }

    /// Validates an entry's shape before admission to any staging set.
    /// `key_check` validates `key`/`key_mask` presence and exact-match
    /// mask containment; `data_check` validates `action_id`/`action_data`.
    pub fn validate_entry(
        &self,
        entry: &TableEntry,
        key_check: bool,
        data_check: bool,
        actions: &[ActionDescriptor],
    ) -> Result<()> {
        if key_check {
            if self.is_stub {
                if entry.key.is_some() || entry.key_mask.is_some() {
                    return Err(CtlError::validation(format!(
                        "table {}: stub table entries must not carry a key",
                        self.name
                    )));
                }
            } else {
                let key = entry.key.as_deref().ok_or_else(|| {
                    CtlError::validation(format!("table {}: entry is missing its key", self.name))
                })?;
                if key.len() != self.params.key_size as usize {
                    return Err(CtlError::validation(format!(
                        "table {}: key size {} does not match table key size {}",
                        self.name,
                        key.len(),
                        self.params.key_size
                    )));
                }

                match self.params.match_type {
                    MatchType::Exact => {
                        if let Some(km) = entry.key_mask.as_deref() {
                            let km0 = self.key_mask0();
                            for i in 0..km0.len() {
                                if (km[i] & km0[i]) != km0[i] {
                                    return Err(CtlError::validation(format!(
                                        "table {}: exact-match entry mask narrower than table mask at byte {}",
                                        self.name, i
                                    )));
                                }
                            }
                        }
                    }
                    // LPM prefix-contiguity validation is deferred; see
                    // the original's "TBD Check that key mask is prefix."
                    MatchType::Lpm | MatchType::Wildcard => {}
                }
            }
        }

        if data_check {
            if !self.allowed_actions.contains(&entry.action_id) {
                return Err(CtlError::validation(format!(
                    "table {}: action id {} is not enabled on this table",
                    self.name, entry.action_id
                )));
            }

            let action = actions.get(entry.action_id as usize).ok_or_else(|| {
                CtlError::validation(format!(
                    "table {}: action id {} does not exist",
                    self.name, entry.action_id
                ))
            })?;

            let has_data = entry.action_data.is_some();
            let wants_data = action.data_size > 0;
            if has_data != wants_data {
                return Err(CtlError::validation(format!(
                    "table {}: action {} expects action_data presence {}, got {}",
                    self.name, action.name, wants_data, has_data
                )));
            }
        }

        Ok(())
    }

    /// Stages `entry` for addition, resolving against whichever staging
    /// set currently holds its key identity (see module docs for the
    /// five-way search order).
    pub fn add(&mut self, entry: TableEntry, actions: &[ActionDescriptor]) -> Result<()> {
        self.validate_entry(&entry, true, true, actions)?;

        if let Some(idx) = self.find(&self.entries, &entry) {
            let existing = self.entries.remove(idx);
            self.pending_modify1.push(entry);
            self.pending_modify0.push(existing);
            return Ok(());
        }

        if let Some(idx) = self.find(&self.pending_add, &entry) {
            self.pending_add[idx] = entry;
            return Ok(());
        }

        if let Some(idx) = self.find(&self.pending_modify1, &entry) {
            self.pending_modify1[idx] = entry;
            return Ok(());
        }

        if let Some(idx) = self.find(&self.pending_delete, &entry) {
            let existing = self.pending_delete.remove(idx);
            self.pending_modify1.push(entry);
            self.pending_modify0.push(existing);
            return Ok(());
        }

        self.pending_add.push(entry);
        Ok(())
    }

    /// Stages deletion of `entry`'s key (action data, if any, is
    /// ignored). Deleting an absent key is not an error.
    pub fn del(&mut self, entry: &TableEntry, actions: &[ActionDescriptor]) -> Result<()> {
        self.validate_entry(entry, true, false, actions)?;

        if let Some(idx) = self.find(&self.entries, entry) {
            let existing = self.entries.remove(idx);
            self.pending_delete.push(existing);
            return Ok(());
        }

        if let Some(idx) = self.find(&self.pending_add, entry) {
            self.pending_add.remove(idx);
            return Ok(());
        }

        if let Some(idx) = self.find(&self.pending_modify1, entry) {
            self.pending_modify1.remove(idx);

            let m0_idx = self
                .find(&self.pending_modify0, entry)
                .expect("pending_modify0/pending_modify1 must stay paired 1:1");
            let real_existing = self.pending_modify0.remove(m0_idx);
            self.pending_delete.push(real_existing);
            return Ok(());
        }

        // Found in pending_delete, or not found anywhere: no-op.
        Ok(())
    }

    /// Replaces `pending_default`. Rejected if the table's default is
    /// declared constant.
    pub fn default_entry_add(
        &mut self,
        entry: TableEntry,
        actions: &[ActionDescriptor],
    ) -> Result<()> {
        if self.default_action_is_const {
            return Err(CtlError::validation(format!(
                "table {}: default action is const, cannot be staged",
                self.name
            )));
        }

        self.validate_entry(&entry, false, true, actions)?;
        self.pending_default = Some(entry);
        Ok(())
    }

    /// Number of staged operations pending for this table (add + modify +
    /// delete, and optionally the default).
    pub fn update_pending_count(&self, consider_pending_default: bool) -> usize {
        let mut n = self.pending_add.len() + self.pending_modify1.len() + self.pending_delete.len();
        if consider_pending_default && self.pending_default.is_some() {
            n += 1;
        }
        n
    }

    /// Discards all staged work, restoring the table to its pre-staging
    /// state. Idempotent, never fails.
    pub fn abort(&mut self) {
        self.pending_add.clear();
        self.pending_modify1.clear();
        self.entries.append(&mut self.pending_modify0);
        self.entries.append(&mut self.pending_delete);
        self.pending_default = None;
    }

    /// Header text for [`crate::controller::PipelineController::table_fprintf`]:
    /// key size, key offset, key mask, action data size.
    pub fn header_line(&self) -> String {
        format!(
            "# Table {}: key size {} bytes, key offset {}, key mask [{}], action data size {} bytes",
            self.name,
            self.params.key_size,
            self.params.key_offset,
            hex(&self.params.key_mask0),
            self.params.action_data_size,
        )
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The live vs. staging half of a table's dataplane-visible state: the
/// backend object plus the default action currently in effect.
pub struct TableState {
    pub obj: Option<Obj>,
    pub default_action_id: u32,
    pub default_action_data: Option<Vec<u8>>,
}
