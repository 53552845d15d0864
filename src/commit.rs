//! Six-phase commit engine: stages a new backend object per table,
//! atomically swaps the live/next table-state slices, then finalizes or
//! rolls back.
//!
//! Phase order mirrors the original `rte_swx_ctl_pipeline_commit`:
//! `rollfwd0` builds (or incrementally updates) `ts_next` for every table
//! with pending work; `rollfwd1` stages the new default action; the swap
//! exchanges `ts`/`ts_next` and waits out one grace period so in-flight
//! dataplane readers drain; `rollfwd0`/`rollfwd1` run again post-swap to
//! bring the now-`ts_next` slice (holding the pre-commit state) up to
//! date for symmetry with the next commit; `rollfwd2` drops the staging
//! sets that are now fully applied. Failure during the pre-swap
//! `rollfwd0` pass triggers `rollback`; failure anywhere else is a
//! backend contract violation this crate does not attempt to recover
//! from (mirroring the original, which only rolls back pre-swap).

use std::thread;
use std::time::Duration;

use crate::error::{CtlError, Result};
use crate::table::backend::Obj;
use crate::table::entry::{ActionDescriptor, TableEntry};
use crate::table::staging::{Table, TableState};

/// Governs how long the commit engine waits between the atomic
/// `ts`/`ts_next` swap and reclaiming the now-superseded state, giving
/// any in-flight dataplane reader time to finish observing the old
/// pointer. Pluggable so embedders running under their own RCU-style
/// scheme can synchronize on that instead of a fixed sleep.
pub trait QuiescencePolicy: Send + Sync {
    fn wait(&self);
}

/// Default policy: a fixed sleep, matching the original's `usleep(100)`.
pub struct SleepGrace;

impl QuiescencePolicy for SleepGrace {
    fn wait(&self) {
        thread::sleep(Duration::from_micros(100));
    }
}

/// Drives the five-set staging model of every table with pending work
/// through to either a committed `ts`/`ts_next` pair or a full rollback.
pub struct CommitEngine<'a> {
    pub quiescence: &'a dyn QuiescencePolicy,
}

impl<'a> CommitEngine<'a> {
    pub fn new(quiescence: &'a dyn QuiescencePolicy) -> Self {
        CommitEngine { quiescence }
    }

    /// Runs the full six-phase commit for every table that has staged
    /// work. `ts`/`ts_next` are swapped in place on success. On failure,
    /// any partial `rollfwd0` work is rolled back and `ts`/`ts_next` are
    /// left exactly as they were on entry.
    pub fn commit(
        &self,
        tables: &mut [Table],
        ts: &mut [TableState],
        ts_next: &mut [TableState],
        actions: &[ActionDescriptor],
        numa_node: i32,
    ) -> Result<()> {
        debug_assert_eq!(tables.len(), ts.len());
        debug_assert_eq!(tables.len(), ts_next.len());

        if let Err(e) = self.rollfwd0(tables, ts_next, actions, numa_node, Pass::PreSwap) {
            self.rollback(tables, ts_next);
            return Err(e);
        }
        // The pre-swap pass succeeded for every table: any object a
        // non-incremental backend displaced while building ts_next's
        // replacement is now unreachable for good (it can no longer be
        // rolled back into), so free it rather than hold it until rollfwd2.
        for table in tables.iter_mut() {
            if let Some(stale) = table.rollback_obj.take() {
                table.ops.free(stale);
            }
        }
        self.rollfwd1(tables, ts_next);

        for i in 0..tables.len() {
            std::mem::swap(&mut ts[i], &mut ts_next[i]);
        }
        self.quiescence.wait();

        // ts_next now holds the pre-commit state; bring it current so the
        // next commit starts from a consistent baseline, then drop the
        // staging sets that rollfwd0 has now fully applied to `ts`.
        let _ = self.rollfwd0(tables, ts_next, actions, numa_node, Pass::PostSwap);
        self.rollfwd1(tables, ts_next);
        self.rollfwd2(tables);

        Ok(())
    }

    /// Builds or incrementally updates each table's backend object to
    /// reflect its staged add/modify/delete sets, in the order the
    /// original applies them — `pending_add`, then `pending_modify1`
    /// (overwriting the existing key), then `pending_delete` — counting
    /// successful operations into `n_add`/`n_modify`/`n_delete` so a
    /// failure partway through can be undone in exact reverse by
    /// `rollback`. On the pre-swap pass, any backend failure aborts the
    /// whole phase (caller rolls back); on the post-swap pass, failures
    /// are best-effort since `ts` is already live and correct — only
    /// `ts_next` construction is at stake, so errors are ignored there.
    fn rollfwd0(
        &self,
        tables: &mut [Table],
        slot: &mut [TableState],
        _actions: &[ActionDescriptor],
        numa_node: i32,
        pass: Pass,
    ) -> Result<()> {
        for (table, state) in tables.iter_mut().zip(slot.iter_mut()) {
            if table.update_pending_count(false) == 0 {
                continue;
            }

            let incremental = table.ops.is_incremental();
            if incremental && state.obj.is_some() {
                table.n_add = 0;
                table.n_modify = 0;
                table.n_delete = 0;
                let obj = state.obj.as_mut().unwrap();
                for e in table.pending_add.iter() {
                    if let Err(err) = table.ops.add(obj, e) {
                        if pass == Pass::PreSwap {
                            return Err(err);
                        }
                        continue;
                    }
                    table.n_add += 1;
                }
                for e in table.pending_modify1.iter() {
                    if let Err(err) = table.ops.add(obj, e) {
                        if pass == Pass::PreSwap {
                            return Err(err);
                        }
                        continue;
                    }
                    table.n_modify += 1;
                }
                for e in table.pending_delete.iter() {
                    if let Err(err) = table.ops.del(obj, e) {
                        if pass == Pass::PreSwap {
                            return Err(err);
                        }
                        continue;
                    }
                    table.n_delete += 1;
                }
            } else {
                let merged = merged_entries(table);
                let new_obj = table.ops.create(&table.params, &merged, "", numa_node);
                match new_obj {
                    Some(obj) => {
                        let old = state.obj.take();
                        state.obj = Some(obj);
                        match pass {
                            // Keep the displaced object alive until the
                            // whole pre-swap pass succeeds across every
                            // table, so a later table's failure can still
                            // reinstate it via `rollback`.
                            Pass::PreSwap => table.rollback_obj = old,
                            // Post-swap: the displaced object is the truly
                            // stale pre-commit shadow; nothing can roll
                            // back from here, so free it now.
                            Pass::PostSwap => {
                                if let Some(old) = old {
                                    table.ops.free(old);
                                }
                            }
                        }
                    }
                    None if pass == Pass::PreSwap => {
                        return Err(CtlError::backend(
                            table.name.clone(),
                            "create returned no object",
                        ));
                    }
                    None => {}
                }
                table.n_add = table.pending_add.len() + table.pending_modify1.len();
                table.n_delete = table.pending_delete.len();
            }
        }

        Ok(())
    }

    /// Applies each table's staged default-action change, if any.
    fn rollfwd1(&self, tables: &mut [Table], slot: &mut [TableState]) {
        for (table, state) in tables.iter_mut().zip(slot.iter_mut()) {
            if let Some(def) = table.pending_default.take() {
                state.default_action_id = def.action_id;
                state.default_action_data = def.action_data;
            }
        }
    }

    /// Drops the staging sets a successful commit has now fully applied,
    /// merging `pending_modify0`/`pending_delete` bookkeeping back into
    /// `entries` and clearing the rollback counters.
    fn rollfwd2(&self, tables: &mut [Table]) {
        for table in tables.iter_mut() {
            table.entries.append(&mut table.pending_add);
            table.entries.append(&mut table.pending_modify1);
            table.pending_modify0.clear();
            table.pending_delete.clear();
            table.n_add = 0;
            table.n_modify = 0;
            table.n_delete = 0;
            table.rollback_obj = None;
        }
    }

    /// Undoes whatever a failed pre-swap `rollfwd0` pass managed to apply,
    /// per table, leaving the staging sets themselves untouched so the
    /// caller can inspect or retry:
    ///
    /// - Incremental backend: undoes exactly the counted work, in reverse
    ///   of the order `rollfwd0` applied it — `add` back the first
    ///   `n_delete` entries of `pending_delete`, `add` back the first
    ///   `n_modify` entries of `pending_modify0` (restoring the
    ///   pre-modification value `rollfwd0` overwrote), then `del` the
    ///   first `n_add` entries of `pending_add`.
    /// - Non-incremental backend: frees any freshly built replacement
    ///   object and reinstates the object it displaced (stashed in
    ///   `rollback_obj`), closing the leak the original design flags for
    ///   a `create` that succeeded before a later table's failed.
    ///
    /// Tables `rollfwd0` never reached have no counts and no
    /// `rollback_obj`, so they are left untouched.
    fn rollback(&self, tables: &mut [Table], slot: &mut [TableState]) {
        for (table, state) in tables.iter_mut().zip(slot.iter_mut()) {
            if table.ops.is_incremental() {
                if let Some(obj) = state.obj.as_mut() {
                    for e in table.pending_delete.iter().take(table.n_delete) {
                        let _ = table.ops.add(obj, e);
                    }
                    for e in table.pending_modify0.iter().take(table.n_modify) {
                        let _ = table.ops.add(obj, e);
                    }
                    for e in table.pending_add.iter().take(table.n_add) {
                        let _ = table.ops.del(obj, e);
                    }
                }
            } else if let Some(old) = table.rollback_obj.take() {
                if let Some(fresh) = state.obj.take() {
                    table.ops.free(fresh);
                }
                state.obj = Some(old);
            }

            table.n_add = 0;
            table.n_modify = 0;
            table.n_delete = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    PreSwap,
    PostSwap,
}

/// Produces the full post-commit entry list for a non-incremental
/// backend rebuild: current entries, minus anything staged for deletion
/// or modification, plus the staged adds and modify1 replacements.
fn merged_entries(table: &Table) -> Vec<TableEntry> {
    let key_mask0 = &table.params.key_mask0;
    let removed: Vec<&TableEntry> = table
        .pending_delete
        .iter()
        .chain(table.pending_modify0.iter())
        .collect();

    let mut merged: Vec<TableEntry> = table
        .entries
        .iter()
        .filter(|e| {
            !removed
                .iter()
                .any(|r| crate::table::entry::key_equal(key_mask0, e, r))
        })
        .cloned()
        .collect();

    merged.extend(table.pending_add.iter().cloned());
    merged.extend(table.pending_modify1.iter().cloned());
    merged
}

/// Explicit, idempotent abort of every table's staged work. Unlike
/// commit, this never touches `ts`/`ts_next` — only the staging sets.
pub fn abort_all(tables: &mut [Table]) {
    for table in tables.iter_mut() {
        table.abort();
    }
}
