//! Pipeline controller: owns every table's metadata, staging sets, and
//! the live/next backend state pair, and exposes the stable external
//! operations (`pipeline_create`, `table_entry_add`, `pipeline_commit`,
//! ...).

use std::collections::HashMap;
use std::io::Write;

use crate::codec;
use crate::commit::{self, CommitEngine, QuiescencePolicy, SleepGrace};
use crate::error::{CtlError, Result};
use crate::table::backend::TableOps;
use crate::table::entry::{ActionDescriptor, MatchFieldInfo, TableEntry, TableParams};
use crate::table::staging::{Table, TableState};

/// Describes one table at pipeline-creation time: match fields, enabled
/// actions, backend implementation, and default-action configuration.
/// The compiler/runtime that would normally produce this from a
/// compiled pipeline is out of scope for this crate.
pub struct TableSpec {
    pub name: String,
    pub match_fields: Vec<MatchFieldInfo>,
    pub allowed_actions: Vec<u32>,
    pub ops: Box<dyn TableOps>,
    pub is_stub: bool,
    pub n_keys_max: u32,
    pub default_action_is_const: bool,
    pub default_action_id: u32,
    pub default_action_data: Option<Vec<u8>>,
}

/// Everything needed to construct a [`PipelineController`]: the action
/// list, every table's spec, and the NUMA node forwarded verbatim to
/// backend `create`/`add`/`del` calls.
pub struct PipelineSpec {
    pub actions: Vec<ActionDescriptor>,
    pub tables: Vec<TableSpec>,
    pub numa_node: i32,
}

/// Owns the full set of tables for one pipeline instance and drives
/// staging, commit, and text-entry round-tripping against them.
pub struct PipelineController {
    actions: Vec<ActionDescriptor>,
    tables: Vec<Table>,
    ts: Vec<TableState>,
    ts_next: Vec<TableState>,
    numa_node: i32,
    table_index: HashMap<String, usize>,
    action_index: HashMap<String, usize>,
    quiescence: Box<dyn QuiescencePolicy>,
}

impl PipelineController {
    /// Builds a controller from `spec`, constructing each table's initial
    /// backend object (empty, since no entries exist yet) and populating
    /// the name-to-index lookups used by every other operation.
    pub fn pipeline_create(spec: PipelineSpec) -> Result<Self> {
        let mut action_index = HashMap::with_capacity(spec.actions.len());
        for (i, a) in spec.actions.iter().enumerate() {
            action_index.insert(a.name.clone(), i);
        }

        let mut table_index = HashMap::with_capacity(spec.tables.len());
        let mut tables = Vec::with_capacity(spec.tables.len());
        let mut ts = Vec::with_capacity(spec.tables.len());
        let mut ts_next = Vec::with_capacity(spec.tables.len());

        for (i, t) in spec.tables.into_iter().enumerate() {
            table_index.insert(t.name.clone(), i);

            let action_data_size = t
                .allowed_actions
                .iter()
                .filter_map(|id| spec.actions.get(*id as usize))
                .map(|a| a.data_size)
                .max()
                .unwrap_or(0);

            let params = if t.is_stub {
                TableParams::derive(&[], action_data_size, t.n_keys_max)
            } else {
                TableParams::derive(&t.match_fields, action_data_size, t.n_keys_max)
            };

            let obj = t.ops.create(&params, &[], "", spec.numa_node);
            let obj_next = t.ops.create(&params, &[], "", spec.numa_node);

            ts.push(TableState {
                obj,
                default_action_id: t.default_action_id,
                default_action_data: t.default_action_data.clone(),
            });
            ts_next.push(TableState {
                obj: obj_next,
                default_action_id: t.default_action_id,
                default_action_data: t.default_action_data,
            });

            tables.push(Table {
                name: t.name,
                match_fields: t.match_fields,
                allowed_actions: t.allowed_actions,
                ops: t.ops,
                is_stub: t.is_stub,
                params,
                default_action_is_const: t.default_action_is_const,
                entries: Vec::new(),
                pending_add: Vec::new(),
                pending_modify0: Vec::new(),
                pending_modify1: Vec::new(),
                pending_delete: Vec::new(),
                pending_default: None,
                n_add: 0,
                n_modify: 0,
                n_delete: 0,
                rollback_obj: None,
            });
        }

        Ok(PipelineController {
            actions: spec.actions,
            tables,
            ts,
            ts_next,
            numa_node: spec.numa_node,
            table_index,
            action_index,
            quiescence: Box::new(SleepGrace),
        })
    }

    /// Swaps in a non-default quiescence policy (e.g. for an embedder
    /// with its own RCU-style grace mechanism).
    pub fn set_quiescence_policy(&mut self, policy: Box<dyn QuiescencePolicy>) {
        self.quiescence = policy;
    }

    /// Releases every table's live and next backend objects. Consumes
    /// the controller, mirroring the original's `pipeline_free`.
    pub fn pipeline_free(mut self) {
        for (table, state) in self.tables.iter().zip(self.ts.iter_mut()) {
            if let Some(obj) = state.obj.take() {
                table.ops.free(obj);
            }
        }
        for (table, state) in self.tables.iter().zip(self.ts_next.iter_mut()) {
            if let Some(obj) = state.obj.take() {
                table.ops.free(obj);
            }
        }
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        let idx = *self
            .table_index
            .get(name)
            .ok_or_else(|| CtlError::validation(format!("unknown table: {name:?}")))?;
        Ok(&mut self.tables[idx])
    }

    fn table(&self, name: &str) -> Result<&Table> {
        let idx = *self
            .table_index
            .get(name)
            .ok_or_else(|| CtlError::validation(format!("unknown table: {name:?}")))?;
        Ok(&self.tables[idx])
    }

    /// Stages `entry` for addition to `table_name`, per the five-way
    /// resolution order in [`Table::add`].
    pub fn table_entry_add(&mut self, table_name: &str, entry: TableEntry) -> Result<()> {
        let actions = self.actions.clone();
        self.table_mut(table_name)?.add(entry, &actions)
    }

    /// Stages deletion of `entry`'s key from `table_name`.
    pub fn table_entry_delete(&mut self, table_name: &str, entry: &TableEntry) -> Result<()> {
        let actions = self.actions.clone();
        self.table_mut(table_name)?.del(entry, &actions)
    }

    /// Replaces `table_name`'s pending default action.
    pub fn table_default_entry_add(&mut self, table_name: &str, entry: TableEntry) -> Result<()> {
        let actions = self.actions.clone();
        self.table_mut(table_name)?.default_entry_add(entry, &actions)
    }

    /// Runs the full commit engine. On failure, discards all staged work
    /// iff `abort_on_fail` is set; otherwise leaves staging sets intact
    /// for inspection or retry.
    pub fn pipeline_commit(&mut self, abort_on_fail: bool) -> Result<()> {
        let engine = CommitEngine::new(self.quiescence.as_ref());
        let result = engine.commit(
            &mut self.tables,
            &mut self.ts,
            &mut self.ts_next,
            &self.actions,
            self.numa_node,
        );

        if result.is_err() && abort_on_fail {
            commit::abort_all(&mut self.tables);
        }

        result
    }

    /// Discards all staged work across every table without attempting a
    /// commit.
    pub fn pipeline_abort(&mut self) {
        commit::abort_all(&mut self.tables);
    }

    /// Parses one line of entry text against `table_name`'s match-field
    /// and action layout.
    pub fn table_entry_read(&self, table_name: &str, line: &str) -> Result<Option<TableEntry>> {
        let table = self.table(table_name)?;
        codec::parse_line(&table.match_fields, &self.actions, table.is_stub, line)
    }

    /// Emits a header line plus one line per entry currently in the
    /// table or about to leave it (`entries`, `pending_modify0`,
    /// `pending_delete`), mirroring the original's diagnostic dump.
    pub fn table_fprintf(&self, mut out: impl Write, table_name: &str) -> Result<()> {
        let table = self.table(table_name)?;

        writeln!(out, "{}", table.header_line())
            .map_err(|e| CtlError::backend(table_name.to_string(), e.to_string()))?;

        let rows = table
            .entries
            .iter()
            .chain(table.pending_modify0.iter())
            .chain(table.pending_delete.iter());

        let unknown_action = ActionDescriptor::new("?", Vec::new());
        let mut n = 0usize;
        for e in rows {
            let action = self
                .actions
                .get(e.action_id as usize)
                .unwrap_or(&unknown_action);
            writeln!(out, "{}", codec::emit_line(e, action))
                .map_err(|e| CtlError::backend(table_name.to_string(), e.to_string()))?;
            n += 1;
        }

        writeln!(out, "# Table {table_name} currently has {n} entries.")
            .map_err(|e| CtlError::backend(table_name.to_string(), e.to_string()))?;

        Ok(())
    }

    pub fn numa_node(&self) -> i32 {
        self.numa_node
    }

    pub fn action_id(&self, name: &str) -> Option<u32> {
        self.action_index.get(name).map(|i| *i as u32)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::table::backend::memory::MemoryTableOps;
    use crate::table::entry::{ActionArgInfo, FieldMatchType};

    fn spec() -> PipelineSpec {
        let actions = vec![
            ActionDescriptor::new("drop", vec![]),
            ActionDescriptor::new(
                "fwd",
                vec![ActionArgInfo {
                    name: "port".into(),
                    n_bits: 16,
                }],
            ),
        ];

        let table = TableSpec {
            name: "ipv4_fwd".into(),
            match_fields: vec![MatchFieldInfo {
                offset: 0,
                n_bits: 32,
                match_type: FieldMatchType::Exact,
                is_header: true,
            }],
            allowed_actions: vec![0, 1],
            ops: Box::new(MemoryTableOps),
            is_stub: false,
            n_keys_max: 1024,
            default_action_is_const: false,
            default_action_id: 0,
            default_action_data: None,
        };

        PipelineSpec {
            actions,
            tables: vec![table],
            numa_node: -1,
        }
    }

    #[test]
    fn create_add_commit_round_trip() {
        let mut ctl = PipelineController::pipeline_create(spec()).unwrap();

        let entry = ctl
            .table_entry_read("ipv4_fwd", "match 0x0a000001 priority 0 action fwd port N(0x0007)")
            .unwrap()
            .unwrap();

        ctl.table_entry_add("ipv4_fwd", entry).unwrap();
        ctl.pipeline_commit(true).unwrap();

        let mut buf = Vec::new();
        ctl.table_fprintf(&mut buf, "ipv4_fwd").unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("currently has 1 entries"));
    }

    #[test]
    fn unknown_table_name_is_rejected() {
        let mut ctl = PipelineController::pipeline_create(spec()).unwrap();
        let entry = TableEntry::new_stub(0, None);
        assert!(ctl.table_entry_add("nope", entry).is_err());
    }

    #[test]
    fn abort_discards_staged_add() {
        let mut ctl = PipelineController::pipeline_create(spec()).unwrap();
        let entry = ctl
            .table_entry_read("ipv4_fwd", "match 0x0a000001 action fwd port H(0x0001)")
            .unwrap()
            .unwrap();
        ctl.table_entry_add("ipv4_fwd", entry).unwrap();
        ctl.pipeline_abort();

        let mut buf = Vec::new();
        ctl.table_fprintf(&mut buf, "ipv4_fwd").unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("currently has 0 entries"));
    }
}
