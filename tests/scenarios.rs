//! Integration tests transcribing the spec's named scenarios (S3-S6; S1
//! and S2 live alongside the allocator in `src/iova.rs` since they only
//! exercise that module).

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use swx_ctl::commit::{CommitEngine, SleepGrace};
use swx_ctl::table::backend::{Obj, TableOps};
use swx_ctl::table::entry::{
    ActionArgInfo, ActionDescriptor, FieldMatchType, MatchFieldInfo, TableEntry, TableParams,
};
use swx_ctl::table::staging::{Table, TableState};

fn exact_field() -> MatchFieldInfo {
    MatchFieldInfo {
        offset: 0,
        n_bits: 32,
        match_type: FieldMatchType::Exact,
        is_header: true,
    }
}

fn fwd_action() -> ActionDescriptor {
    ActionDescriptor::new(
        "fwd",
        vec![ActionArgInfo {
            name: "port".into(),
            n_bits: 16,
        }],
    )
}

fn key_entry(key: u32, data: u8) -> TableEntry {
    TableEntry {
        key: Some(key.to_be_bytes().to_vec()),
        key_mask: None,
        key_signature: 0,
        key_priority: 0,
        action_id: 0,
        action_data: Some(vec![0, data]),
    }
}

fn empty_state() -> TableState {
    TableState {
        obj: None,
        default_action_id: 0,
        default_action_data: None,
    }
}

/// An incremental backend that records every `add`/`del` call, with an
/// optional failure point for the rollback scenario (S5). The call logs
/// are shared `Rc`s so a test can keep a handle after the `CountingOps`
/// itself has been moved into a `Table`'s `Box<dyn TableOps>`.
#[derive(Default)]
struct CountingOps {
    adds: Rc<RefCell<Vec<Vec<u8>>>>,
    dels: Rc<RefCell<Vec<Vec<u8>>>>,
    fail_on_add_index: Option<usize>,
}

struct CountingObj;

impl TableOps for CountingOps {
    const INCREMENTAL: bool = true;

    fn create(&self, _: &TableParams, _: &[TableEntry], _: &str, _: i32) -> Option<Obj> {
        Some(Box::new(CountingObj) as Box<dyn Any + Send>)
    }

    fn free(&self, _obj: Obj) {}

    fn add(&self, _obj: &mut Obj, entry: &TableEntry) -> swx_ctl::Result<()> {
        let mut adds = self.adds.borrow_mut();
        let idx = adds.len();
        adds.push(entry.key.clone().unwrap());
        if self.fail_on_add_index == Some(idx) {
            return Err(swx_ctl::CtlError::backend("t0", "simulated backend failure"));
        }
        Ok(())
    }

    fn del(&self, _obj: &mut Obj, entry: &TableEntry) -> swx_ctl::Result<()> {
        self.dels.borrow_mut().push(entry.key.clone().unwrap());
        Ok(())
    }
}

fn make_table(ops: CountingOps) -> Table {
    let fields = vec![exact_field()];
    let params = TableParams::derive(&fields, 2, 16);
    Table {
        name: "t0".into(),
        match_fields: fields,
        allowed_actions: vec![0],
        ops: Box::new(ops),
        is_stub: false,
        params,
        default_action_is_const: false,
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
    }
}

#[test]
fn s3_add_then_delete_cancels_with_no_backend_calls() {
    let mut table = make_table(CountingOps::default());
    let actions = vec![fwd_action()];

    table.add(key_entry(1, 7), &actions).unwrap();
    table.del(&key_entry(1, 0), &actions).unwrap();
    assert!(table.pending_add.is_empty());

    let mut tables = vec![table];
    let mut ts = vec![empty_state()];
    let mut ts_next = vec![empty_state()];

    let engine = CommitEngine::new(&SleepGrace);
    engine
        .commit(&mut tables, &mut ts, &mut ts_next, &actions, 0)
        .unwrap();

    assert!(tables[0].entries.is_empty());
}

#[test]
fn s4_stage_modify_applies_on_incremental_backend() {
    let mut table = make_table(CountingOps::default());
    let actions = vec![fwd_action()];

    let mut ts = empty_state();
    ts.obj = table.ops.create(&table.params, &[], "", 0);
    table.entries.push(key_entry(1, 1));

    table.add(key_entry(1, 2), &actions).unwrap();
    assert_eq!(table.pending_modify0.len(), 1);
    assert_eq!(table.pending_modify1.len(), 1);

    let mut tables = vec![table];
    let mut ts_v = vec![ts];
    let mut ts_next_v = vec![empty_state()];

    let engine = CommitEngine::new(&SleepGrace);
    engine
        .commit(&mut tables, &mut ts_v, &mut ts_next_v, &actions, 0)
        .unwrap();

    assert_eq!(tables[0].entries.len(), 1);
    assert_eq!(tables[0].entries[0].action_data, Some(vec![0, 2]));
}

#[test]
fn s5_backend_failure_triggers_rollback_and_preserves_staging() {
    let mut ops = CountingOps::default();
    ops.fail_on_add_index = Some(1);
    let dels = ops.dels.clone();
    let mut table = make_table(ops);
    let actions = vec![fwd_action()];

    let mut ts = empty_state();
    ts.obj = table.ops.create(&table.params, &[], "", 0);

    table.add(key_entry(1, 1), &actions).unwrap();
    table.add(key_entry(2, 2), &actions).unwrap();
    assert_eq!(table.pending_add.len(), 2);

    let mut tables = vec![table];
    let mut ts_v = vec![ts];
    let mut ts_next_v = vec![empty_state()];

    let engine = CommitEngine::new(&SleepGrace);
    let result = engine.commit(&mut tables, &mut ts_v, &mut ts_next_v, &actions, 0);

    assert!(result.is_err());
    assert!(tables[0].entries.is_empty());
    assert_eq!(tables[0].pending_add.len(), 2);

    // The backend's `add` for key 2 failed, so only key 1's add was ever
    // counted as successful; rollback must undo exactly that one entry by
    // issuing a `del` for it, and nothing else (S5).
    assert_eq!(dels.borrow().as_slice(), [key_entry(1, 1).key.unwrap()]);
}

#[test]
fn s6_text_round_trip_through_controller() {
    use swx_ctl::controller::{PipelineController, PipelineSpec, TableSpec};
    use swx_ctl::table::backend::memory::MemoryTableOps;

    let actions = vec![fwd_action()];
    let table = TableSpec {
        name: "ipv4_fwd".into(),
        match_fields: vec![exact_field()],
        allowed_actions: vec![0],
        ops: Box::new(MemoryTableOps),
        is_stub: false,
        n_keys_max: 64,
        default_action_is_const: false,
        default_action_id: 0,
        default_action_data: None,
    };
    let spec = PipelineSpec {
        actions,
        tables: vec![table],
        numa_node: -1,
    };

    let ctl = PipelineController::pipeline_create(spec).unwrap();
    let line = "match 0x0a000001/0xffffffff priority 10 action fwd port N(0x0007)";
    let entry = ctl.table_entry_read("ipv4_fwd", line).unwrap().unwrap();

    assert_eq!(entry.key, Some(vec![0x0a, 0x00, 0x00, 0x01]));
    assert_eq!(entry.key_mask, Some(vec![0xff, 0xff, 0xff, 0xff]));
    assert_eq!(entry.key_priority, 10);
    assert_eq!(entry.action_data, Some(vec![0x00, 0x07]));
}
