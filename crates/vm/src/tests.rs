use super::*;
use catalog::Catalog;
use common::DbError;
use pager::Pager;
use storage::MemoryStorage;

fn test_vm() -> Vm {
    let pager = Arc::new(Pager::open(Box::new(MemoryStorage::new())).unwrap());
    let catalog = Arc::new(Catalog::new());
    Vm::new(Arc::new(Kv::new(pager, catalog)))
}

fn plan_for(vm: &Vm, commands: Vec<Command>) -> ExecutionPlan {
    ExecutionPlan {
        explain: false,
        commands,
        expected_catalog_version: vm.kv().catalog().version(),
        result_header: None,
    }
}

fn new_table(vm: &Vm) -> common::PageNumber {
    let kv = vm.kv();
    kv.begin_write().unwrap();
    let root = kv.new_btree().unwrap();
    kv.end_write().unwrap();
    root
}

fn scan_plan(vm: &Vm, root: common::PageNumber) -> ExecutionPlan {
    plan_for(
        vm,
        vec![
            Command::Init { target: 1 },
            Command::Transaction { write: false },
            Command::OpenRead { cursor: 0, root },
            Command::Rewind { cursor: 0, end: 8 },
            Command::RowId { cursor: 0, dest: 1 },
            Command::Column {
                cursor: 0,
                column: 0,
                dest: 2,
            },
            Command::ResultRow { start: 1, count: 2 },
            Command::Next {
                cursor: 0,
                loop_start: 4,
            },
            Command::Halt,
        ],
    )
}

fn insert_plan(vm: &Vm, root: common::PageNumber, name: &str) -> ExecutionPlan {
    plan_for(
        vm,
        vec![
            Command::Init { target: 1 },
            Command::Transaction { write: true },
            Command::OpenWrite { cursor: 0, root },
            Command::NewRowId { root, dest: 1 },
            Command::String {
                dest: 2,
                value: name.to_string(),
            },
            Command::MakeRecord {
                start: 2,
                count: 1,
                dest: 3,
            },
            Command::Insert {
                cursor: 0,
                record: 3,
                key: 1,
            },
            Command::Halt,
        ],
    )
}

#[test]
fn arithmetic_affinity_parses_text_suffix() {
    let vm = test_vm();
    let plan = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Integer { value: 3, dest: 1 },
            Command::String {
                dest: 2,
                value: "foo5".into(),
            },
            Command::Add(BinaryArgs {
                lhs: 1,
                rhs: 2,
                dest: 3,
            }),
            Command::ResultRow { start: 3, count: 1 },
            Command::Halt,
        ],
    );

    let result = vm.execute(&plan, &[]).unwrap();
    assert_eq!(result.rows, vec![vec![Some("8".to_string())]]);
}

#[test]
fn version_gate_rejects_stale_plans() {
    let vm = test_vm();

    for write in [false, true] {
        let plan = ExecutionPlan {
            explain: false,
            commands: vec![
                Command::Init { target: 1 },
                Command::Transaction { write },
                Command::Halt,
            ],
            expected_catalog_version: "stale".into(),
            result_header: None,
        };
        let err = vm.execute(&plan, &[]).unwrap_err();
        assert!(matches!(err, DbError::VersionChanged { .. }));
    }

    // The gate fired before any lock was taken; a fresh plan still runs.
    let ok = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Transaction { write: true },
            Command::Halt,
        ],
    );
    vm.execute(&ok, &[]).unwrap();
}

#[test]
fn explain_renders_the_program_as_a_table() {
    let vm = test_vm();
    let plan = ExecutionPlan {
        explain: true,
        commands: vec![
            Command::Init { target: 1 },
            Command::Integer { value: 1, dest: 1 },
            Command::ResultRow { start: 1, count: 1 },
            Command::Halt,
        ],
        expected_catalog_version: vm.kv().catalog().version(),
        result_header: None,
    };

    let result = vm.execute(&plan, &[]).unwrap();
    assert_eq!(result.rows.len(), 5);

    let header: Vec<_> = result.rows[0]
        .iter()
        .map(|c| c.clone().unwrap())
        .collect();
    assert_eq!(
        header,
        ["addr", "opcode", "p1", "p2", "p3", "p4", "p5", "comment"]
    );

    let opcodes: Vec<_> = result.rows[1..]
        .iter()
        .map(|row| row[1].clone().unwrap())
        .collect();
    assert_eq!(opcodes, ["Init", "Integer", "ResultRow", "Halt"]);
    // The Integer opcode stores 1 into register 1.
    assert_eq!(result.rows[2][2], Some("1".to_string()));
}

#[test]
fn insert_then_scan_round_trips() {
    let vm = test_vm();
    let root = new_table(&vm);

    for name in ["gud", "joe", "jan"] {
        vm.execute(&insert_plan(&vm, root, name), &[]).unwrap();
    }

    let result = vm.execute(&scan_plan(&vm, root), &[]).unwrap();
    assert_eq!(
        result.rows,
        vec![
            vec![Some("1".to_string()), Some("gud".to_string())],
            vec![Some("2".to_string()), Some("joe".to_string())],
            vec![Some("3".to_string()), Some("jan".to_string())],
        ]
    );
}

#[test]
fn rewind_on_an_empty_tree_emits_nothing() {
    let vm = test_vm();
    let root = new_table(&vm);

    let result = vm.execute(&scan_plan(&vm, root), &[]).unwrap();
    assert!(result.rows.is_empty());
}

#[test]
fn result_header_is_emitted_first() {
    let vm = test_vm();
    let mut plan = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Integer { value: 9, dest: 1 },
            Command::ResultRow { start: 1, count: 1 },
            Command::Halt,
        ],
    );
    plan.result_header = Some(vec!["n".to_string()]);

    let result = vm.execute(&plan, &[]).unwrap();
    assert_eq!(
        result.rows,
        vec![vec![Some("n".to_string())], vec![Some("9".to_string())]]
    );
}

#[test]
fn unset_registers_emit_null_cells() {
    let vm = test_vm();
    let plan = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::ResultRow { start: 1, count: 2 },
            Command::Halt,
        ],
    );

    let result = vm.execute(&plan, &[]).unwrap();
    assert_eq!(result.rows, vec![vec![None, None]]);
}

#[test]
fn create_btree_stores_the_new_root_page() {
    let vm = test_vm();
    let plan = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Transaction { write: true },
            Command::CreateBTree { dest: 1 },
            Command::ResultRow { start: 1, count: 1 },
            Command::Halt,
        ],
    );

    let result = vm.execute(&plan, &[]).unwrap();
    // Page 1 is the catalog root, so the first user tree lands on page 2.
    assert_eq!(result.rows, vec![vec![Some("2".to_string())]]);
}

#[test]
fn insert_rejects_a_non_integer_key() {
    let vm = test_vm();
    let root = new_table(&vm);

    let plan = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Transaction { write: true },
            Command::OpenWrite { cursor: 0, root },
            Command::String {
                dest: 1,
                value: "not a key".into(),
            },
            Command::MakeRecord {
                start: 1,
                count: 1,
                dest: 2,
            },
            Command::Insert {
                cursor: 0,
                record: 2,
                key: 1,
            },
            Command::Halt,
        ],
    );

    let err = vm.execute(&plan, &[]).unwrap_err();
    assert!(matches!(err, DbError::Plan(_)));

    // The aborted write transaction released its lock.
    vm.kv().begin_write().unwrap();
    vm.kv().end_write().unwrap();
}

#[test]
fn compare_opcodes_jump_when_the_condition_holds() {
    let vm = test_vm();

    // 1 != 2, so the jump skips the ResultRow.
    let skipping = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Integer { value: 1, dest: 1 },
            Command::Integer { value: 2, dest: 2 },
            Command::NotEqual(CompareArgs {
                lhs: 1,
                rhs: 2,
                target: 5,
            }),
            Command::ResultRow { start: 1, count: 1 },
            Command::Halt,
        ],
    );
    assert!(vm.execute(&skipping, &[]).unwrap().rows.is_empty());

    // 1 == 1 falls through NotEqual and emits the row.
    let falling = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Integer { value: 1, dest: 1 },
            Command::Integer { value: 1, dest: 2 },
            Command::NotEqual(CompareArgs {
                lhs: 1,
                rhs: 2,
                target: 5,
            }),
            Command::ResultRow { start: 1, count: 1 },
            Command::Halt,
        ],
    );
    assert_eq!(
        vm.execute(&falling, &[]).unwrap().rows,
        vec![vec![Some("1".to_string())]]
    );
}

#[test]
fn division_by_zero_is_a_plan_error() {
    let vm = test_vm();
    let plan = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Integer { value: 4, dest: 1 },
            Command::Integer { value: 0, dest: 2 },
            Command::Divide(BinaryArgs {
                lhs: 1,
                rhs: 2,
                dest: 3,
            }),
            Command::Halt,
        ],
    );
    assert!(matches!(
        vm.execute(&plan, &[]).unwrap_err(),
        DbError::Plan(_)
    ));
}

#[test]
fn variables_bind_positional_parameters() {
    let vm = test_vm();
    let plan = plan_for(
        &vm,
        vec![
            Command::Init { target: 1 },
            Command::Variable { index: 0, dest: 1 },
            Command::Variable { index: 1, dest: 2 },
            Command::ResultRow { start: 1, count: 2 },
            Command::Halt,
        ],
    );

    let result = vm
        .execute(&plan, &[Value::Int(5), Value::Text("ada".into())])
        .unwrap();
    assert_eq!(
        result.rows,
        vec![vec![Some("5".to_string()), Some("ada".to_string())]]
    );

    let err = vm.execute(&plan, &[Value::Int(5)]).unwrap_err();
    assert!(matches!(err, DbError::Plan(_)));
}
