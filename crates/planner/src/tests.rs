use super::*;
use catalog::{Object, ObjectType};
use parser::parse_sql;

fn catalog_with_foo() -> Catalog {
    let catalog = Catalog::new();
    let schema = TableSchema {
        columns: vec![
            ColumnDef::new("id", SqlType::Integer, true),
            ColumnDef::new("first_name", SqlType::Text, false),
            ColumnDef::new("last_name", SqlType::Text, false),
        ],
    };
    catalog.install_objects(vec![Object {
        object_type: ObjectType::Table,
        name: "foo".into(),
        table_name: "foo".into(),
        root_page: 2,
        json_schema: schema.to_json().unwrap(),
    }]);
    catalog
}

fn plan_one(sql: &str, catalog: &Catalog) -> ExecutionPlan {
    let stmts = parse_sql(sql).unwrap();
    plan_statement(&stmts[0], catalog).unwrap()
}

fn opcode_names(plan: &ExecutionPlan) -> Vec<String> {
    plan.commands
        .iter()
        .map(|c| c.explain_row(0)[1].clone().unwrap())
        .collect()
}

#[test]
fn literal_select_compiles_to_the_minimal_program() {
    let catalog = Catalog::new();
    let plan = plan_one("SELECT 1", &catalog);

    let names = opcode_names(&plan);
    assert_eq!(names, ["Init", "Integer", "Copy", "ResultRow", "Halt"]);
    assert_eq!(
        plan.commands[1],
        Command::Integer { value: 1, dest: 1 }
    );
    assert_eq!(plan.result_header, Some(vec!["1".to_string()]));
    assert!(!plan.explain);
}

#[test]
fn explain_sets_the_flag_without_changing_the_program() {
    let catalog = Catalog::new();
    let plain = plan_one("SELECT 1", &catalog);
    let explained = plan_one("EXPLAIN SELECT 1", &catalog);

    assert!(explained.explain);
    assert_eq!(plain.commands, explained.commands);
}

#[test]
fn create_table_builds_a_catalog_record() {
    let catalog = Catalog::new();
    let plan = plan_one(
        "CREATE TABLE foo (id INTEGER PRIMARY KEY, first_name TEXT, last_name TEXT)",
        &catalog,
    );

    let names = opcode_names(&plan);
    assert_eq!(
        names,
        [
            "Init",
            "Transaction",
            "OpenWrite",
            "CreateBTree",
            "String",
            "String",
            "String",
            "Copy",
            "String",
            "MakeRecord",
            "NewRowId",
            "Insert",
            "ParseSchema",
            "Halt",
        ]
    );
    assert_eq!(plan.commands[1], Command::Transaction { write: true });
    // The catalog cursor writes into the schema root.
    assert_eq!(
        plan.commands[2],
        Command::OpenWrite { cursor: 0, root: 1 }
    );
    assert_eq!(plan.expected_catalog_version, catalog.version());
}

#[test]
fn create_rejects_duplicates_and_bad_types() {
    let catalog = catalog_with_foo();
    let stmts = parse_sql("CREATE TABLE foo (id INTEGER PRIMARY KEY)").unwrap();
    assert!(matches!(
        plan_statement(&stmts[0], &catalog),
        Err(DbError::Planner(_))
    ));

    let stmts = parse_sql("CREATE TABLE bar (id BLOB)").unwrap();
    assert!(matches!(
        plan_statement(&stmts[0], &catalog),
        Err(DbError::Planner(_))
    ));

    let stmts = parse_sql("CREATE TABLE bar (name TEXT PRIMARY KEY)").unwrap();
    assert!(matches!(
        plan_statement(&stmts[0], &catalog),
        Err(DbError::Planner(_))
    ));
}

#[test]
fn multi_row_insert_emits_one_insert_per_row() {
    let catalog = catalog_with_foo();
    let plan = plan_one(
        "INSERT INTO foo (id, first_name, last_name) VALUES (1,'gud','dude'),(2,'joe','doe')",
        &catalog,
    );

    let inserts = plan
        .commands
        .iter()
        .filter(|c| matches!(c, Command::Insert { .. }))
        .count();
    assert_eq!(inserts, 2);
    assert_eq!(plan.commands[1], Command::Transaction { write: true });
    assert_eq!(
        plan.commands[2],
        Command::OpenWrite { cursor: 0, root: 2 }
    );
}

#[test]
fn insert_without_primary_key_allocates_a_rowid() {
    let catalog = catalog_with_foo();
    let plan = plan_one(
        "INSERT INTO foo (first_name, last_name) VALUES ('joe','doe')",
        &catalog,
    );
    assert!(
        plan.commands
            .iter()
            .any(|c| matches!(c, Command::NewRowId { root: 2, .. }))
    );
}

#[test]
fn insert_validates_columns_and_arity() {
    let catalog = catalog_with_foo();

    let stmts = parse_sql("INSERT INTO foo (ghost) VALUES (1)").unwrap();
    assert!(matches!(
        plan_statement(&stmts[0], &catalog),
        Err(DbError::Planner(_))
    ));

    let stmts = parse_sql("INSERT INTO foo (id, first_name) VALUES (1)").unwrap();
    assert!(matches!(
        plan_statement(&stmts[0], &catalog),
        Err(DbError::Planner(_))
    ));
}

#[test]
fn wildcard_select_projects_every_declared_column() {
    let catalog = catalog_with_foo();
    let plan = plan_one("SELECT * FROM foo", &catalog);

    assert_eq!(
        plan.result_header,
        Some(vec![
            "id".to_string(),
            "first_name".to_string(),
            "last_name".to_string(),
        ])
    );
    // The primary key reads through RowId, the rest through Column.
    assert!(
        plan.commands
            .iter()
            .any(|c| matches!(c, Command::RowId { .. }))
    );
    let columns = plan
        .commands
        .iter()
        .filter(|c| matches!(c, Command::Column { .. }))
        .count();
    assert_eq!(columns, 2);
}

#[test]
fn count_star_compiles_to_a_counter_loop() {
    let catalog = catalog_with_foo();
    let plan = plan_one("SELECT COUNT(*) FROM foo", &catalog);

    let names = opcode_names(&plan);
    assert_eq!(
        names,
        [
            "Init",
            "Transaction",
            "OpenRead",
            "Integer",
            "Integer",
            "Rewind",
            "Add",
            "Next",
            "ResultRow",
            "Halt",
        ]
    );
    // An empty table jumps straight to the ResultRow, emitting 0.
    assert_eq!(plan.commands[5], Command::Rewind { cursor: 0, end: 8 });
    assert_eq!(
        plan.commands[7],
        Command::Next {
            cursor: 0,
            loop_start: 6
        }
    );
    assert_eq!(plan.result_header, Some(vec!["COUNT(*)".to_string()]));
}

#[test]
fn where_clause_compiles_to_a_complementary_jump() {
    let catalog = catalog_with_foo();
    let plan = plan_one("SELECT first_name FROM foo WHERE id = 2", &catalog);

    let not_equal = plan
        .commands
        .iter()
        .enumerate()
        .find_map(|(i, c)| match c {
            Command::NotEqual(args) => Some((i, args.clone())),
            _ => None,
        })
        .expect("WHERE id = 2 should compile to NotEqual");
    let (_, args) = not_equal;

    // The jump skips to the Next command that advances the scan.
    assert!(matches!(
        plan.commands[args.target],
        Command::Next { .. }
    ));
}

#[test]
fn update_rewrites_the_record_under_the_current_rowid() {
    let catalog = catalog_with_foo();
    let plan = plan_one(
        "UPDATE foo SET first_name = 'ada' WHERE id = 1",
        &catalog,
    );

    let names = opcode_names(&plan);
    assert!(names.contains(&"RowId".to_string()));
    assert!(names.contains(&"MakeRecord".to_string()));
    assert!(names.contains(&"Insert".to_string()));
    assert_eq!(plan.commands[1], Command::Transaction { write: true });
}

#[test]
fn update_cannot_touch_the_primary_key() {
    let catalog = catalog_with_foo();
    let stmts = parse_sql("UPDATE foo SET id = 9").unwrap();
    assert!(matches!(
        plan_statement(&stmts[0], &catalog),
        Err(DbError::Planner(_))
    ));
}

#[test]
fn unknown_tables_fail_at_planning_time() {
    let catalog = Catalog::new();
    for sql in [
        "SELECT * FROM ghost",
        "INSERT INTO ghost (a) VALUES (1)",
        "UPDATE ghost SET a = 1",
    ] {
        let stmts = parse_sql(sql).unwrap();
        assert!(
            matches!(plan_statement(&stmts[0], &catalog), Err(DbError::Planner(_))),
            "expected planner error for {sql}"
        );
    }
}

#[test]
fn schema_table_is_queryable() {
    let catalog = Catalog::new();
    let plan = plan_one("SELECT COUNT(*) FROM cdb_schema", &catalog);
    assert_eq!(
        plan.commands[2],
        Command::OpenRead { cursor: 0, root: 1 }
    );
}
