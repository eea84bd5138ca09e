mod support;

use std::sync::Arc;

use penumbra::query::{QueryCompiler, QueryContext, Shaped};
use penumbra::{CompilerOptions, TrackingBehavior, Value};
use support::{executor, render, staff_model, store_model, ScriptedConnection};

fn staff_query(entity_type: &str) -> penumbra::query::CompiledQuery {
    let mut compiler = QueryCompiler::new(staff_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let op = compiler.entity_query(entity_type, source).unwrap();
    compiler.compile(op).unwrap()
}

fn entity_types(results: &[Shaped]) -> Vec<String> {
    results
        .iter()
        .filter_map(Shaped::as_entity)
        .map(|e| e.entity_type().to_owned())
        .collect()
}

#[test]
fn hierarchy_rows_materialize_their_concrete_type() {
    let query = staff_query("Employee");
    let sql = render(query.commands()[0]);
    assert_eq!(
        sql,
        r#"SELECT "e"."Kind", "e"."Id", "e"."Name", "e"."Reports", "e"."Budget" FROM "Employees" AS "e" WHERE "e"."Kind" IN ('A', 'B', 'C')"#
    );

    let connection = ScriptedConnection::new(vec![vec![
        vec![Value::from("A"), Value::Int(1), Value::from("Eve"), Value::Null, Value::Null],
        vec![Value::from("B"), Value::Int(2), Value::from("Max"), Value::Int(3), Value::Null],
        vec![
            Value::from("C"),
            Value::Int(3),
            Value::from("Dee"),
            Value::Int(5),
            Value::Float(100.0),
        ],
    ]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    assert_eq!(entity_types(&results), ["Employee", "Manager", "Director"]);

    let employee = results[0].as_entity().unwrap();
    assert_eq!(employee.get("Reports"), None);
    let director = results[2].as_entity().unwrap();
    assert_eq!(director.get("Budget"), Some(&Value::Float(100.0)));
    assert_eq!(director.get("Reports"), Some(&Value::Int(5)));
}

#[test]
fn intermediate_type_filters_to_its_subtree() {
    let query = staff_query("Manager");
    let sql = render(query.commands()[0]);
    assert!(sql.ends_with(r#"WHERE "e"."Kind" IN ('B', 'C')"#), "{sql}");
}

#[test]
fn leaf_type_uses_a_single_discriminator_test() {
    let query = staff_query("Director");
    let sql = render(query.commands()[0]);
    assert!(sql.ends_with(r#"WHERE "e"."Kind" = 'C'"#), "{sql}");

    let connection = ScriptedConnection::new(vec![vec![vec![
        Value::Int(3),
        Value::from("C"),
        Value::from("Dee"),
        Value::Int(5),
        Value::Float(2.5),
    ]]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    assert_eq!(entity_types(&results), ["Director"]);
}

#[test]
fn unknown_discriminator_value_fails_the_query() {
    let query = staff_query("Employee");
    let connection = ScriptedConnection::new(vec![vec![vec![
        Value::from("Z"),
        Value::Int(9),
        Value::from("Nobody"),
        Value::Null,
        Value::Null,
    ]]]);
    let err = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap_err();
    assert_eq!(err.code(), "UnableToDiscriminate");
    assert!(err.to_string().contains("Employee"));
}

#[test]
fn untracked_queries_materialize_every_row() {
    let options = CompilerOptions {
        tracking: TrackingBehavior::NoTracking,
        ..CompilerOptions::default()
    };
    let mut compiler = QueryCompiler::new(store_model(), options);
    let source = compiler.new_query_source();
    let op = compiler.entity_query("Customer", source).unwrap();
    let query = compiler.compile(op).unwrap();
    let row = vec![Value::Int(1), Value::from("Ada")];
    let connection = ScriptedConnection::new(vec![vec![row.clone(), row]]);
    let mut ctx = QueryContext::default();
    let results = executor(&connection).execute(&query, &mut ctx).unwrap();

    let (first, second) = (results[0].as_entity().unwrap(), results[1].as_entity().unwrap());
    assert!(!Arc::ptr_eq(first, second));
    assert_eq!(first, second);
    assert_eq!(ctx.state_manager().tracked_count(), 0);
}

#[test]
fn tracked_queries_register_each_identity_once() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let op = compiler.entity_query("Customer", source).unwrap();
    let query = compiler.compile(op).unwrap();
    let connection = ScriptedConnection::new(vec![vec![
        vec![Value::Int(1), Value::from("Ada")],
        vec![Value::Int(1), Value::from("Ada (stale)")],
        vec![Value::Int(2), Value::from("Grace")],
    ]]);
    let mut ctx = QueryContext::default();
    let results = executor(&connection).execute(&query, &mut ctx).unwrap();
    assert_eq!(ctx.state_manager().tracked_count(), 2);
    assert_eq!(
        results[1].as_entity().and_then(|e| e.get("Name").cloned()),
        Some(Value::from("Ada"))
    );
}

#[test]
fn null_key_on_a_required_entity_is_an_error() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let op = compiler.entity_query("Customer", source).unwrap();
    let query = compiler.compile(op).unwrap();
    let connection = ScriptedConnection::new(vec![vec![vec![Value::Null, Value::from("?")]]]);
    let err = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap_err();
    assert_eq!(err.code(), "NullKey");
}

#[test]
fn explain_lists_rendered_commands() {
    let query = staff_query("Director");
    let explained = query
        .explain_json(&penumbra::query::sql::DefaultSqlGenerator::new())
        .unwrap();
    let commands = explained["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert!(commands[0]["text"].as_str().unwrap().starts_with("SELECT"));
}

#[test]
fn column_query_shapes_raw_buffers() {
    let mut compiler = QueryCompiler::new(staff_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let op = compiler.column_query("Manager", source, &["Name", "Id"]).unwrap();
    let query = compiler.compile(op).unwrap();
    let sql = render(query.commands()[0]);
    assert_eq!(
        sql,
        r#"SELECT "e"."Name", "e"."Id" FROM "Employees" AS "e" WHERE "e"."Kind" IN ('B', 'C')"#
    );

    let connection = ScriptedConnection::new(vec![vec![vec![Value::from("Max"), Value::Int(2)]]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    match &results[0] {
        Shaped::Buffer(buffer) => {
            assert_eq!(buffer.as_slice(), &[Value::from("Max"), Value::Int(2)])
        }
        other => panic!("expected a buffer, got {other:?}"),
    }
}

#[test]
fn column_query_rejects_unknown_and_repeated_properties() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let err = compiler
        .column_query("Customer", source, &["Email"])
        .unwrap_err();
    assert_eq!(err.code(), "UnknownProperty");
    let err = compiler
        .column_query("Customer", source, &["Id", "Id"])
        .unwrap_err();
    assert_eq!(err.code(), "Invalid");
    let err = compiler.column_query("Customer", source, &[]).unwrap_err();
    assert_eq!(err.code(), "Invalid");
}

fn name_of(shaped: Shaped) -> penumbra::Result<Shaped> {
    match shaped {
        Shaped::Entity(entity) => Ok(entity.get("Name").cloned().map_or(Shaped::Null, Shaped::Value)),
        other => Ok(other),
    }
}

#[test]
fn projection_over_one_command_shapes_in_the_row_loop() {
    use penumbra::query::{IncludeSpecification, Projector, QueryOperator};

    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let projected = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", source).unwrap();
    let op = QueryOperator::Project {
        source: Box::new(customers),
        query_source: projected,
        projector: Projector::new(name_of),
    };
    let query = compiler.compile(op).unwrap();
    match query.root() {
        QueryOperator::ShapedQuery { shaper, .. } => {
            assert!(matches!(shaper, penumbra::query::Shaper::Projection(_)));
            assert!(shaper.find_entity_shaper(source).is_some());
            assert_eq!(shaper.get_accessor_expression(source), None);
        }
        other => panic!("expected a single command, got {other:?}"),
    }

    let connection = ScriptedConnection::new(vec![vec![
        vec![Value::Int(1), Value::from("Ada")],
        vec![Value::Int(2), Value::from("Grace")],
    ]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    assert_eq!(
        results,
        vec![
            Shaped::Value(Value::from("Ada")),
            Shaped::Value(Value::from("Grace"))
        ]
    );

    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let projected = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", source).unwrap();
    let included = QueryOperator::Include {
        source: Box::new(QueryOperator::Project {
            source: Box::new(customers),
            query_source: projected,
            projector: Projector::new(name_of),
        }),
        specifications: vec![IncludeSpecification::new(source, ["Orders"])],
    };
    let err = compiler.compile(included).unwrap_err();
    assert_eq!(err.code(), "Unsupported");
}

#[test]
fn projection_over_a_client_operator_runs_after_it() {
    use penumbra::query::{Projector, QueryOperator};

    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let projected = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", source).unwrap();
    let op = QueryOperator::Project {
        source: Box::new(QueryOperator::DefaultIfEmpty(Box::new(customers))),
        query_source: projected,
        projector: Projector::new(|shaped| Ok(Shaped::Value(Value::Bool(shaped.is_null())))),
    };
    let query = compiler.compile(op).unwrap();
    assert!(matches!(query.root(), QueryOperator::Project { .. }));

    let connection = ScriptedConnection::new(vec![Vec::new()]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    assert_eq!(results, vec![Shaped::Value(Value::Bool(true))]);
}
