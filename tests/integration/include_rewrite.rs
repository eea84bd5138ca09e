mod support;

use std::sync::Arc;

use penumbra::query::{IncludeSpecification, QueryCompiler, QueryContext, QueryOperator, Shaped};
use penumbra::{CompilerOptions, Value};
use support::{chain_model, executor, render, store_model, ScriptedConnection};

fn include(source: QueryOperator, spec: IncludeSpecification) -> QueryOperator {
    QueryOperator::Include {
        source: Box::new(source),
        specifications: vec![spec],
    }
}

#[test]
fn required_reference_chain_uses_inner_joins() {
    let mut compiler = QueryCompiler::new(chain_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let alphas = compiler.entity_query("Alpha", source).unwrap();
    let query = compiler
        .compile(include(alphas, IncludeSpecification::new(source, ["Beta", "Gamma"])))
        .unwrap();

    let commands = query.commands();
    assert_eq!(commands.len(), 1);
    let sql = render(commands[0]);
    assert!(
        sql.contains(r#"INNER JOIN "Betas" AS "b" ON "a"."BetaId" = "b"."Id""#),
        "{sql}"
    );
    assert!(
        sql.contains(r#"INNER JOIN "Gammas" AS "g" ON "b"."GammaId" = "g"."Id""#),
        "{sql}"
    );

    let connection = ScriptedConnection::new(vec![vec![vec![
        Value::Int(1),
        Value::Int(10),
        Value::Int(10),
        Value::Int(100),
        Value::Int(100),
        Value::from("top"),
    ]]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    let alpha = results[0].as_entity().unwrap();
    let beta = alpha.reference("Beta").unwrap();
    let gamma = beta.reference("Gamma").unwrap();
    assert_eq!(gamma.get("Label"), Some(&Value::from("top")));
}

#[test]
fn optional_dependent_reference_uses_left_join() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", source).unwrap();
    let query = compiler
        .compile(include(customers, IncludeSpecification::new(source, ["Address"])))
        .unwrap();
    let sql = render(query.commands()[0]);
    assert!(
        sql.contains(r#"LEFT JOIN "Addresses" AS "a" ON CAST("c"."Id" AS BIGINT) = "a"."CustomerId""#),
        "{sql}"
    );

    let connection = ScriptedConnection::new(vec![vec![
        vec![
            Value::Int(1),
            Value::from("Ada"),
            Value::Int(5),
            Value::Int(1),
            Value::from("Oslo"),
        ],
        vec![Value::Int(2), Value::from("Grace"), Value::Null, Value::Null, Value::Null],
    ]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    let ada = results[0].as_entity().unwrap();
    let grace = results[1].as_entity().unwrap();
    assert_eq!(
        ada.reference("Address").and_then(|a| a.get("City").cloned()),
        Some(Value::from("Oslo"))
    );
    assert!(grace.is_loaded("Address"));
    assert!(grace.reference("Address").is_none());
}

#[test]
fn required_principal_reference_filters_with_inner_join() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let orders = compiler.entity_query("Order", source).unwrap();
    let query = compiler
        .compile(include(orders, IncludeSpecification::new(source, ["Customer"])))
        .unwrap();
    let sql = render(query.commands()[0]);
    assert!(
        sql.contains(r#"INNER JOIN "Customers" AS "c" ON "o"."CustomerId" = "c"."Id""#),
        "{sql}"
    );
}

#[test]
fn collection_include_builds_a_correlated_related_command() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", source).unwrap();
    let query = compiler
        .compile(include(customers, IncludeSpecification::new(source, ["Orders"])))
        .unwrap();

    let commands = query.commands();
    assert_eq!(commands.len(), 2);
    let main = render(commands[0]);
    assert!(main.ends_with(r#"ORDER BY "c"."Id""#), "{main}");

    let related = render(commands[1]);
    assert!(related.starts_with(r#"SELECT "o"."Id", "o"."CustomerId", "o"."Total" FROM "Orders" AS "o""#), "{related}");
    assert!(related.contains(r#"SELECT DISTINCT "c"."Id" FROM "Customers" AS "c""#), "{related}");
    assert!(related.contains(r#"ON "o"."CustomerId" = "c"."Id""#), "{related}");
    assert!(related.ends_with(r#"ORDER BY "c"."Id""#), "{related}");
}

#[test]
fn references_below_a_collection_resolve_to_tracked_owners() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", source).unwrap();
    let query = compiler
        .compile(include(
            customers,
            IncludeSpecification::new(source, ["Orders", "Customer"]),
        ))
        .unwrap();
    let related = render(query.commands()[1]);
    assert!(related.contains(r#"INNER JOIN "Customers" AS "c0""#), "{related}");

    let connection = ScriptedConnection::new(vec![
        vec![vec![Value::Int(1), Value::from("Ada")]],
        vec![
            vec![
                Value::Int(10),
                Value::Int(1),
                Value::Float(5.0),
                Value::Int(1),
                Value::from("Ada"),
            ],
            vec![
                Value::Int(11),
                Value::Int(1),
                Value::Float(2.0),
                Value::Int(1),
                Value::from("Ada"),
            ],
        ],
    ]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    let ada = results[0].as_entity().unwrap();
    let orders = ada.collection("Orders");
    assert_eq!(orders.len(), 2);
    for order in &orders {
        let owner = order.reference("Customer").unwrap();
        assert!(Arc::ptr_eq(&owner, ada));
    }
    assert_eq!(connection.issued().len(), 2);
}

#[test]
fn include_on_group_join_outer_attaches_to_each_group() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let customers_source = compiler.new_query_source();
    let orders_source = compiler.new_query_source();
    let join_source = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", customers_source).unwrap();
    let orders = compiler.entity_query("Order", orders_source).unwrap();
    let grouped = QueryOperator::GroupJoin {
        outer: Box::new(customers),
        inner: Box::new(orders),
        outer_key: penumbra::query::JoinKey {
            sql: support::int_column("Id", "c"),
            client: penumbra::query::KeySelector::root("Id"),
        },
        inner_key: penumbra::query::JoinKey {
            sql: support::int_column("CustomerId", "o"),
            client: penumbra::query::KeySelector::root("CustomerId"),
        },
        query_source: join_source,
        result_selector: penumbra::query::ResultSelector::Pair,
    };
    let query = compiler
        .compile(include(
            grouped,
            IncludeSpecification::new(customers_source, ["Address"]),
        ))
        .unwrap();
    let sql = render(query.commands()[0]);
    assert!(sql.contains(r#"LEFT JOIN "Orders" AS "o""#), "{sql}");
    assert!(sql.contains(r#"LEFT JOIN "Addresses" AS "a""#), "{sql}");

    let connection = ScriptedConnection::new(vec![vec![
        vec![
            Value::Int(1),
            Value::from("Ada"),
            Value::Int(10),
            Value::Int(1),
            Value::Float(5.0),
            Value::Int(7),
            Value::Int(1),
            Value::from("Oslo"),
        ],
        vec![
            Value::Int(1),
            Value::from("Ada"),
            Value::Int(11),
            Value::Int(1),
            Value::Float(6.0),
            Value::Int(7),
            Value::Int(1),
            Value::from("Oslo"),
        ],
    ]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    assert_eq!(results.len(), 1);
    let Shaped::Tuple(parts) = &results[0] else {
        panic!("expected a pair, got {:?}", results[0]);
    };
    let ada = parts[0].as_entity().unwrap();
    assert!(ada.reference("Address").is_some());
    assert!(matches!(&parts[1], Shaped::Sequence(orders) if orders.len() == 2));
}

#[test]
fn include_on_client_operator_is_rejected() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let customers_source = compiler.new_query_source();
    let orders_source = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", customers_source).unwrap();
    let orders = compiler.entity_query("Order", orders_source).unwrap();
    let client = QueryOperator::SelectMany {
        outer: Box::new(QueryOperator::DefaultIfEmpty(Box::new(customers))),
        inner: Box::new(orders),
        query_source: orders_source,
        result_selector: penumbra::query::ResultSelector::Pair,
    };
    let err = compiler
        .compile(include(
            client,
            IncludeSpecification::new(customers_source, ["Orders"]),
        ))
        .unwrap_err();
    assert_eq!(err.code(), "Unsupported");
}

#[test]
fn empty_include_path_is_invalid() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let source = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", source).unwrap();
    let err = compiler
        .compile(include(
            customers,
            IncludeSpecification::new(source, Vec::<String>::new()),
        ))
        .unwrap_err();
    assert_eq!(err.code(), "Invalid");
}

fn chain_with(beta_required: bool, gamma_required: bool) -> Arc<penumbra::InMemoryModel> {
    use penumbra::{EntityType, ForeignKey, InMemoryModel, Navigation, Property, ValueKind};

    let mut beta = ForeignKey::new("Alpha", ["BetaId"], "Beta", ["Id"]);
    beta.is_required = beta_required;
    let mut gamma = ForeignKey::new("Beta", ["GammaId"], "Gamma", ["Id"]);
    gamma.is_required = gamma_required;
    Arc::new(
        InMemoryModel::new()
            .with_entity(
                EntityType::new("Alpha")
                    .table("Alphas")
                    .property(Property::new("Id", ValueKind::Int))
                    .property(Property::new("BetaId", ValueKind::Int))
                    .key(["Id"])
                    .navigation(Navigation::to_principal("Beta", beta)),
            )
            .with_entity(
                EntityType::new("Beta")
                    .table("Betas")
                    .property(Property::new("Id", ValueKind::Int))
                    .property(Property::new("GammaId", ValueKind::Int))
                    .key(["Id"])
                    .navigation(Navigation::to_principal("Gamma", gamma)),
            )
            .with_entity(
                EntityType::new("Gamma")
                    .table("Gammas")
                    .property(Property::new("Id", ValueKind::Int))
                    .property(Property::new("Label", ValueKind::String))
                    .key(["Id"]),
            ),
    )
}

fn chain_sql(model: Arc<penumbra::InMemoryModel>) -> String {
    let mut compiler = QueryCompiler::new(model, CompilerOptions::default());
    let source = compiler.new_query_source();
    let alphas = compiler.entity_query("Alpha", source).unwrap();
    let query = compiler
        .compile(include(alphas, IncludeSpecification::new(source, ["Beta", "Gamma"])))
        .unwrap();
    render(query.commands()[0])
}

#[test]
fn optional_second_step_only_downgrades_itself() {
    let sql = chain_sql(chain_with(true, false));
    assert!(sql.contains(r#"INNER JOIN "Betas" AS "b""#), "{sql}");
    assert!(sql.contains(r#"LEFT JOIN "Gammas" AS "g""#), "{sql}");
}

#[test]
fn optional_first_step_downgrades_the_rest_of_the_path() {
    let sql = chain_sql(chain_with(false, true));
    assert!(sql.contains(r#"LEFT JOIN "Betas" AS "b""#), "{sql}");
    assert!(sql.contains(r#"LEFT JOIN "Gammas" AS "g""#), "{sql}");
    assert!(!sql.contains("INNER JOIN"), "{sql}");
}
