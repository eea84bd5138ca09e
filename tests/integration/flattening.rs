mod support;

use penumbra::query::sql::SqlExpr;
use penumbra::query::{
    JoinKey, KeySelector, QueryCompiler, QueryContext, QueryOperator, QuerySource, ResultSelector,
    Shaped,
};
use penumbra::{CompilerOptions, Value};
use support::{executor, int_column, render, store_model, ScriptedConnection};

fn customers_and_orders(
    compiler: &mut QueryCompiler,
) -> (QuerySource, QueryOperator, QuerySource, QueryOperator) {
    let customers_source = compiler.new_query_source();
    let orders_source = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", customers_source).unwrap();
    let orders = compiler.entity_query("Order", orders_source).unwrap();
    (customers_source, customers, orders_source, orders)
}

fn customer_key() -> JoinKey {
    JoinKey {
        sql: int_column("Id", "c"),
        client: KeySelector::root("Id"),
    }
}

fn order_key() -> JoinKey {
    JoinKey {
        sql: int_column("CustomerId", "o"),
        client: KeySelector::root("CustomerId"),
    }
}

fn pair(shaped: &Shaped) -> (&Shaped, &Shaped) {
    match shaped {
        Shaped::Tuple(items) if items.len() == 2 => (&items[0], &items[1]),
        other => panic!("expected a pair, got {other:?}"),
    }
}

#[test]
fn inner_join_reads_inner_columns_past_the_outer() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let (_, customers, orders_source, orders) = customers_and_orders(&mut compiler);
    let op = QueryOperator::Join {
        outer: Box::new(customers),
        inner: Box::new(orders),
        outer_key: customer_key(),
        inner_key: order_key(),
        query_source: orders_source,
        result_selector: ResultSelector::Pair,
    };
    let query = compiler.compile(op).unwrap();
    let commands = query.commands();
    assert_eq!(commands.len(), 1);
    let sql = render(commands[0]);
    assert_eq!(
        sql,
        r#"SELECT "c"."Id", "c"."Name", "o"."Id", "o"."CustomerId", "o"."Total" FROM "Customers" AS "c" INNER JOIN "Orders" AS "o" ON "c"."Id" = "o"."CustomerId""#
    );

    let connection = ScriptedConnection::new(vec![vec![vec![
        Value::Int(1),
        Value::from("Ada"),
        Value::Int(10),
        Value::Int(1),
        Value::Float(5.0),
    ]]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    let (customer, order) = pair(&results[0]);
    assert_eq!(
        customer.as_entity().and_then(|c| c.get("Name").cloned()),
        Some(Value::from("Ada"))
    );
    assert_eq!(
        order.as_entity().and_then(|o| o.get("Total").cloned()),
        Some(Value::Float(5.0))
    );
}

#[test]
fn self_cross_join_renames_the_inner_alias() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let left = compiler.new_query_source();
    let right = compiler.new_query_source();
    let outer = compiler.entity_query("Customer", left).unwrap();
    let inner = compiler.entity_query("Customer", right).unwrap();
    let query = compiler
        .compile(QueryOperator::SelectMany {
            outer: Box::new(outer),
            inner: Box::new(inner),
            query_source: right,
            result_selector: ResultSelector::Pair,
        })
        .unwrap();
    let sql = render(query.commands()[0]);
    assert_eq!(
        sql,
        r#"SELECT "c"."Id", "c"."Name", "c0"."Id", "c0"."Name" FROM "Customers" AS "c" CROSS JOIN "Customers" AS "c0""#
    );
}

#[test]
fn limited_outer_is_pushed_down_before_joining() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let (_, mut customers, orders_source, orders) = customers_and_orders(&mut compiler);
    customers
        .select_mut()
        .unwrap()
        .set_limit(Some(SqlExpr::constant(5)))
        .unwrap();
    let query = compiler
        .compile(QueryOperator::Join {
            outer: Box::new(customers),
            inner: Box::new(orders),
            outer_key: customer_key(),
            inner_key: order_key(),
            query_source: orders_source,
            result_selector: ResultSelector::Pair,
        })
        .unwrap();
    let sql = render(query.commands()[0]);
    assert!(
        sql.contains(r#"FROM (SELECT "c"."Id", "c"."Name" FROM "Customers" AS "c" LIMIT 5) AS "t0""#),
        "{sql}"
    );
    assert!(sql.contains(r#"ON "t0"."Id" = "o"."CustomerId""#), "{sql}");
}

#[test]
fn group_join_groups_consecutive_rows_per_outer() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let (_, customers, _, orders) = customers_and_orders(&mut compiler);
    let join_source = compiler.new_query_source();
    let query = compiler
        .compile(QueryOperator::GroupJoin {
            outer: Box::new(customers),
            inner: Box::new(orders),
            outer_key: customer_key(),
            inner_key: order_key(),
            query_source: join_source,
            result_selector: ResultSelector::Pair,
        })
        .unwrap();
    let sql = render(query.commands()[0]);
    assert!(
        sql.contains(r#"LEFT JOIN "Orders" AS "o" ON "c"."Id" = "o"."CustomerId""#),
        "{sql}"
    );
    assert!(sql.contains(r#"ORDER BY "c"."Id""#), "{sql}");

    let connection = ScriptedConnection::new(vec![vec![
        vec![Value::Int(1), Value::from("Ada"), Value::Int(10), Value::Int(1), Value::Float(5.0)],
        vec![Value::Int(1), Value::from("Ada"), Value::Int(11), Value::Int(1), Value::Float(7.5)],
        vec![Value::Int(2), Value::from("Grace"), Value::Null, Value::Null, Value::Null],
    ]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    assert_eq!(results.len(), 2);
    let (ada, ada_orders) = pair(&results[0]);
    let (grace, grace_orders) = pair(&results[1]);
    assert_eq!(
        ada.as_entity().and_then(|c| c.get("Id").cloned()),
        Some(Value::Int(1))
    );
    assert!(matches!(ada_orders, Shaped::Sequence(orders) if orders.len() == 2));
    assert!(grace.as_entity().is_some());
    assert_eq!(grace_orders, &Shaped::Sequence(Vec::new()));
}

#[test]
fn unmatched_outer_apply_yields_null_inner() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let (_, customers, orders_source, orders) = customers_and_orders(&mut compiler);
    let query = compiler
        .compile(QueryOperator::SelectMany {
            outer: Box::new(customers),
            inner: Box::new(QueryOperator::DefaultIfEmpty(Box::new(orders))),
            query_source: orders_source,
            result_selector: ResultSelector::Pair,
        })
        .unwrap();
    let sql = render(query.commands()[0]);
    assert!(sql.contains(r#"LEFT JOIN "Orders" AS "o" ON TRUE"#), "{sql}");

    let connection = ScriptedConnection::new(vec![vec![vec![
        Value::Int(2),
        Value::from("Grace"),
        Value::Null,
        Value::Null,
        Value::Null,
    ]]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    let (_, order) = pair(&results[0]);
    assert!(order.is_null());
}

fn correlated_orders(compiler: &mut QueryCompiler) -> QueryOperator {
    let customers_source = compiler.new_query_source();
    let orders_source = compiler.new_query_source();
    let customers = compiler.entity_query("Customer", customers_source).unwrap();
    let mut orders = compiler.entity_query("Order", orders_source).unwrap();
    orders
        .select_mut()
        .unwrap()
        .add_to_predicate(SqlExpr::eq(int_column("CustomerId", "o"), int_column("Id", "c")));
    QueryOperator::SelectMany {
        outer: Box::new(customers),
        inner: Box::new(orders),
        query_source: orders_source,
        result_selector: ResultSelector::Pair,
    }
}

#[test]
fn correlated_select_many_needs_lateral_joins() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let op = correlated_orders(&mut compiler);
    let err = compiler.compile(op).unwrap_err();
    assert_eq!(err.code(), "Unsupported");

    let options = CompilerOptions {
        lateral_joins: true,
        ..CompilerOptions::default()
    };
    let mut compiler = QueryCompiler::new(store_model(), options);
    let op = correlated_orders(&mut compiler);
    let query = compiler.compile(op).unwrap();
    let sql = render(query.commands()[0]);
    assert!(sql.contains("CROSS JOIN LATERAL ("), "{sql}");
}

#[test]
fn client_join_matches_keys_after_running_both_sides() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let (_, customers, orders_source, orders) = customers_and_orders(&mut compiler);
    let query = compiler
        .compile(QueryOperator::Join {
            outer: Box::new(QueryOperator::DefaultIfEmpty(Box::new(customers))),
            inner: Box::new(orders),
            outer_key: customer_key(),
            inner_key: order_key(),
            query_source: orders_source,
            result_selector: ResultSelector::Pair,
        })
        .unwrap();
    assert_eq!(query.commands().len(), 2);

    let connection = ScriptedConnection::new(vec![
        vec![
            vec![Value::Int(1), Value::from("Ada")],
            vec![Value::Int(2), Value::from("Grace")],
        ],
        vec![
            vec![Value::Int(10), Value::Int(1), Value::Float(5.0)],
            vec![Value::Int(11), Value::Int(1), Value::Float(7.5)],
            vec![Value::Int(12), Value::Int(3), Value::Float(1.0)],
        ],
    ]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    assert_eq!(results.len(), 2);
    for result in &results {
        let (customer, _) = pair(result);
        assert_eq!(
            customer.as_entity().and_then(|c| c.get("Id").cloned()),
            Some(Value::Int(1))
        );
    }
    assert_eq!(connection.issued().len(), 2);
}

#[test]
fn column_outer_join_keeps_the_buffer_to_its_own_columns() {
    let mut compiler = QueryCompiler::new(store_model(), CompilerOptions::default());
    let customers_source = compiler.new_query_source();
    let orders_source = compiler.new_query_source();
    let customers = compiler
        .column_query("Customer", customers_source, &["Id", "Name"])
        .unwrap();
    let orders = compiler.entity_query("Order", orders_source).unwrap();
    let op = QueryOperator::Join {
        outer: Box::new(customers),
        inner: Box::new(orders),
        outer_key: customer_key(),
        inner_key: order_key(),
        query_source: orders_source,
        result_selector: ResultSelector::Pair,
    };
    let query = compiler.compile(op).unwrap();
    assert_eq!(
        render(query.commands()[0]),
        r#"SELECT "c"."Id", "c"."Name", "o"."Id", "o"."CustomerId", "o"."Total" FROM "Customers" AS "c" INNER JOIN "Orders" AS "o" ON "c"."Id" = "o"."CustomerId""#
    );

    let connection = ScriptedConnection::new(vec![vec![vec![
        Value::Int(1),
        Value::from("Ada"),
        Value::Int(10),
        Value::Int(1),
        Value::Float(5.0),
    ]]]);
    let results = executor(&connection)
        .execute(&query, &mut QueryContext::default())
        .unwrap();
    let (customer, order) = pair(&results[0]);
    match customer {
        Shaped::Buffer(buffer) => {
            assert_eq!(buffer.as_slice(), &[Value::Int(1), Value::from("Ada")])
        }
        other => panic!("expected a buffer, got {other:?}"),
    }
    assert_eq!(
        order.as_entity().and_then(|o| o.get("Id").cloned()),
        Some(Value::Int(10))
    );
}
