mod support;

use std::io::Write;

use penumbra::query::optimize::{collapse_in_lists, expand_nulls, reduce_constants};
use penumbra::query::sql::{
    BinaryExpr, BinaryOp, InExpr, Ordering, SelectExpression, SqlExpr, TableExpr,
    TableExpression,
};
use penumbra::query::{PredicateOptimizer, QueryCompiler};
use penumbra::{CompilerOptions, SqlType, Value, ValueKind};
use proptest::prelude::*;
use support::{render, store_model};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    fn from_bool(value: bool) -> Self {
        if value {
            Truth::True
        } else {
            Truth::False
        }
    }

    fn not(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    fn and(self, other: Self) -> Self {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    fn or(self, other: Self) -> Self {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Row {
    a: Option<i64>,
    b: Option<i64>,
    d: i64,
}

fn all_rows() -> Vec<Row> {
    let nullable = [None, Some(1), Some(2)];
    let mut rows = Vec::new();
    for a in nullable {
        for b in nullable {
            for d in [1, 2] {
                rows.push(Row { a, b, d });
            }
        }
    }
    rows
}

fn scalar(expr: &SqlExpr, row: &Row) -> Option<i64> {
    match expr {
        SqlExpr::Column(col) => match col.name.as_str() {
            "a" => row.a,
            "b" => row.b,
            "d" => Some(row.d),
            other => panic!("unknown column {other}"),
        },
        SqlExpr::Constant(Value::Int(v)) => Some(*v),
        SqlExpr::Constant(Value::Null) => None,
        other => panic!("not a scalar: {other:?}"),
    }
}

/// Evaluation with null compared as a value: `null = null` holds.
fn two_valued(expr: &SqlExpr, row: &Row) -> bool {
    match expr {
        SqlExpr::Constant(Value::Bool(v)) => *v,
        SqlExpr::Not(operand) => !two_valued(operand, row),
        SqlExpr::IsNull(operand) => scalar(operand, row).is_none(),
        SqlExpr::Binary(BinaryExpr { op, left, right }) => match op {
            BinaryOp::And => two_valued(left, row) && two_valued(right, row),
            BinaryOp::Or => two_valued(left, row) || two_valued(right, row),
            BinaryOp::Eq => scalar(left, row) == scalar(right, row),
            BinaryOp::Ne => scalar(left, row) != scalar(right, row),
            BinaryOp::Lt => matches!(
                (scalar(left, row), scalar(right, row)),
                (Some(l), Some(r)) if l < r
            ),
            other => panic!("unexpected operator {other:?}"),
        },
        other => panic!("unexpected predicate {other:?}"),
    }
}

/// SQL evaluation.
fn three_valued(expr: &SqlExpr, row: &Row) -> Truth {
    match expr {
        SqlExpr::Constant(Value::Bool(v)) => Truth::from_bool(*v),
        SqlExpr::Not(operand) => three_valued(operand, row).not(),
        SqlExpr::IsNull(operand) => Truth::from_bool(scalar(operand, row).is_none()),
        SqlExpr::NotNullable(inner) => three_valued(inner, row),
        SqlExpr::In(InExpr { operand, values }) => {
            let Some(tested) = scalar(operand, row) else {
                return Truth::Unknown;
            };
            let mut result = Truth::False;
            for value in values {
                result = result.or(match scalar(value, row) {
                    Some(v) => Truth::from_bool(v == tested),
                    None => Truth::Unknown,
                });
            }
            result
        }
        SqlExpr::Binary(BinaryExpr { op, left, right }) => match op {
            BinaryOp::And => three_valued(left, row).and(three_valued(right, row)),
            BinaryOp::Or => three_valued(left, row).or(three_valued(right, row)),
            comparison => match (scalar(left, row), scalar(right, row)) {
                (Some(l), Some(r)) => Truth::from_bool(match comparison {
                    BinaryOp::Eq => l == r,
                    BinaryOp::Ne => l != r,
                    BinaryOp::Lt => l < r,
                    BinaryOp::Le => l <= r,
                    BinaryOp::Gt => l > r,
                    BinaryOp::Ge => l >= r,
                    other => panic!("unexpected operator {other:?}"),
                }),
                _ => Truth::Unknown,
            },
        },
        other => panic!("unexpected predicate {other:?}"),
    }
}

fn column(name: &'static str, nullable: bool) -> SqlExpr {
    let ty = if nullable {
        SqlType::optional(ValueKind::Int)
    } else {
        SqlType::required(ValueKind::Int)
    };
    SqlExpr::column(name, "t", ty)
}

fn arb_scalar() -> impl Strategy<Value = SqlExpr> {
    prop_oneof![
        3 => Just(column("a", true)),
        3 => Just(column("b", true)),
        2 => Just(column("d", false)),
        2 => (1i64..3).prop_map(SqlExpr::constant),
        1 => Just(SqlExpr::Constant(Value::Null)),
    ]
}

fn arb_predicate() -> impl Strategy<Value = SqlExpr> {
    let leaf = prop_oneof![
        4 => (arb_scalar(), arb_scalar(), prop_oneof![
            Just(BinaryOp::Eq),
            Just(BinaryOp::Ne),
            Just(BinaryOp::Lt),
        ])
            .prop_map(|(l, r, op)| SqlExpr::binary(op, l, r)),
        1 => arb_scalar().prop_map(SqlExpr::is_null),
        1 => any::<bool>().prop_map(SqlExpr::bool),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| SqlExpr::and(l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| SqlExpr::or(l, r)),
            inner.prop_map(SqlExpr::not),
        ]
    })
}

fn arb_projected_column() -> impl Strategy<Value = SqlExpr> {
    ("[IiNn][Dd]", "[ab]")
        .prop_map(|(name, table)| SqlExpr::column(name, table, SqlType::required(ValueKind::Int)))
}

fn arb_projected() -> impl Strategy<Value = SqlExpr> {
    prop_oneof![
        arb_projected_column(),
        ("[IiKk][Dd]0?", arb_projected_column()).prop_map(|(alias, inner)| SqlExpr::alias(alias, inner)),
    ]
}

/// A select in one of three shapes: top level, a derived table, or the outer
/// half of a push-down that still projects through a star.
fn projection_target(shape: u8) -> SelectExpression {
    let mut select = SelectExpression::new();
    select.add_table(TableExpr::Table(TableExpression::new("Items", "a", None)));
    match shape {
        0 => {}
        1 => select.set_alias(Some("t1".into())),
        _ => {
            select.add_to_projection(SqlExpr::column("Id", "a", SqlType::required(ValueKind::Int)));
            select.add_to_projection(SqlExpr::column("Name", "a", SqlType::required(ValueKind::Int)));
            select.push_down_subquery().unwrap();
            select.set_alias(Some("t1".into()));
        }
    }
    select
}

fn lowered_name(expr: &SqlExpr) -> Option<String> {
    expr.column_name().map(str::to_lowercase)
}

proptest! {
    #[test]
    fn optimized_predicates_keep_two_valued_semantics(predicate in arb_predicate()) {
        let optimized = PredicateOptimizer::new(false).optimize(predicate.clone());
        for row in all_rows() {
            prop_assert_eq!(
                three_valued(&optimized, &row) == Truth::True,
                two_valued(&predicate, &row),
                "row {:?}\ninput {:?}\noutput {:?}", row, predicate, optimized
            );
        }
    }

    #[test]
    fn null_expansion_alone_is_sound(predicate in arb_predicate()) {
        let expanded = expand_nulls(predicate.clone());
        for row in all_rows() {
            prop_assert_eq!(
                three_valued(&expanded, &row) == Truth::True,
                two_valued(&predicate, &row)
            );
        }
    }

    #[test]
    fn constant_reduction_preserves_sql_truth(predicate in arb_predicate()) {
        let reduced = reduce_constants(predicate.clone());
        for row in all_rows() {
            prop_assert_eq!(three_valued(&reduced, &row), three_valued(&predicate, &row));
        }
    }

    #[test]
    fn equality_chains_collapse_into_one_list(values in prop::collection::vec(1i64..4, 2..6)) {
        let chain = values
            .iter()
            .map(|v| SqlExpr::eq(column("a", true), SqlExpr::constant(*v)))
            .reduce(SqlExpr::or)
            .unwrap();
        let collapsed = collapse_in_lists(chain.clone());
        let is_single_list = matches!(&collapsed, SqlExpr::In(list) if list.values.len() == values.len());
        prop_assert!(is_single_list, "{:?}", collapsed);
        for row in all_rows() {
            prop_assert_eq!(three_valued(&collapsed, &row), three_valued(&chain, &row));
        }
    }

    #[test]
    fn inequality_chains_collapse_into_a_negated_list(values in prop::collection::vec(1i64..4, 2..6)) {
        let chain = values
            .iter()
            .map(|v| SqlExpr::ne(column("b", true), SqlExpr::constant(*v)))
            .reduce(SqlExpr::and)
            .unwrap();
        let collapsed = collapse_in_lists(chain.clone());
        let is_negated_list = matches!(&collapsed, SqlExpr::Not(inner) if matches!(inner.as_ref(), SqlExpr::In(_)));
        prop_assert!(is_negated_list, "{:?}", collapsed);
        for row in all_rows() {
            prop_assert_eq!(three_valued(&collapsed, &row), three_valued(&chain, &row));
        }
    }

    #[test]
    fn unique_table_aliases_never_collide(existing in prop::collection::vec("[a-cA-C][0-2]?", 0..8), base in "[a-c]") {
        let mut select = SelectExpression::new();
        for (i, alias) in existing.iter().enumerate() {
            select.add_table(TableExpr::Table(TableExpression::new(format!("T{i}"), alias.clone(), None)));
        }
        let fresh = select.unique_table_alias(&base);
        prop_assert!(fresh.starts_with(base.as_str()));
        prop_assert!(
            !existing.iter().any(|alias| alias.eq_ignore_ascii_case(&fresh)),
            "{} collides with {:?}", fresh, existing
        );
    }

    #[test]
    fn projected_aliases_stay_unique(
        shape in 0u8..3,
        added in prop::collection::vec(arb_projected(), 1..10),
        ordered in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
    ) {
        let mut select = projection_target(shape);
        for index in &ordered {
            select.add_to_order_by(Ordering::asc(index.get(&added).clone()));
        }
        let seeded = select.order_by().to_vec();
        let derived = select.alias().is_some();

        for expr in &added {
            let before: Vec<_> = select.projection().iter().filter_map(lowered_name).collect();
            let index = select.add_to_projection(expr.clone());
            let projected = &select.projection()[index];
            if index == before.len() && (derived || matches!(expr, SqlExpr::Alias(_))) {
                let name = lowered_name(projected).unwrap();
                prop_assert!(!before.contains(&name), "{} reused in {:?}", name, select.projection());
            }
        }

        if derived {
            let mut names: Vec<_> = select.projection().iter().filter_map(lowered_name).collect();
            let total = names.len();
            names.sort();
            names.dedup();
            prop_assert_eq!(names.len(), total, "{:?}", select.projection());
        }
        for (ordering, original) in select.order_by().iter().zip(&seeded) {
            if ordering != original {
                prop_assert!(
                    select.projection().contains(&ordering.expr),
                    "{:?} orders by an unprojected name in {:?}", ordering, select.projection()
                );
            }
        }
    }
}

fn nullable_filter_sql(options: CompilerOptions) -> String {
    let mut compiler = QueryCompiler::new(store_model(), options);
    let source = compiler.new_query_source();
    let mut addresses = compiler.entity_query("Address", source).unwrap();
    addresses.select_mut().unwrap().add_to_predicate(SqlExpr::eq(
        SqlExpr::column("CustomerId", "a", SqlType::optional(ValueKind::Int)),
        SqlExpr::parameter("customer", SqlType::optional(ValueKind::Int)),
    ));
    let query = compiler.compile(addresses).unwrap();
    render(query.commands()[0])
}

#[test]
fn nullable_parameters_match_null_columns_by_default() {
    let sql = nullable_filter_sql(CompilerOptions::default());
    assert!(
        sql.ends_with(r#"WHERE "a"."CustomerId" = @customer OR "a"."CustomerId" IS NULL AND @customer IS NULL"#),
        "{sql}"
    );
}

#[test]
fn relational_nulls_loaded_from_config_skip_expansion() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[compiler]\nuse_relational_nulls = true\ntracking = \"no_tracking\"").unwrap();
    let options = CompilerOptions::load(file.path()).unwrap();
    assert!(options.use_relational_nulls);
    assert!(!options.is_tracking());

    let sql = nullable_filter_sql(options);
    assert!(sql.ends_with(r#"WHERE "a"."CustomerId" = @customer"#), "{sql}");
}

#[test]
fn missing_config_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let options = CompilerOptions::load(dir.path().join("penumbra.toml")).unwrap();
    assert_eq!(options, CompilerOptions::default());
    let rendered = options.to_toml_string().unwrap();
    assert_eq!(CompilerOptions::from_toml_str(&rendered).unwrap(), options);
}
