//! SQL expression model.
//!
//! Scalar expressions form a closed [`SqlExpr`] union; every rewriting pass is
//! an exhaustive match over it. Tables and joins are [`TableExpr`] nodes, and
//! whole statements are mutable [`SelectExpression`] builders.

pub mod generator;
pub mod select;

use crate::query::source::QuerySource;
use crate::value::{SqlType, Value, ValueKind};

pub use generator::{DefaultSqlGenerator, RelationalCommand, SqlGenerator};
pub use select::SelectExpression;

/// Column alias prefix used when an expression has no name of its own.
pub const COLUMN_ALIAS_PREFIX: &str = "c";
/// Table alias prefix for generated subqueries.
pub const SUBQUERY_ALIAS_PREFIX: &str = "t";

/// Reference to a column of a table or subquery in scope.
#[derive(Clone, Debug)]
pub struct ColumnExpr {
    /// Column name, or the projected alias when the table is a subquery.
    pub name: String,
    /// Alias of the table the column belongs to.
    pub table_alias: String,
    /// Column type.
    pub ty: SqlType,
    /// Query source of the owning table, when known.
    pub query_source: Option<QuerySource>,
}

impl PartialEq for ColumnExpr {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.table_alias == other.table_alias
    }
}

/// Expression with an optional projected name.
#[derive(Clone, Debug, PartialEq)]
pub struct AliasExpr {
    /// Projected name. Assigned late during push-down when needed.
    pub alias: Option<String>,
    /// Wrapped expression.
    pub expr: Box<SqlExpr>,
}

/// Named command parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterExpr {
    /// Parameter name without prefix.
    pub name: String,
    /// Declared type.
    pub ty: SqlType,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
}

impl BinaryOp {
    /// True for `=`, `<>`, `<`, `<=`, `>`, `>=`.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// True for `AND` and `OR`.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Operator with swapped operands, for comparisons.
    pub fn mirrored(self) -> Self {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        }
    }

    /// Logical complement of a comparison.
    pub fn negated(self) -> Option<Self> {
        Some(match self {
            BinaryOp::Eq => BinaryOp::Ne,
            BinaryOp::Ne => BinaryOp::Eq,
            BinaryOp::Lt => BinaryOp::Ge,
            BinaryOp::Le => BinaryOp::Gt,
            BinaryOp::Gt => BinaryOp::Le,
            BinaryOp::Ge => BinaryOp::Lt,
            _ => return None,
        })
    }
}

/// Binary operation.
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryExpr {
    /// Operator.
    pub op: BinaryOp,
    /// Left operand.
    pub left: Box<SqlExpr>,
    /// Right operand.
    pub right: Box<SqlExpr>,
}

/// `operand IN (values...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct InExpr {
    /// Tested operand.
    pub operand: Box<SqlExpr>,
    /// Candidate values.
    pub values: Vec<SqlExpr>,
}

/// One `WHEN test THEN result` arm.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseWhen {
    /// Condition.
    pub test: SqlExpr,
    /// Value when the condition holds.
    pub result: SqlExpr,
}

/// Searched `CASE`.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseExpr {
    /// Arms, tested in order.
    pub whens: Vec<CaseWhen>,
    /// `ELSE` value.
    pub otherwise: Option<Box<SqlExpr>>,
}

/// Scalar SQL function call.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionExpr {
    /// Function name.
    pub name: String,
    /// Arguments.
    pub args: Vec<SqlExpr>,
    /// Result type.
    pub ty: SqlType,
}

/// Explicit `CAST`.
#[derive(Clone, Debug, PartialEq)]
pub struct CastExpr {
    /// Converted operand.
    pub operand: Box<SqlExpr>,
    /// Target type.
    pub ty: SqlType,
}

/// Aggregate functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// `COUNT`
    Count,
    /// `SUM`
    Sum,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `AVG`
    Avg,
}

/// Aggregate call. A missing operand means `*`.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateExpr {
    /// Function.
    pub function: AggregateFunction,
    /// Aggregated operand.
    pub operand: Option<Box<SqlExpr>>,
    /// Result type.
    pub ty: SqlType,
}

/// Predicate derived from a hierarchy's discriminator column.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscriminatorPredicate {
    /// Discriminator test.
    pub predicate: Box<SqlExpr>,
    /// Query source whose hierarchy produced it.
    pub query_source: Option<QuerySource>,
}

/// Scalar SQL expression.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlExpr {
    /// Column reference.
    Column(ColumnExpr),
    /// Named projection.
    Alias(AliasExpr),
    /// Literal.
    Constant(Value),
    /// Command parameter.
    Parameter(ParameterExpr),
    /// Binary operation.
    Binary(BinaryExpr),
    /// Logical negation.
    Not(Box<SqlExpr>),
    /// `IS NULL` test.
    IsNull(Box<SqlExpr>),
    /// `IN` list.
    In(InExpr),
    /// Searched `CASE`.
    Case(CaseExpr),
    /// Scalar function.
    Function(FunctionExpr),
    /// Explicit cast.
    Cast(CastExpr),
    /// Aggregate.
    Aggregate(AggregateExpr),
    /// `EXISTS (subquery)`.
    Exists(Box<SelectExpression>),
    /// Scalar subquery.
    Subquery(Box<SelectExpression>),
    /// Marker: the wrapped predicate keeps relational null semantics.
    NotNullable(Box<SqlExpr>),
    /// Marker: the wrapped predicate was derived from a discriminator.
    Discriminator(DiscriminatorPredicate),
}

impl SqlExpr {
    /// Column reference.
    pub fn column(name: impl Into<String>, table_alias: impl Into<String>, ty: SqlType) -> Self {
        SqlExpr::Column(ColumnExpr {
            name: name.into(),
            table_alias: table_alias.into(),
            ty,
            query_source: None,
        })
    }

    /// Column reference tagged with the query source of its table.
    pub fn source_column(
        name: impl Into<String>,
        table_alias: impl Into<String>,
        ty: SqlType,
        query_source: Option<QuerySource>,
    ) -> Self {
        SqlExpr::Column(ColumnExpr {
            name: name.into(),
            table_alias: table_alias.into(),
            ty,
            query_source,
        })
    }

    /// Literal.
    pub fn constant(value: impl Into<Value>) -> Self {
        SqlExpr::Constant(value.into())
    }

    /// Boolean literal.
    pub fn bool(value: bool) -> Self {
        SqlExpr::Constant(Value::Bool(value))
    }

    /// Parameter reference.
    pub fn parameter(name: impl Into<String>, ty: SqlType) -> Self {
        SqlExpr::Parameter(ParameterExpr {
            name: name.into(),
            ty,
        })
    }

    /// Named projection.
    pub fn alias(alias: impl Into<String>, expr: SqlExpr) -> Self {
        SqlExpr::Alias(AliasExpr {
            alias: Some(alias.into()),
            expr: Box::new(expr),
        })
    }

    /// Binary operation.
    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// `left = right`
    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    /// `left <> right`
    pub fn ne(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::Ne, left, right)
    }

    /// `left AND right`
    pub fn and(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    /// `left OR right`
    pub fn or(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    /// `NOT operand`
    #[allow(clippy::should_implement_trait)]
    pub fn not(operand: SqlExpr) -> Self {
        SqlExpr::Not(Box::new(operand))
    }

    /// `operand IS NULL`
    pub fn is_null(operand: SqlExpr) -> Self {
        SqlExpr::IsNull(Box::new(operand))
    }

    /// `operand IS NOT NULL`
    pub fn is_not_null(operand: SqlExpr) -> Self {
        Self::not(Self::is_null(operand))
    }

    /// `operand IN (values...)`
    pub fn in_list(operand: SqlExpr, values: Vec<SqlExpr>) -> Self {
        SqlExpr::In(InExpr {
            operand: Box::new(operand),
            values,
        })
    }

    /// `CAST(operand AS ty)`
    pub fn cast(operand: SqlExpr, ty: SqlType) -> Self {
        SqlExpr::Cast(CastExpr {
            operand: Box::new(operand),
            ty,
        })
    }

    /// `CASE WHEN test THEN TRUE ELSE FALSE END`
    pub fn case_bool(test: SqlExpr) -> Self {
        SqlExpr::Case(CaseExpr {
            whens: vec![CaseWhen {
                test,
                result: SqlExpr::bool(true),
            }],
            otherwise: Some(Box::new(SqlExpr::bool(false))),
        })
    }

    /// Folds a sequence of predicates with `AND`.
    pub fn and_all(predicates: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
        predicates.into_iter().reduce(SqlExpr::and)
    }

    /// Folds a sequence of predicates with `OR`.
    pub fn or_all(predicates: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
        predicates.into_iter().reduce(SqlExpr::or)
    }

    /// Relational type of the expression.
    pub fn sql_type(&self) -> SqlType {
        match self {
            SqlExpr::Column(col) => col.ty,
            SqlExpr::Alias(alias) => alias.expr.sql_type(),
            SqlExpr::Constant(value) => match value.kind() {
                Some(kind) => SqlType::required(kind),
                None => SqlType::optional(ValueKind::Any),
            },
            SqlExpr::Parameter(param) => param.ty,
            SqlExpr::Binary(bin) => {
                let left = bin.left.sql_type();
                let right = bin.right.sql_type();
                let nullable = left.nullable || right.nullable;
                if bin.op.is_comparison() || bin.op.is_logical() {
                    SqlType {
                        kind: ValueKind::Bool,
                        nullable,
                    }
                } else {
                    let kind = if left.kind == ValueKind::Any {
                        right.kind
                    } else {
                        left.kind
                    };
                    SqlType { kind, nullable }
                }
            }
            SqlExpr::Not(operand) => operand.sql_type(),
            SqlExpr::IsNull(_) | SqlExpr::Exists(_) => SqlType::boolean(),
            SqlExpr::In(expr) => SqlType {
                kind: ValueKind::Bool,
                nullable: expr.operand.is_nullable(),
            },
            SqlExpr::Case(case) => {
                let mut ty = case
                    .whens
                    .first()
                    .map(|w| w.result.sql_type())
                    .unwrap_or(SqlType::optional(ValueKind::Any));
                let nullable = case.otherwise.as_ref().map_or(true, |e| e.is_nullable())
                    || case.whens.iter().any(|w| w.result.is_nullable());
                ty.nullable = nullable;
                ty
            }
            SqlExpr::Function(func) => func.ty,
            SqlExpr::Cast(cast) => cast.ty,
            SqlExpr::Aggregate(agg) => agg.ty,
            SqlExpr::Subquery(select) => select
                .projection()
                .first()
                .map(|e| e.sql_type().as_nullable())
                .unwrap_or(SqlType::optional(ValueKind::Any)),
            SqlExpr::NotNullable(inner) => inner.sql_type(),
            SqlExpr::Discriminator(_) => SqlType::boolean(),
        }
    }

    /// True when the expression may evaluate to NULL.
    pub fn is_nullable(&self) -> bool {
        self.sql_type().nullable
    }

    /// True for boolean-typed expressions.
    pub fn is_boolean(&self) -> bool {
        self.sql_type().kind == ValueKind::Bool
    }

    /// True for a binary comparison.
    pub fn is_comparison(&self) -> bool {
        matches!(self, SqlExpr::Binary(bin) if bin.op.is_comparison())
    }

    /// True for `AND` and `OR` nodes.
    pub fn is_logical(&self) -> bool {
        matches!(self, SqlExpr::Binary(bin) if bin.op.is_logical())
    }

    /// Matches a boolean literal.
    pub fn as_bool_constant(&self) -> Option<bool> {
        match self {
            SqlExpr::Constant(Value::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// True for the `NULL` literal.
    pub fn is_null_constant(&self) -> bool {
        matches!(self, SqlExpr::Constant(Value::Null))
    }

    /// Name under which the expression is visible from an enclosing query.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            SqlExpr::Alias(AliasExpr {
                alias: Some(alias), ..
            }) => Some(alias),
            SqlExpr::Alias(AliasExpr { alias: None, expr }) => expr.column_name(),
            SqlExpr::Column(col) => Some(&col.name),
            SqlExpr::NotNullable(inner) => inner.column_name(),
            _ => None,
        }
    }

    /// Strips an [`SqlExpr::Alias`] wrapper.
    pub fn unwrap_alias(&self) -> &SqlExpr {
        match self {
            SqlExpr::Alias(alias) => alias.expr.unwrap_alias(),
            other => other,
        }
    }

    /// Query source of the underlying column, if this resolves to one.
    pub fn query_source(&self) -> Option<QuerySource> {
        match self.unwrap_alias() {
            SqlExpr::Column(col) => col.query_source,
            _ => None,
        }
    }

    /// Rebuilds the node with every direct child passed through `f`.
    /// Nested subqueries are left untouched.
    pub fn map_children<F>(self, f: &mut F) -> SqlExpr
    where
        F: FnMut(SqlExpr) -> SqlExpr,
    {
        match self {
            SqlExpr::Alias(AliasExpr { alias, expr }) => SqlExpr::Alias(AliasExpr {
                alias,
                expr: Box::new(f(*expr)),
            }),
            SqlExpr::Binary(BinaryExpr { op, left, right }) => {
                let left = f(*left);
                let right = f(*right);
                SqlExpr::binary(op, left, right)
            }
            SqlExpr::Not(operand) => SqlExpr::Not(Box::new(f(*operand))),
            SqlExpr::IsNull(operand) => SqlExpr::IsNull(Box::new(f(*operand))),
            SqlExpr::In(InExpr { operand, values }) => SqlExpr::In(InExpr {
                operand: Box::new(f(*operand)),
                values: values.into_iter().map(&mut *f).collect(),
            }),
            SqlExpr::Case(CaseExpr { whens, otherwise }) => SqlExpr::Case(CaseExpr {
                whens: whens
                    .into_iter()
                    .map(|w| CaseWhen {
                        test: f(w.test),
                        result: f(w.result),
                    })
                    .collect(),
                otherwise: otherwise.map(|e| Box::new(f(*e))),
            }),
            SqlExpr::Function(FunctionExpr { name, args, ty }) => SqlExpr::Function(FunctionExpr {
                name,
                args: args.into_iter().map(&mut *f).collect(),
                ty,
            }),
            SqlExpr::Cast(CastExpr { operand, ty }) => SqlExpr::Cast(CastExpr {
                operand: Box::new(f(*operand)),
                ty,
            }),
            SqlExpr::Aggregate(AggregateExpr {
                function,
                operand,
                ty,
            }) => SqlExpr::Aggregate(AggregateExpr {
                function,
                operand: operand.map(|e| Box::new(f(*e))),
                ty,
            }),
            SqlExpr::NotNullable(inner) => SqlExpr::NotNullable(Box::new(f(*inner))),
            SqlExpr::Discriminator(DiscriminatorPredicate {
                predicate,
                query_source,
            }) => SqlExpr::Discriminator(DiscriminatorPredicate {
                predicate: Box::new(f(*predicate)),
                query_source,
            }),
            leaf @ (SqlExpr::Column(_)
            | SqlExpr::Constant(_)
            | SqlExpr::Parameter(_)
            | SqlExpr::Exists(_)
            | SqlExpr::Subquery(_)) => leaf,
        }
    }

    /// Bottom-up rewrite: children first, then `f` on the rebuilt node.
    pub fn transform_up<F>(self, f: &mut F) -> SqlExpr
    where
        F: FnMut(SqlExpr) -> SqlExpr,
    {
        let rebuilt = self.map_children(&mut |child| child.transform_up(f));
        f(rebuilt)
    }

    /// Pre-order walk over this expression, without entering subqueries.
    pub fn visit<F>(&self, f: &mut F)
    where
        F: FnMut(&SqlExpr),
    {
        f(self);
        match self {
            SqlExpr::Alias(alias) => alias.expr.visit(f),
            SqlExpr::Binary(bin) => {
                bin.left.visit(f);
                bin.right.visit(f);
            }
            SqlExpr::Not(e) | SqlExpr::IsNull(e) | SqlExpr::NotNullable(e) => e.visit(f),
            SqlExpr::In(expr) => {
                expr.operand.visit(f);
                expr.values.iter().for_each(|v| v.visit(f));
            }
            SqlExpr::Case(case) => {
                for when in &case.whens {
                    when.test.visit(f);
                    when.result.visit(f);
                }
                if let Some(otherwise) = &case.otherwise {
                    otherwise.visit(f);
                }
            }
            SqlExpr::Function(func) => func.args.iter().for_each(|a| a.visit(f)),
            SqlExpr::Cast(cast) => cast.operand.visit(f),
            SqlExpr::Aggregate(agg) => {
                if let Some(operand) = &agg.operand {
                    operand.visit(f);
                }
            }
            SqlExpr::Discriminator(disc) => disc.predicate.visit(f),
            SqlExpr::Column(_)
            | SqlExpr::Constant(_)
            | SqlExpr::Parameter(_)
            | SqlExpr::Exists(_)
            | SqlExpr::Subquery(_) => {}
        }
    }

    /// Applies `f` to every column reference, including those inside subqueries.
    pub fn for_each_column_mut(&mut self, f: &mut dyn FnMut(&mut ColumnExpr)) {
        match self {
            SqlExpr::Column(col) => f(col),
            SqlExpr::Alias(alias) => alias.expr.for_each_column_mut(f),
            SqlExpr::Binary(bin) => {
                bin.left.for_each_column_mut(f);
                bin.right.for_each_column_mut(f);
            }
            SqlExpr::Not(e) | SqlExpr::IsNull(e) | SqlExpr::NotNullable(e) => {
                e.for_each_column_mut(f)
            }
            SqlExpr::In(expr) => {
                expr.operand.for_each_column_mut(f);
                expr.values.iter_mut().for_each(|v| v.for_each_column_mut(f));
            }
            SqlExpr::Case(case) => {
                for when in &mut case.whens {
                    when.test.for_each_column_mut(f);
                    when.result.for_each_column_mut(f);
                }
                if let Some(otherwise) = &mut case.otherwise {
                    otherwise.for_each_column_mut(f);
                }
            }
            SqlExpr::Function(func) => func.args.iter_mut().for_each(|a| a.for_each_column_mut(f)),
            SqlExpr::Cast(cast) => cast.operand.for_each_column_mut(f),
            SqlExpr::Aggregate(agg) => {
                if let Some(operand) = &mut agg.operand {
                    operand.for_each_column_mut(f);
                }
            }
            SqlExpr::Discriminator(disc) => disc.predicate.for_each_column_mut(f),
            SqlExpr::Exists(select) | SqlExpr::Subquery(select) => select.for_each_column_mut(f),
            SqlExpr::Constant(_) | SqlExpr::Parameter(_) => {}
        }
    }

    /// Calls `f` on every column reference, including those inside subqueries.
    pub fn for_each_column(&self, f: &mut dyn FnMut(&ColumnExpr)) {
        self.visit(&mut |expr| match expr {
            SqlExpr::Column(col) => f(col),
            SqlExpr::Exists(select) | SqlExpr::Subquery(select) => select.for_each_column(f),
            _ => {}
        });
    }
}

/// Re-expresses `expr`, projected by the subquery aliased `subquery_alias`,
/// as a column of that subquery.
pub fn lift_expression_from_subquery(expr: &SqlExpr, subquery_alias: &str) -> Option<SqlExpr> {
    let name = expr.column_name()?;
    Some(SqlExpr::source_column(
        name,
        subquery_alias,
        expr.sql_type(),
        expr.query_source(),
    ))
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One `ORDER BY` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Ordering {
    /// Sort key.
    pub expr: SqlExpr,
    /// Direction.
    pub direction: OrderDirection,
}

impl Ordering {
    /// Ascending ordering on `expr`.
    pub fn asc(expr: SqlExpr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Asc,
        }
    }

    /// Descending ordering on `expr`.
    pub fn desc(expr: SqlExpr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Desc,
        }
    }
}

/// Base table reference.
#[derive(Clone, Debug, PartialEq)]
pub struct TableExpression {
    /// Table name.
    pub name: String,
    /// Optional schema.
    pub schema: Option<String>,
    /// Alias in the enclosing statement.
    pub alias: String,
    /// Query source the table serves.
    pub query_source: Option<QuerySource>,
}

impl TableExpression {
    /// Table reference without a schema.
    pub fn new(
        name: impl Into<String>,
        alias: impl Into<String>,
        query_source: Option<QuerySource>,
    ) -> Self {
        Self {
            name: name.into(),
            schema: None,
            alias: alias.into(),
            query_source,
        }
    }
}

/// Join flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinKind {
    /// `INNER JOIN ... ON`
    Inner,
    /// `LEFT JOIN ... ON`
    LeftOuter,
    /// `CROSS JOIN`
    Cross,
    /// `CROSS JOIN LATERAL`
    CrossLateral,
}

impl JoinKind {
    /// True for joins that carry an `ON` predicate.
    pub fn has_predicate(self) -> bool {
        matches!(self, JoinKind::Inner | JoinKind::LeftOuter)
    }
}

/// Join wrapping a table or subquery.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinExpr {
    /// Join flavour.
    pub kind: JoinKind,
    /// Joined table.
    pub table: Box<TableExpr>,
    /// `ON` predicate for predicate joins.
    pub predicate: Option<SqlExpr>,
    /// Alias, taken from the joined table at construction.
    pub alias: String,
}

impl JoinExpr {
    /// Wraps `table` in a join of `kind`.
    pub fn new(kind: JoinKind, table: TableExpr) -> Self {
        let alias = table.alias().unwrap_or_default().to_owned();
        Self {
            kind,
            table: Box::new(table),
            predicate: None,
            alias,
        }
    }
}

/// Entry of a select's `FROM` list.
#[derive(Clone, Debug, PartialEq)]
pub enum TableExpr {
    /// Base table.
    Table(TableExpression),
    /// Derived table.
    Select(Box<SelectExpression>),
    /// Join node.
    Join(JoinExpr),
}

impl TableExpr {
    /// Alias the table is referenced by.
    pub fn alias(&self) -> Option<&str> {
        match self {
            TableExpr::Table(table) => Some(&table.alias),
            TableExpr::Select(select) => select.alias(),
            TableExpr::Join(join) => Some(&join.alias),
        }
    }

    /// Renames the table. Joins rename their wrapped table as well.
    pub fn set_alias(&mut self, alias: impl Into<String>) {
        let alias = alias.into();
        match self {
            TableExpr::Table(table) => table.alias = alias,
            TableExpr::Select(select) => select.set_alias(Some(alias)),
            TableExpr::Join(join) => {
                join.table.set_alias(alias.clone());
                join.alias = alias;
            }
        }
    }

    /// Query source the table was created for.
    pub fn query_source(&self) -> Option<QuerySource> {
        match self {
            TableExpr::Table(table) => table.query_source,
            TableExpr::Select(select) => select.query_source(),
            TableExpr::Join(join) => join.table.query_source(),
        }
    }

    /// True when the table, or anything nested in it, serves `source`.
    pub fn handles_query_source(&self, source: QuerySource) -> bool {
        match self {
            TableExpr::Table(table) => table.query_source == Some(source),
            TableExpr::Select(select) => select.handles_query_source(source),
            TableExpr::Join(join) => join.table.handles_query_source(source),
        }
    }

    /// The table beneath any join wrapper.
    pub fn unwrap_join(&self) -> &TableExpr {
        match self {
            TableExpr::Join(join) => join.table.unwrap_join(),
            other => other,
        }
    }

    /// Mutable access to the table beneath any join wrapper.
    pub fn unwrap_join_mut(&mut self) -> &mut TableExpr {
        match self {
            TableExpr::Join(join) => join.table.unwrap_join_mut(),
            other => other,
        }
    }

    /// Every table alias declared by this entry, recursively.
    pub fn collect_aliases(&self, out: &mut Vec<String>) {
        match self {
            TableExpr::Table(table) => out.push(table.alias.clone()),
            TableExpr::Select(select) => {
                if let Some(alias) = select.alias() {
                    out.push(alias.to_owned());
                }
                select.collect_table_aliases(out);
            }
            TableExpr::Join(join) => {
                if join.table.alias() != Some(join.alias.as_str()) {
                    out.push(join.alias.clone());
                }
                join.table.collect_aliases(out);
            }
        }
    }

    pub(crate) fn for_each_column_mut(&mut self, f: &mut dyn FnMut(&mut ColumnExpr)) {
        match self {
            TableExpr::Table(_) => {}
            TableExpr::Select(select) => select.for_each_column_mut(f),
            TableExpr::Join(join) => {
                join.table.for_each_column_mut(f);
                if let Some(predicate) = &mut join.predicate {
                    predicate.for_each_column_mut(f);
                }
            }
        }
    }

    pub(crate) fn for_each_column(&self, f: &mut dyn FnMut(&ColumnExpr)) {
        match self {
            TableExpr::Table(_) => {}
            TableExpr::Select(select) => select.for_each_column(f),
            TableExpr::Join(join) => {
                join.table.for_each_column(f);
                if let Some(predicate) = &join.predicate {
                    predicate.for_each_column(f);
                }
            }
        }
    }

    /// Renames table declarations only; column references are handled by the
    /// owning select.
    pub(crate) fn rename_declarations(&mut self, old: &str, new: &str) {
        match self {
            TableExpr::Table(table) => {
                if table.alias == old {
                    table.alias = new.to_owned();
                }
            }
            TableExpr::Select(select) => {
                if select.alias() == Some(old) {
                    select.set_alias(Some(new.to_owned()));
                }
                select.rename_declarations(old, new);
            }
            TableExpr::Join(join) => {
                if join.alias == old {
                    join.alias = new.to_owned();
                }
                join.table.rename_declarations(old, new);
            }
        }
    }
}
