//! Command text generation.
//!
//! [`SqlGenerator`] is the seam dialect-specific generators plug into.
//! [`DefaultSqlGenerator`] renders ANSI-flavoured SQL with double-quoted
//! identifiers and `LIMIT`/`OFFSET` paging.

use std::fmt::Write as _;

use super::{
    AggregateFunction, BinaryOp, JoinKind, OrderDirection, SelectExpression, SqlExpr, TableExpr,
};
use crate::error::Result;
use crate::value::{Value, ValueKind};

/// Executable command text plus the parameter names it references, in order
/// of first appearance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationalCommand {
    /// SQL text.
    pub text: String,
    /// Referenced parameter names.
    pub parameters: Vec<String>,
}

/// Turns a finished select into command text.
pub trait SqlGenerator: Send + Sync {
    /// Renders `select`.
    fn generate(&self, select: &SelectExpression) -> Result<RelationalCommand>;
}

/// Dialect-agnostic generator.
#[derive(Clone, Debug)]
pub struct DefaultSqlGenerator {
    parameter_prefix: String,
}

impl Default for DefaultSqlGenerator {
    fn default() -> Self {
        Self {
            parameter_prefix: "@".to_owned(),
        }
    }
}

impl DefaultSqlGenerator {
    /// Generator using `@name` parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `prefix` in front of parameter names.
    pub fn with_parameter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.parameter_prefix = prefix.into();
        self
    }
}

impl SqlGenerator for DefaultSqlGenerator {
    fn generate(&self, select: &SelectExpression) -> Result<RelationalCommand> {
        let mut writer = Writer {
            out: String::new(),
            parameters: Vec::new(),
            prefix: &self.parameter_prefix,
        };
        writer.select(select);
        Ok(RelationalCommand {
            text: writer.out,
            parameters: writer.parameters,
        })
    }
}

const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_COMPARE: u8 = 4;
const PREC_ADD: u8 = 5;
const PREC_MUL: u8 = 6;
const PREC_ATOM: u8 = 7;

struct Writer<'a> {
    out: String,
    parameters: Vec<String>,
    prefix: &'a str,
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn is_predicate(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::Binary(bin) => bin.op.is_comparison() || bin.op.is_logical(),
        SqlExpr::Not(_)
        | SqlExpr::IsNull(_)
        | SqlExpr::In(_)
        | SqlExpr::Exists(_)
        | SqlExpr::Discriminator(_) => true,
        SqlExpr::NotNullable(inner) => is_predicate(inner),
        _ => false,
    }
}

fn type_name(kind: ValueKind) -> Option<&'static str> {
    Some(match kind {
        ValueKind::Bool => "BOOLEAN",
        ValueKind::Int => "BIGINT",
        ValueKind::Float => "DOUBLE PRECISION",
        ValueKind::String => "VARCHAR",
        ValueKind::Bytes => "VARBINARY",
        ValueKind::DateTime => "TIMESTAMP",
        ValueKind::Any => return None,
    })
}

impl Writer<'_> {
    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn select(&mut self, select: &SelectExpression) {
        self.push("SELECT ");
        if select.is_distinct() {
            self.push("DISTINCT ");
        }
        self.projection(select);

        if !select.tables().is_empty() {
            self.push(" FROM ");
            for (i, table) in select.tables().iter().enumerate() {
                match table {
                    TableExpr::Join(join) => {
                        self.push(match join.kind {
                            JoinKind::Inner => " INNER JOIN ",
                            JoinKind::LeftOuter => " LEFT JOIN ",
                            JoinKind::Cross => " CROSS JOIN ",
                            JoinKind::CrossLateral => " CROSS JOIN LATERAL ",
                        });
                        self.table(&join.table);
                        if join.kind.has_predicate() {
                            self.push(" ON ");
                            match &join.predicate {
                                Some(predicate) => self.expr(predicate, 0),
                                None => self.push("TRUE"),
                            }
                        }
                    }
                    other => {
                        if i > 0 {
                            self.push(", ");
                        }
                        self.table(other);
                    }
                }
            }
        }

        if let Some(predicate) = select.predicate() {
            self.push(" WHERE ");
            self.expr(predicate, 0);
        }

        if !select.order_by().is_empty() {
            self.push(" ORDER BY ");
            for (i, ordering) in select.order_by().iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(ordering.expr.unwrap_alias(), 0);
                if ordering.direction == OrderDirection::Desc {
                    self.push(" DESC");
                }
            }
        }

        if let Some(limit) = select.limit() {
            self.push(" LIMIT ");
            self.expr(limit, PREC_ATOM);
        }
        if let Some(offset) = select.offset() {
            self.push(" OFFSET ");
            self.expr(offset, PREC_ATOM);
        }
    }

    fn projection(&mut self, select: &SelectExpression) {
        let mut first = true;
        let star = select.star_projection();
        if select.is_project_star() && star.is_empty() {
            match select.tables() {
                [only] => {
                    let alias = only.alias().unwrap_or_default();
                    let _ = write!(self.out, "{}.*", quote(alias));
                }
                _ => self.push("*"),
            }
            first = false;
        }
        let items = if select.is_project_star() { star } else { &[] };
        for item in items.iter().chain(select.explicit_projection()) {
            if !first {
                self.push(", ");
            }
            first = false;
            self.projection_item(item);
        }
        if first {
            self.push("1");
        }
    }

    fn projection_item(&mut self, item: &SqlExpr) {
        let (inner, alias) = match item {
            SqlExpr::Alias(alias) => (alias.expr.as_ref(), alias.alias.as_deref()),
            other => (other, None),
        };
        if is_predicate(inner) {
            self.push("CASE WHEN ");
            self.expr(inner, 0);
            self.push(" THEN TRUE ELSE FALSE END");
        } else {
            self.expr(inner, 0);
        }
        let implied = matches!(inner, SqlExpr::Column(col) if Some(col.name.as_str()) == alias);
        if let Some(alias) = alias.filter(|_| !implied) {
            self.push(" AS ");
            self.push(&quote(alias));
        }
    }

    fn table(&mut self, table: &TableExpr) {
        match table {
            TableExpr::Table(table) => {
                if let Some(schema) = &table.schema {
                    self.push(&quote(schema));
                    self.push(".");
                }
                self.push(&quote(&table.name));
                self.push(" AS ");
                self.push(&quote(&table.alias));
            }
            TableExpr::Select(select) => {
                self.push("(");
                self.select(select);
                self.push(")");
                if let Some(alias) = select.alias() {
                    self.push(" AS ");
                    self.push(&quote(alias));
                }
            }
            TableExpr::Join(join) => self.table(&join.table),
        }
    }

    fn literal(&mut self, value: &Value) {
        match value {
            Value::Null => self.push("NULL"),
            Value::Bool(true) => self.push("TRUE"),
            Value::Bool(false) => self.push("FALSE"),
            Value::Int(v) => {
                let _ = write!(self.out, "{v}");
            }
            Value::Float(v) => {
                let _ = write!(self.out, "{v:?}");
            }
            Value::String(v) => {
                let _ = write!(self.out, "'{}'", v.replace('\'', "''"));
            }
            Value::Bytes(bytes) => {
                self.push("X'");
                for byte in bytes {
                    let _ = write!(self.out, "{byte:02X}");
                }
                self.push("'");
            }
            Value::DateTime(v) => {
                let _ = write!(self.out, "{v}");
            }
        }
    }

    fn open(&mut self, prec: u8, parent: u8) {
        if prec < parent {
            self.push("(");
        }
    }

    fn close(&mut self, prec: u8, parent: u8) {
        if prec < parent {
            self.push(")");
        }
    }

    fn expr(&mut self, expr: &SqlExpr, parent: u8) {
        match expr {
            SqlExpr::Column(col) => {
                self.push(&quote(&col.table_alias));
                self.push(".");
                self.push(&quote(&col.name));
            }
            SqlExpr::Alias(alias) => self.expr(&alias.expr, parent),
            SqlExpr::Constant(value) => self.literal(value),
            SqlExpr::Parameter(param) => {
                if !self.parameters.contains(&param.name) {
                    self.parameters.push(param.name.clone());
                }
                let text = format!("{}{}", self.prefix, param.name);
                self.push(&text);
            }
            SqlExpr::Binary(bin) => {
                let (prec, symbol) = match bin.op {
                    BinaryOp::Or => (PREC_OR, " OR "),
                    BinaryOp::And => (PREC_AND, " AND "),
                    BinaryOp::Eq => (PREC_COMPARE, " = "),
                    BinaryOp::Ne => (PREC_COMPARE, " <> "),
                    BinaryOp::Lt => (PREC_COMPARE, " < "),
                    BinaryOp::Le => (PREC_COMPARE, " <= "),
                    BinaryOp::Gt => (PREC_COMPARE, " > "),
                    BinaryOp::Ge => (PREC_COMPARE, " >= "),
                    BinaryOp::Add => (PREC_ADD, " + "),
                    BinaryOp::Subtract => (PREC_ADD, " - "),
                    BinaryOp::Multiply => (PREC_MUL, " * "),
                    BinaryOp::Divide => (PREC_MUL, " / "),
                };
                let (left_prec, right_prec) = if bin.op.is_logical() {
                    (prec, prec)
                } else {
                    (prec, prec + 1)
                };
                self.open(prec, parent);
                self.expr(&bin.left, left_prec);
                self.push(symbol);
                self.expr(&bin.right, right_prec);
                self.close(prec, parent);
            }
            SqlExpr::Not(operand) => match operand.as_ref() {
                SqlExpr::IsNull(inner) => {
                    self.open(PREC_COMPARE, parent);
                    self.expr(inner, PREC_ADD);
                    self.push(" IS NOT NULL");
                    self.close(PREC_COMPARE, parent);
                }
                SqlExpr::In(list) => self.in_list(&list.operand, &list.values, true, parent),
                other => {
                    self.open(PREC_NOT, parent);
                    self.push("NOT ");
                    self.expr(other, PREC_COMPARE + 1);
                    self.close(PREC_NOT, parent);
                }
            },
            SqlExpr::IsNull(operand) => {
                self.open(PREC_COMPARE, parent);
                self.expr(operand, PREC_ADD);
                self.push(" IS NULL");
                self.close(PREC_COMPARE, parent);
            }
            SqlExpr::In(list) => self.in_list(&list.operand, &list.values, false, parent),
            SqlExpr::Case(case) => {
                self.push("CASE");
                for when in &case.whens {
                    self.push(" WHEN ");
                    self.expr(&when.test, 0);
                    self.push(" THEN ");
                    self.expr(&when.result, 0);
                }
                if let Some(otherwise) = &case.otherwise {
                    self.push(" ELSE ");
                    self.expr(otherwise, 0);
                }
                self.push(" END");
            }
            SqlExpr::Function(func) => {
                self.push(&func.name);
                self.push("(");
                for (i, arg) in func.args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(arg, 0);
                }
                self.push(")");
            }
            SqlExpr::Cast(cast) => match type_name(cast.ty.kind) {
                Some(name) => {
                    self.push("CAST(");
                    self.expr(&cast.operand, 0);
                    self.push(" AS ");
                    self.push(name);
                    self.push(")");
                }
                None => self.expr(&cast.operand, parent),
            },
            SqlExpr::Aggregate(agg) => {
                self.push(match agg.function {
                    AggregateFunction::Count => "COUNT(",
                    AggregateFunction::Sum => "SUM(",
                    AggregateFunction::Min => "MIN(",
                    AggregateFunction::Max => "MAX(",
                    AggregateFunction::Avg => "AVG(",
                });
                match &agg.operand {
                    Some(operand) => self.expr(operand, 0),
                    None => self.push("*"),
                }
                self.push(")");
            }
            SqlExpr::Exists(select) => {
                self.push("EXISTS (");
                self.select(select);
                self.push(")");
            }
            SqlExpr::Subquery(select) => {
                self.push("(");
                self.select(select);
                self.push(")");
            }
            SqlExpr::NotNullable(inner) => self.expr(inner, parent),
            SqlExpr::Discriminator(disc) => self.expr(&disc.predicate, parent),
        }
    }

    fn in_list(&mut self, operand: &SqlExpr, values: &[SqlExpr], negated: bool, parent: u8) {
        if values.is_empty() {
            self.push(if negated { "TRUE" } else { "FALSE" });
            return;
        }
        self.open(PREC_COMPARE, parent);
        self.expr(operand, PREC_ADD);
        self.push(if negated { " NOT IN (" } else { " IN (" });
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(value, 0);
        }
        self.push(")");
        self.close(PREC_COMPARE, parent);
    }
}
