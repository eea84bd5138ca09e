//! Shared models and a scripted connection for the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use penumbra::query::sql::{DefaultSqlGenerator, RelationalCommand, SqlExpr};
use penumbra::query::{QueryExecutor, RelationalConnection};
use penumbra::{
    EntityType, ForeignKey, InMemoryModel, Navigation, Property, Result, SqlType, Value,
    ValueBuffer, ValueKind,
};

/// Customers with orders and an optional address.
pub fn store_model() -> Arc<InMemoryModel> {
    let orders = ForeignKey::new("Order", ["CustomerId"], "Customer", ["Id"]).required();
    let address = ForeignKey::new("Address", ["CustomerId"], "Customer", ["Id"]);
    Arc::new(
        InMemoryModel::new()
            .with_entity(
                EntityType::new("Customer")
                    .table("Customers")
                    .property(Property::new("Id", ValueKind::Int))
                    .property(Property::new("Name", ValueKind::String))
                    .key(["Id"])
                    .navigation(Navigation::to_dependents("Orders", orders.clone()))
                    .navigation(Navigation::to_dependent("Address", address.clone())),
            )
            .with_entity(
                EntityType::new("Order")
                    .table("Orders")
                    .property(Property::new("Id", ValueKind::Int))
                    .property(Property::new("CustomerId", ValueKind::Int))
                    .property(Property::new("Total", ValueKind::Float))
                    .key(["Id"])
                    .navigation(Navigation::to_principal("Customer", orders)),
            )
            .with_entity(
                EntityType::new("Address")
                    .table("Addresses")
                    .property(Property::new("Id", ValueKind::Int))
                    .property(Property::new("CustomerId", ValueKind::Int).nullable())
                    .property(Property::new("City", ValueKind::String))
                    .key(["Id"])
                    .navigation(Navigation::to_principal("Customer", address)),
            ),
    )
}

/// Employee hierarchy in one table: `A` employees, `B` managers, `C` directors.
pub fn staff_model() -> Arc<InMemoryModel> {
    Arc::new(
        InMemoryModel::new()
            .with_entity(
                EntityType::new("Employee")
                    .table("Employees")
                    .property(Property::new("Id", ValueKind::Int))
                    .property(Property::new("Kind", ValueKind::String))
                    .property(Property::new("Name", ValueKind::String))
                    .key(["Id"])
                    .discriminator("Kind")
                    .discriminator_value("A"),
            )
            .with_entity(
                EntityType::new("Manager")
                    .derives_from("Employee")
                    .property(Property::new("Reports", ValueKind::Int).nullable())
                    .discriminator_value("B"),
            )
            .with_entity(
                EntityType::new("Director")
                    .derives_from("Manager")
                    .property(Property::new("Budget", ValueKind::Float).nullable())
                    .discriminator_value("C"),
            ),
    )
}

/// `Alpha -> Beta -> Gamma`, every relationship required.
pub fn chain_model() -> Arc<InMemoryModel> {
    let beta = ForeignKey::new("Alpha", ["BetaId"], "Beta", ["Id"]).required();
    let gamma = ForeignKey::new("Beta", ["GammaId"], "Gamma", ["Id"]).required();
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

/// Column reference typed as a required int.
pub fn int_column(name: &str, alias: &str) -> SqlExpr {
    SqlExpr::column(name, alias, SqlType::required(ValueKind::Int))
}

/// Answers commands with scripted row sets, in issue order, and records
/// every command text.
#[derive(Default)]
pub struct ScriptedConnection {
    responses: Mutex<VecDeque<Vec<ValueBuffer>>>,
    issued: Mutex<Vec<String>>,
}

impl ScriptedConnection {
    /// Connection answering the n-th command with the n-th row set.
    pub fn new(responses: Vec<Vec<Vec<Value>>>) -> Arc<Self> {
        let responses = responses
            .into_iter()
            .map(|rows| rows.into_iter().map(ValueBuffer::new).collect())
            .collect();
        Arc::new(Self {
            responses: Mutex::new(responses),
            issued: Mutex::new(Vec::new()),
        })
    }

    /// Command texts issued so far.
    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().clone()
    }
}

impl RelationalConnection for ScriptedConnection {
    fn execute(
        &self,
        command: &RelationalCommand,
        _parameters: &BTreeMap<String, Value>,
    ) -> Result<Vec<ValueBuffer>> {
        self.issued.lock().push(command.text.clone());
        Ok(self.responses.lock().pop_front().unwrap_or_default())
    }
}

/// Executor over `connection` with the default generator.
pub fn executor(connection: &Arc<ScriptedConnection>) -> QueryExecutor {
    QueryExecutor::new(connection.clone(), Arc::new(DefaultSqlGenerator::new()))
}

/// Renders a single command.
pub fn render(select: &penumbra::query::sql::SelectExpression) -> String {
    use penumbra::query::sql::SqlGenerator;
    DefaultSqlGenerator::new()
        .generate(select)
        .map(|command| command.text)
        .unwrap_or_default()
}
