//! Runs compiled queries against a relational connection.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{PenumbraError, Result};
use crate::query::compiler::CompiledQuery;
use crate::query::entity::{EntityRef, QueryContext, RelatedGroups};
use crate::query::operators::{CompiledInclude, KeySelector, QueryOperator, RelatedLoader};
use crate::query::shaper::{ResultSelector, Shaped, Shaper};
use crate::query::sql::{RelationalCommand, SelectExpression, SqlGenerator};
use crate::value::{KeyValue, Value, ValueBuffer};

/// Source of rows for relational commands.
pub trait RelationalConnection: Send + Sync {
    /// Executes `command` with `parameters` bound and returns the decoded rows.
    fn execute(
        &self,
        command: &RelationalCommand,
        parameters: &BTreeMap<String, Value>,
    ) -> Result<Vec<ValueBuffer>>;
}

/// Executes compiled queries.
pub struct QueryExecutor {
    connection: Arc<dyn RelationalConnection>,
    generator: Arc<dyn SqlGenerator>,
}

impl QueryExecutor {
    /// Executor issuing commands rendered by `generator` over `connection`.
    pub fn new(connection: Arc<dyn RelationalConnection>, generator: Arc<dyn SqlGenerator>) -> Self {
        Self {
            connection,
            generator,
        }
    }

    /// Runs `query` and returns its shaped results in row order.
    pub fn execute(&self, query: &CompiledQuery, ctx: &mut QueryContext) -> Result<Vec<Shaped>> {
        ctx.buffer_mut().clear();
        let results = self.run(query.root(), ctx, &[])?;
        debug!(results = results.len(), "executor.completed");
        Ok(results)
    }

    fn rows(&self, select: &SelectExpression, ctx: &QueryContext) -> Result<Vec<ValueBuffer>> {
        let command = self.generator.generate(select)?;
        debug!(sql = %command.text, "executor.command");
        self.connection.execute(&command, ctx.parameters())
    }

    fn run(
        &self,
        op: &QueryOperator,
        ctx: &mut QueryContext,
        includes: &[CompiledInclude],
    ) -> Result<Vec<Shaped>> {
        match op {
            QueryOperator::ShapedQuery { select, shaper } => {
                let rows = self.rows(select, ctx)?;
                let mut results = Vec::with_capacity(rows.len());
                for row in &rows {
                    let shaped = shaper.shape(ctx, row)?;
                    self.apply_includes(includes, &shaped, row, ctx)?;
                    results.push(shaped);
                }
                Ok(results)
            }
            QueryOperator::IncludeCompiled {
                source,
                includes: own,
            } => {
                let combined: Vec<CompiledInclude> =
                    includes.iter().chain(own.iter()).cloned().collect();
                self.run(source, ctx, &combined)
            }
            QueryOperator::GroupJoinQuery {
                select,
                shaper,
                result_selector,
                outer_includes,
                inner_includes,
            } => {
                reject_includes(includes)?;
                self.run_group_join(
                    select,
                    shaper,
                    result_selector,
                    outer_includes,
                    inner_includes,
                    ctx,
                )
            }
            QueryOperator::Include { .. } => {
                Err(PenumbraError::invariant("include reached the executor uncompiled"))
            }
            QueryOperator::DefaultIfEmpty(inner) => {
                reject_includes(includes)?;
                let results = self.run(inner, ctx, &[])?;
                if results.is_empty() {
                    Ok(vec![Shaped::Null])
                } else {
                    Ok(results)
                }
            }
            QueryOperator::Project {
                source,
                projector,
                ..
            } => {
                reject_includes(includes)?;
                trace!("executor.client_projection");
                self.run(source, ctx, &[])?
                    .into_iter()
                    .map(|result| projector.apply(result))
                    .collect()
            }
            QueryOperator::SelectMany {
                outer,
                inner,
                result_selector,
                ..
            } => {
                reject_includes(includes)?;
                trace!("executor.client_select_many");
                let outer = self.run(outer, ctx, &[])?;
                let inner = self.run(inner, ctx, &[])?;
                let mut results = Vec::with_capacity(outer.len() * inner.len());
                for o in &outer {
                    for i in &inner {
                        results.push(result_selector.apply(o.clone(), i.clone())?);
                    }
                }
                Ok(results)
            }
            QueryOperator::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result_selector,
                ..
            } => {
                reject_includes(includes)?;
                trace!("executor.client_join");
                let outer = self.run(outer, ctx, &[])?;
                let inner = self.run(inner, ctx, &[])?;
                let lookup = key_lookup(&inner, &inner_key.client)?;
                let mut results = Vec::new();
                for o in outer {
                    let Some(key) = outer_key.client.select(&o)? else {
                        continue;
                    };
                    for &index in lookup.get(&key).map(Vec::as_slice).unwrap_or(&[]) {
                        results.push(result_selector.apply(o.clone(), inner[index].clone())?);
                    }
                }
                Ok(results)
            }
            QueryOperator::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result_selector,
                ..
            } => {
                reject_includes(includes)?;
                trace!("executor.client_group_join");
                let outer = self.run(outer, ctx, &[])?;
                let inner = self.run(inner, ctx, &[])?;
                let lookup = key_lookup(&inner, &inner_key.client)?;
                let mut results = Vec::with_capacity(outer.len());
                for o in outer {
                    let matches = match outer_key.client.select(&o)? {
                        Some(key) => lookup
                            .get(&key)
                            .map(|indexes| indexes.iter().map(|&i| inner[i].clone()).collect())
                            .unwrap_or_default(),
                        None => Vec::new(),
                    };
                    results.push(result_selector.apply(o, Shaped::Sequence(matches))?);
                }
                Ok(results)
            }
        }
    }

    /// Groups consecutive rows of the same outer into one result.
    fn run_group_join(
        &self,
        select: &SelectExpression,
        shaper: &Shaper,
        result_selector: &ResultSelector,
        outer_includes: &[CompiledInclude],
        inner_includes: &[CompiledInclude],
        ctx: &mut QueryContext,
    ) -> Result<Vec<Shaped>> {
        let rows = self.rows(select, ctx)?;
        let mut results = Vec::new();
        let mut current: Option<(Shaped, Vec<Shaped>)> = None;
        for row in &rows {
            let Shaped::Grouping { key, elements } = shaper.shape(ctx, row)? else {
                return Err(PenumbraError::invariant("group join row did not shape a grouping"));
            };
            let key = *key;
            let continues = matches!(&current, Some((existing, _)) if *existing == key);
            if !continues {
                if let Some((done, members)) = current.take() {
                    results.push(result_selector.apply(done, Shaped::Sequence(members))?);
                }
                self.apply_includes(outer_includes, &key, row, ctx)?;
                current = Some((key, Vec::new()));
            }
            for element in elements {
                self.apply_includes(inner_includes, &element, row, ctx)?;
                if let Some((_, members)) = current.as_mut() {
                    members.push(element);
                }
            }
        }
        if let Some((done, members)) = current {
            results.push(result_selector.apply(done, Shaped::Sequence(members))?);
        }
        Ok(results)
    }

    fn apply_includes(
        &self,
        includes: &[CompiledInclude],
        shaped: &Shaped,
        row: &ValueBuffer,
        ctx: &mut QueryContext,
    ) -> Result<()> {
        for include in includes {
            match shaped.get(&include.accessor) {
                Some(Shaped::Entity(owner)) => {
                    let owner = Arc::clone(owner);
                    self.load(&include.loader, &owner, row, ctx)?;
                }
                Some(Shaped::Null) => {}
                _ => {
                    return Err(PenumbraError::invariant(
                        "include accessor does not address an entity",
                    ))
                }
            }
        }
        Ok(())
    }

    fn load(
        &self,
        loader: &RelatedLoader,
        owner: &EntityRef,
        row: &ValueBuffer,
        ctx: &mut QueryContext,
    ) -> Result<()> {
        match loader {
            RelatedLoader::Reference {
                navigation,
                shaper,
                next,
            } => {
                let related = shaper.shape_entity(ctx, row)?;
                owner.set_reference(&navigation.name, related.clone());
                if let (Some(related), Some(next)) = (related, next) {
                    self.load(next, &related, row, ctx)?;
                }
                Ok(())
            }
            RelatedLoader::Collection {
                navigation,
                principal_key,
                ..
            } => {
                let groups = self.related_groups(loader, ctx)?;
                owner.ensure_collection(&navigation.name);
                let key: Option<SmallVec<[KeyValue; 2]>> = principal_key
                    .iter()
                    .map(|property| owner.get(property).and_then(Value::key))
                    .collect();
                let Some(key) = key else {
                    return Ok(());
                };
                for related in groups.get(&key).map(Vec::as_slice).unwrap_or(&[]) {
                    owner.add_to_collection(&navigation.name, Arc::clone(related));
                }
                Ok(())
            }
        }
    }

    /// Runs a collection command once per query and groups its entities by
    /// the foreign key pointing at their principal.
    fn related_groups(
        &self,
        loader: &RelatedLoader,
        ctx: &mut QueryContext,
    ) -> Result<Arc<RelatedGroups>> {
        let RelatedLoader::Collection {
            query_index,
            select,
            shaper,
            correlation_indexes,
            next,
            ..
        } = loader
        else {
            return Err(PenumbraError::invariant("reference step has no related command"));
        };
        if let Some(groups) = ctx.buffer().related(*query_index) {
            return Ok(groups);
        }
        let rows = self.rows(select, ctx)?;
        let mut groups = RelatedGroups::default();
        for row in &rows {
            let Some(related) = shaper.shape_entity(ctx, row)? else {
                continue;
            };
            if let Some(next) = next {
                self.load(next, &related, row, ctx)?;
            }
            let mut key = SmallVec::with_capacity(correlation_indexes.len());
            for &index in correlation_indexes {
                match row.get(index)?.key() {
                    Some(value) => key.push(value),
                    None => break,
                }
            }
            if key.len() != correlation_indexes.len() {
                continue;
            }
            let members = groups.entry(key).or_insert_with(Vec::new);
            if !members.iter().any(|m| Arc::ptr_eq(m, &related)) {
                members.push(related);
            }
        }
        trace!(query_index, groups = groups.len(), "executor.related_loaded");
        Ok(ctx.buffer_mut().store_related(*query_index, groups))
    }
}

fn reject_includes(includes: &[CompiledInclude]) -> Result<()> {
    if includes.is_empty() {
        Ok(())
    } else {
        Err(PenumbraError::Unsupported(
            "include on a client-evaluated operator",
        ))
    }
}

fn key_lookup(results: &[Shaped], selector: &KeySelector) -> Result<FxHashMap<KeyValue, Vec<usize>>> {
    let mut lookup: FxHashMap<KeyValue, Vec<usize>> = FxHashMap::default();
    for (index, shaped) in results.iter().enumerate() {
        if let Some(key) = selector.select(shaped)? {
            lookup.entry(key).or_default().push(index);
        }
    }
    Ok(lookup)
}
