//! Compiler entry point: operator tree in, frozen commands and shapers out.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::config::CompilerOptions;
use crate::error::{PenumbraError, Result};
use crate::metadata::ModelMetadata;
use crate::query::flatten::QueryFlattener;
use crate::query::include::{alias_base, IncludeRewriter};
use crate::query::materializer::{Materializer, MaterializerFactory};
use crate::query::operators::QueryOperator;
use crate::query::optimize::PredicateOptimizer;
use crate::query::shaper::{EntityShaper, Shaper, ValueBufferShaper};
use crate::query::source::{QuerySource, QuerySourceMapping};
use crate::query::sql::{RelationalCommand, SelectExpression, SqlGenerator, TableExpr, TableExpression};

/// Compiles one query. Sources handed out by [`QueryCompiler::new_query_source`]
/// are unique within the compiler.
pub struct QueryCompiler {
    model: Arc<dyn ModelMetadata>,
    options: CompilerOptions,
    mapping: QuerySourceMapping,
    next_source: u32,
}

impl QueryCompiler {
    /// Compiler over `model`.
    pub fn new(model: Arc<dyn ModelMetadata>, options: CompilerOptions) -> Self {
        Self {
            model,
            options,
            mapping: QuerySourceMapping::new(),
            next_source: 0,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Current source mapping.
    pub fn mapping(&self) -> &QuerySourceMapping {
        &self.mapping
    }

    /// Allocates a fresh query source.
    pub fn new_query_source(&mut self) -> QuerySource {
        let source = QuerySource(self.next_source);
        self.next_source += 1;
        source
    }

    /// Single-command query over every row of `entity_type`, served by `source`.
    pub fn entity_query(&mut self, entity_type: &str, source: QuerySource) -> Result<QueryOperator> {
        let (select, materializer) = self.entity_select(entity_type, source)?;
        let root = self.model.root_type(entity_type)?;
        let mut key_indexes = Vec::new();
        for property in self.model.primary_key(entity_type)? {
            key_indexes.push(
                materializer
                    .index_of(&property.name)
                    .ok_or_else(|| PenumbraError::invariant("key property was not projected"))?,
            );
        }
        let shaper = EntityShaper::new(
            source,
            entity_type,
            root.name.clone(),
            key_indexes,
            self.options.is_tracking(),
            materializer,
        );
        self.mapping.add_root(source);
        Ok(QueryOperator::ShapedQuery {
            select,
            shaper: Shaper::Entity(shaper),
        })
    }

    /// Single-command query reading only `properties` of every row of
    /// `entity_type`. Results are raw value buffers in `properties` order.
    pub fn column_query(
        &mut self,
        entity_type: &str,
        source: QuerySource,
        properties: &[&str],
    ) -> Result<QueryOperator> {
        if properties.is_empty() {
            return Err(PenumbraError::Invalid("column query without properties"));
        }
        let mut columns = Vec::with_capacity(properties.len());
        for (i, name) in properties.iter().enumerate() {
            if properties[..i].contains(name) {
                return Err(PenumbraError::Invalid("column query repeats a property"));
            }
            columns.push(self.model.property(entity_type, name)?);
        }
        let (mut select, _) = self.entity_select(entity_type, source)?;
        select.clear_projection();
        for property in &columns {
            let column = select.bind_property(property, source)?;
            select.add_to_projection(column);
        }
        let width = select.projection().len();
        self.mapping.add_root(source);
        Ok(QueryOperator::ShapedQuery {
            select,
            shaper: Shaper::ValueBuffer(ValueBufferShaper::new(source, width)),
        })
    }

    /// Select over the table of `entity_type` projecting what its
    /// materializer reads, filtered to the types it can produce.
    fn entity_select(
        &self,
        entity_type: &str,
        source: QuerySource,
    ) -> Result<(SelectExpression, Materializer)> {
        let table = self.model.table(entity_type)?;
        let mut select = SelectExpression::for_query_source(source);
        select.add_table(TableExpr::Table(TableExpression {
            alias: alias_base(&table.name),
            name: table.name,
            schema: table.schema,
            query_source: Some(source),
        }));
        let materializer = MaterializerFactory::new(self.model.as_ref()).create_materializer(
            entity_type,
            &mut select,
            |property, se| {
                let column = se.bind_property(property, source)?;
                Ok(se.add_to_projection(column))
            },
            Some(source),
        )?;
        Ok((select, materializer))
    }

    /// Flattens, optimizes and rewrites includes, in that order.
    pub fn compile(&mut self, op: QueryOperator) -> Result<CompiledQuery> {
        debug!(sources = self.next_source, "compiler.compile");
        let mut root = QueryFlattener::new(self.model.as_ref(), &self.options)
            .flatten(op, &mut self.mapping)?;
        save_accessors(&mut root, &self.mapping);

        let optimizer = PredicateOptimizer::from_options(&self.options);
        root.for_each_select_mut(&mut |select: &mut SelectExpression| {
            optimizer.optimize_select(select)
        });

        let root = IncludeRewriter::new(self.model.as_ref(), &self.options).rewrite(root)?;
        let query = CompiledQuery { root };
        debug!(commands = query.commands().len(), "compiler.compiled");
        Ok(query)
    }
}

fn save_accessors(op: &mut QueryOperator, mapping: &QuerySourceMapping) {
    match op {
        QueryOperator::ShapedQuery { shaper, .. } | QueryOperator::GroupJoinQuery { shaper, .. } => {
            shaper.save_accessor_expression(mapping)
        }
        QueryOperator::DefaultIfEmpty(inner) => save_accessors(inner, mapping),
        QueryOperator::Project { source, .. } => save_accessors(source, mapping),
        QueryOperator::SelectMany { outer, inner, .. }
        | QueryOperator::Join { outer, inner, .. }
        | QueryOperator::GroupJoin { outer, inner, .. } => {
            save_accessors(outer, mapping);
            save_accessors(inner, mapping);
        }
        QueryOperator::Include { source, .. } | QueryOperator::IncludeCompiled { source, .. } => {
            save_accessors(source, mapping)
        }
    }
}

/// Immutable result of compilation.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    root: QueryOperator,
}

impl CompiledQuery {
    /// Root operator.
    pub fn root(&self) -> &QueryOperator {
        &self.root
    }

    /// Every command the query issues, main commands first.
    pub fn commands(&self) -> Vec<&SelectExpression> {
        self.root.commands()
    }

    /// Renders every command.
    pub fn sql(&self, generator: &dyn SqlGenerator) -> Result<Vec<RelationalCommand>> {
        self.commands()
            .into_iter()
            .map(|select| generator.generate(select))
            .collect()
    }

    /// Rendered commands as a JSON document, for diagnostics.
    pub fn explain_json(&self, generator: &dyn SqlGenerator) -> Result<serde_json::Value> {
        let commands: Vec<serde_json::Value> = self
            .sql(generator)?
            .into_iter()
            .map(|command| json!({ "text": command.text, "parameters": command.parameters }))
            .collect();
        Ok(json!({ "commands": commands }))
    }
}
