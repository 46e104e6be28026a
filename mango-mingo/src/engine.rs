//! The query and aggregation engine.

use std::{collections::HashMap, fmt};
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    cursor::Cursor,
    error::{MingoError, MingoResult},
    evaluator::DocumentEvaluator,
    expr::Expr,
    operators::{AccumulatorFn, ExpressionContext, OperatorFn, builtin_accumulators, builtin_operators},
    pipeline::{StageFn, builtin_stages},
    projection::Projection,
};

const DEFAULT_ID_KEY: &str = "id";

/// Per-call engine options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MingoOptions {
    id_key: String,
}

impl Default for MingoOptions {
    fn default() -> Self {
        Self { id_key: DEFAULT_ID_KEY.to_string() }
    }
}

impl MingoOptions {
    pub fn new(id_key: impl Into<String>) -> Self {
        Self::default().with_id_key(id_key)
    }

    pub fn with_id_key(mut self, id_key: impl Into<String>) -> Self {
        self.id_key = id_key.into();
        self
    }

    /// Field holding each document's identity. Falls back to `"id"` when blank.
    pub fn id_key(&self) -> &str {
        match self.id_key.trim() {
            "" => DEFAULT_ID_KEY,
            _ => self.id_key.as_str(),
        }
    }
}

/// MongoDB-style query, projection, and aggregation over in-memory documents.
///
/// Stages, expression operators, and accumulators are looked up by name in
/// per-engine registries, so custom ones can be added with
/// [`register_stage`](Self::register_stage) and friends.
///
/// # Example
///
/// ```ignore
/// use bson::doc;
/// use mango_mingo::{Mingo, MingoOptions};
///
/// let mingo = Mingo::new();
/// let cars = vec![doc! { "id": 1, "make": "Scion", "year": 2010 }];
///
/// let recent = mingo
///     .find(&cars, &doc! { "year": { "$gte": 2000 } }, &doc! {}, &MingoOptions::default())?
///     .sort(&doc! { "year": -1 })?
///     .all();
/// ```
#[derive(Clone)]
pub struct Mingo {
    stages: HashMap<String, StageFn>,
    operators: HashMap<String, OperatorFn>,
    accumulators: HashMap<String, AccumulatorFn>,
}

impl Default for Mingo {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mingo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stages = self.stages.keys().collect::<Vec<_>>();
        stages.sort();

        f.debug_struct("Mingo")
            .field("stages", &stages)
            .field("operators", &self.operators.len())
            .field("accumulators", &self.accumulators.len())
            .finish()
    }
}

impl Mingo {
    /// Creates an engine with every built-in stage, operator, and accumulator.
    pub fn new() -> Self {
        Self {
            stages: builtin_stages(),
            operators: builtin_operators(),
            accumulators: builtin_accumulators(),
        }
    }

    /// Registers (or replaces) a pipeline stage.
    pub fn register_stage<F>(&mut self, name: impl Into<String>, stage: F) -> &mut Self
    where
        F: Fn(&Mingo, Vec<Document>, &Bson, &MingoOptions) -> MingoResult<Vec<Document>> + Send + Sync + 'static,
    {
        self.stages.insert(name.into(), std::sync::Arc::new(stage));
        self
    }

    /// Registers (or replaces) an expression operator.
    pub fn register_operator<F>(&mut self, name: impl Into<String>, operator: F) -> &mut Self
    where
        F: Fn(&ExpressionContext<'_>, &Bson) -> MingoResult<Bson> + Send + Sync + 'static,
    {
        self.operators.insert(name.into(), std::sync::Arc::new(operator));
        self
    }

    /// Registers (or replaces) a `$group` accumulator.
    pub fn register_accumulator<F>(&mut self, name: impl Into<String>, accumulator: F) -> &mut Self
    where
        F: Fn(&[Option<Bson>]) -> MingoResult<Bson> + Send + Sync + 'static,
    {
        self.accumulators.insert(name.into(), std::sync::Arc::new(accumulator));
        self
    }

    /// Expression scope rooted at `document`.
    pub fn context<'a>(&'a self, document: &'a Document) -> ExpressionContext<'a> {
        ExpressionContext::new(document, &self.operators)
    }

    /// Evaluates an aggregation expression against `document`.
    pub fn evaluate(&self, expr: &Bson, document: &Document) -> MingoResult<Bson> {
        self.context(document).evaluate(expr)
    }

    pub(crate) fn accumulator(&self, name: &str) -> MingoResult<&AccumulatorFn> {
        self.accumulators
            .get(name)
            .ok_or_else(|| MingoError::UnknownOperator(name.to_string()))
    }

    /// Runs `pipeline` over a copy of `collection`.
    ///
    /// # Errors
    ///
    /// Fails on the first stage that is unknown, malformed, or fails to evaluate.
    pub fn aggregate(
        &self,
        collection: &[Document],
        pipeline: &[Document],
        options: &MingoOptions,
    ) -> MingoResult<Vec<Document>> {
        self.run_stages(collection.to_vec(), pipeline, options)
    }

    /// Runs `pipeline` over owned documents.
    pub fn run_stages(
        &self,
        mut documents: Vec<Document>,
        pipeline: &[Document],
        options: &MingoOptions,
    ) -> MingoResult<Vec<Document>> {
        for stage in pipeline {
            let mut entries = stage.iter();
            let (name, arg) = match (entries.next(), entries.next()) {
                (Some(entry), None) => entry,
                _ => return Err(MingoError::InvalidStage(format!(
                    "a pipeline stage must have exactly one key, found {}",
                    stage.len(),
                ))),
            };

            let run = self
                .stages
                .get(name.as_str())
                .ok_or_else(|| MingoError::UnknownStage(name.clone()))?;

            trace!(target: "mingo", stage = %name, input = documents.len(), "running pipeline stage");
            documents = run(self, documents, arg, options)?;
        }

        Ok(documents)
    }

    /// Applies a projection to every document.
    pub fn project(
        &self,
        documents: &[Document],
        projection: &Document,
        options: &MingoOptions,
    ) -> MingoResult<Vec<Document>> {
        if projection.is_empty() {
            return Ok(documents.to_vec());
        }

        let projection = Projection::parse(projection, options.id_key())?;

        documents
            .iter()
            .map(|document| projection.apply(self, document))
            .collect()
    }

    /// Matches `criteria` against `collection`.
    ///
    /// A non-empty `projection` is computed for the whole collection before
    /// matching; the cursor still matches and sorts on the source documents
    /// and emits the projected ones.
    pub fn find<'a>(
        &self,
        collection: &'a [Document],
        criteria: &Document,
        projection: &Document,
        options: &MingoOptions,
    ) -> MingoResult<Cursor<'a>> {
        let views = match projection.is_empty() {
            true => None,
            false => Some(self.project(collection, projection, options)?),
        };

        let expr = Expr::parse(criteria)?;
        let matched = DocumentEvaluator::matching_indices(collection, &expr)?;
        trace!(target: "mingo", matched = matched.len(), total = collection.len(), "matched criteria");

        let cursor = Cursor::from_matches(collection, matched);

        match views {
            Some(views) => cursor.with_views(views),
            None => Ok(cursor),
        }
    }
}
