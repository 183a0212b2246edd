//! Script execution over batches of periods.

use std::collections::BTreeMap;
use std::sync::Arc;

use pulse_core::{Datastore, Period};
use rayon::prelude::*;
use serde::Serialize;

use crate::ast::Script;
use crate::error::QueryError;
use crate::functions::{self, Context};
use crate::interpreter::{Interpreter, not_found};
use crate::parser::parse;
use crate::value::Value;

/// Default evaluation step budget per period.
pub const DEFAULT_MAX_STEPS: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// Maximum evaluated expressions per period; `None` is unbounded.
    pub max_steps: Option<u64>,
    /// Evaluate periods on the rayon pool.
    pub parallel: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_steps: Some(DEFAULT_MAX_STEPS),
            parallel: true,
        }
    }
}

/// One period to evaluate, with the bucket aliases `query_bucket` resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInput {
    pub period: Period,
    pub buckets: BTreeMap<String, String>,
}

impl QueryInput {
    pub const fn new(period: Period) -> Self {
        Self {
            period,
            buckets: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_bucket(mut self, alias: impl Into<String>, bucket_id: impl Into<String>) -> Self {
        self.buckets.insert(alias.into(), bucket_id.into());
        self
    }
}

/// Result of one period.
pub type PeriodResult = Result<Value, QueryError>;

/// Serializable form of a [`PeriodResult`]: `{"ok": value}` or `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok(Value),
    Error(QueryError),
}

impl From<PeriodResult> for Outcome {
    fn from(result: PeriodResult) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::Error(err),
        }
    }
}

/// Runs scripts against a datastore.
pub struct QueryEngine {
    store: Arc<dyn Datastore>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn Datastore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    /// Parses a script and checks that every function it calls exists.
    pub fn compile(source: &str) -> Result<Script, QueryError> {
        let script = parse(source)?;
        if let Some((name, position)) = script
            .calls()
            .into_iter()
            .find(|(name, _)| functions::lookup(name).is_none())
        {
            return Err(not_found(name, position));
        }
        Ok(script)
    }

    /// Evaluates `source` once per input.
    ///
    /// Parse and unknown-function errors fail the whole batch before the
    /// datastore is touched. Anything else fails only its own period; the
    /// returned results line up with `inputs`.
    pub fn execute(
        &self,
        source: &str,
        inputs: &[QueryInput],
    ) -> Result<Vec<PeriodResult>, QueryError> {
        let script = Self::compile(source)?;
        tracing::debug!(
            periods = inputs.len(),
            parallel = self.config.parallel,
            "executing query"
        );
        let results = if self.config.parallel {
            inputs
                .par_iter()
                .map(|input| self.run(&script, input))
                .collect()
        } else {
            inputs.iter().map(|input| self.run(&script, input)).collect()
        };
        Ok(results)
    }

    /// Evaluates a compiled script for one period.
    pub fn run(&self, script: &Script, input: &QueryInput) -> PeriodResult {
        let ctx = Context {
            store: self.store.as_ref(),
            period: input.period,
            buckets: &input.buckets,
        };
        let result = Interpreter::new(ctx, self.config.max_steps).run(script);
        if let Err(err) = &result {
            tracing::warn!(period = %input.period, error = %err, "query failed for period");
        }
        result
    }
}
