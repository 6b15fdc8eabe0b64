//! Interpretation of single-row insert/update/delete outcomes.
//!
//! A mutation either applied to exactly one row, matched nothing (a stale row under optimistic
//! concurrency), or violated named constraints. More than one affected row is a filter or schema
//! bug and is always an error.

use crate::cache::QueryIntent;
use crate::driver::{Constraint, Driver};
use crate::engine::SqlEngine;
use crate::error::{DriverError, SqlEngineError};
use crate::options::QueryOptions;
use crate::results::QueryResult;
use crate::types::RowValues;

/// Conflict handling the caller compiled into an insert.
///
/// The SQL must carry the matching clause (`ON CONFLICT DO NOTHING`, `ON CONFLICT ... DO UPDATE`);
/// the policy only tells the interpreter how to read a zero-row outcome. A policy that disagrees
/// with the SQL gives undefined results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OnConflict {
    #[default]
    Raise,
    /// Zero affected rows is a successful no-op.
    Nothing,
    /// Upsert that replaces the named fields.
    Replace(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// One row applied; `RETURNING` columns zipped with the returned values.
    Applied(Vec<(String, RowValues)>),
    /// Zero rows matched.
    Stale,
    /// Constraint violations the driver classified.
    Invalid(Vec<Constraint>),
}

impl MutationOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Applied(_))
    }

    /// Returned value for `column`, when the mutation applied and returned it.
    #[must_use]
    pub fn returned(&self, column: &str) -> Option<&RowValues> {
        match self {
            MutationOutcome::Applied(values) => values
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

/// One insert/update/delete.
pub struct MutationRequest<P> {
    pub intent: QueryIntent<P>,
    pub params: Vec<RowValues>,
    /// Parameters of the conflict clause, bound after `params`.
    pub conflict_params: Vec<RowValues>,
    pub on_conflict: OnConflict,
    /// Column names of the statement's `RETURNING` clause, in order.
    pub returning: Vec<String>,
    /// Table or schema the mutation targets, for errors and logs.
    pub source: String,
}

impl<P> MutationRequest<P> {
    #[must_use]
    pub fn new(source: impl Into<String>, intent: QueryIntent<P>, params: Vec<RowValues>) -> Self {
        Self {
            intent,
            params,
            conflict_params: Vec::new(),
            on_conflict: OnConflict::Raise,
            returning: Vec::new(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn on_conflict(mut self, policy: OnConflict, conflict_params: Vec<RowValues>) -> Self {
        self.on_conflict = policy;
        self.conflict_params = conflict_params;
        self
    }

    #[must_use]
    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Read one mutation's outcome.
///
/// * one row: `Applied` with `returning` zipped against the returned row (empty when the
///   statement returned no row data);
/// * zero rows: `Applied(vec![])` under [`OnConflict::Nothing`], otherwise `Stale`;
/// * more rows: `SqlEngineError::MultipleRows`;
/// * a driver error `classify` maps to constraints: `Invalid`; any other error is returned.
///
/// # Errors
/// `MultipleRows`, or the unclassified error from `outcome`.
pub fn interpret(
    outcome: Result<QueryResult, SqlEngineError>,
    returning: &[String],
    on_conflict: &OnConflict,
    origin: &str,
    params: &[RowValues],
    classify: impl FnOnce(&DriverError) -> Vec<Constraint>,
) -> Result<MutationOutcome, SqlEngineError> {
    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            let constraints = match &err {
                SqlEngineError::Driver(driver_err) => classify(driver_err),
                _ => Vec::new(),
            };
            if constraints.is_empty() {
                return Err(err);
            }
            return Ok(MutationOutcome::Invalid(constraints));
        }
    };

    match result.num_rows {
        1 => {
            let row = result.rows.and_then(|rows| rows.into_iter().next());
            let values = match row {
                Some(row) => returning.iter().cloned().zip(row).collect(),
                None => Vec::new(),
            };
            Ok(MutationOutcome::Applied(values))
        }
        0 if *on_conflict == OnConflict::Nothing => Ok(MutationOutcome::Applied(Vec::new())),
        0 => Ok(MutationOutcome::Stale),
        count => Err(SqlEngineError::MultipleRows {
            origin: origin.to_string(),
            params: params.to_vec(),
            count,
        }),
    }
}

impl<D: Driver> SqlEngine<D> {
    async fn mutate(
        &self,
        request: MutationRequest<D::Prepared>,
        on_conflict: OnConflict,
        opts: &QueryOptions,
    ) -> Result<MutationOutcome, SqlEngineError> {
        let MutationRequest {
            intent,
            mut params,
            conflict_params,
            returning,
            source,
            ..
        } = request;
        params.extend(conflict_params);
        let opts = if opts.source.is_none() {
            opts.clone().source(source.clone())
        } else {
            opts.clone()
        };
        let outcome = self.execute(intent, &params, &opts).await;
        interpret(outcome, &returning, &on_conflict, &source, &params, |err| {
            self.driver().classify_constraints(err)
        })
    }

    /// Insert one row, honouring the request's conflict policy.
    ///
    /// # Errors
    /// See [`interpret`].
    pub async fn insert(
        &self,
        request: MutationRequest<D::Prepared>,
        opts: &QueryOptions,
    ) -> Result<MutationOutcome, SqlEngineError> {
        let on_conflict = request.on_conflict.clone();
        self.mutate(request, on_conflict, opts).await
    }

    /// Update exactly one row; zero matched rows come back as [`MutationOutcome::Stale`].
    ///
    /// # Errors
    /// See [`interpret`].
    pub async fn update(
        &self,
        request: MutationRequest<D::Prepared>,
        opts: &QueryOptions,
    ) -> Result<MutationOutcome, SqlEngineError> {
        self.mutate(request, OnConflict::Raise, opts).await
    }

    /// Delete exactly one row; zero matched rows come back as [`MutationOutcome::Stale`].
    ///
    /// # Errors
    /// See [`interpret`].
    pub async fn delete(
        &self,
        request: MutationRequest<D::Prepared>,
        opts: &QueryOptions,
    ) -> Result<MutationOutcome, SqlEngineError> {
        self.mutate(request, OnConflict::Raise, opts).await
    }
}
