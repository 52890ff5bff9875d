//! Quantifiers: cardinality enforcement at the query root.
//!
//! A quantifier wraps a query and drives the pull. `an` releases the
//! stream as-is; `the` pulls exactly two elements before deciding;
//! the counted quantifiers buffer no more than they must. Breaches
//! are raised from the first pull that observes them.

use async_stream::try_stream;
use tracing::debug;

use eql_symbols::Value;

use crate::error::EqlError;
use crate::query::Query;
use crate::stream::{RowStream, TryStreamExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantifierKind {
    An,
    The,
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
}

/// A query wrapped with a cardinality contract, ready to evaluate.
pub struct Quantified {
    query: Query,
    kind: QuantifierKind,
}

/// All results, lazily.
pub fn an(query: Query) -> Quantified {
    Quantified {
        query,
        kind: QuantifierKind::An,
    }
}

/// Exactly one result; anything else is a breach.
pub fn the(query: Query) -> Quantified {
    Quantified {
        query,
        kind: QuantifierKind::The,
    }
}

pub fn exactly(count: usize, query: Query) -> Quantified {
    Quantified {
        query,
        kind: QuantifierKind::Exactly(count),
    }
}

pub fn at_least(count: usize, query: Query) -> Quantified {
    Quantified {
        query,
        kind: QuantifierKind::AtLeast(count),
    }
}

pub fn at_most(count: usize, query: Query) -> Quantified {
    Quantified {
        query,
        kind: QuantifierKind::AtMost(count),
    }
}

impl Quantified {
    pub fn kind(&self) -> QuantifierKind {
        self.kind
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Build the query if necessary and return the quantified result
    /// stream. Each call starts a fresh evaluation run.
    pub fn evaluate(&mut self) -> Result<RowStream, EqlError> {
        self.query.build()?;
        let rows = self.query.rows()?;
        Ok(apply(self.kind, rows))
    }

    /// Materialise the full result list.
    pub async fn tolist(&mut self) -> Result<Vec<Value>, EqlError> {
        self.evaluate()?.try_collect().await
    }

    /// The first result; an empty stream is an observable failure.
    pub async fn first(&mut self) -> Result<Value, EqlError> {
        match self.evaluate()?.try_next().await? {
            Some(value) => Ok(value),
            None => Err(EqlError::NoSolutionFound {
                expected: 1,
                found: 0,
            }),
        }
    }

    /// Whether any result exists, without materialising the stream.
    pub async fn exists(&mut self) -> Result<bool, EqlError> {
        Ok(self.evaluate()?.try_next().await?.is_some())
    }
}

fn apply(kind: QuantifierKind, rows: RowStream) -> RowStream {
    match kind {
        QuantifierKind::An => rows,
        QuantifierKind::The => Box::pin(try_stream! {
            let mut rows = rows;
            match rows.try_next().await? {
                None => {
                    debug!("quantifier breach: `the` over an empty stream");
                    Err(EqlError::NoSolutionFound { expected: 1, found: 0 })?;
                }
                Some(first) => {
                    if rows.try_next().await?.is_some() {
                        debug!("quantifier breach: `the` observed a second result");
                        Err(EqlError::MoreThanOneSolutionFound { expected: 1 })?;
                    }
                    yield first;
                }
            }
        }),
        QuantifierKind::Exactly(count) => Box::pin(try_stream! {
            let mut rows = rows;
            let mut buffered = Vec::new();
            while buffered.len() <= count {
                match rows.try_next().await? {
                    Some(value) => buffered.push(value),
                    None => break,
                }
            }
            if buffered.len() < count {
                Err(EqlError::NoSolutionFound { expected: count, found: buffered.len() })?;
            }
            if buffered.len() > count {
                Err(EqlError::MoreThanOneSolutionFound { expected: count })?;
            }
            for value in buffered {
                yield value;
            }
        }),
        QuantifierKind::AtLeast(count) => Box::pin(try_stream! {
            let mut rows = rows;
            let mut buffered = Vec::new();
            while buffered.len() < count {
                match rows.try_next().await? {
                    Some(value) => buffered.push(value),
                    None => break,
                }
            }
            if buffered.len() < count {
                Err(EqlError::NoSolutionFound { expected: count, found: buffered.len() })?;
            }
            for value in buffered {
                yield value;
            }
            while let Some(value) = rows.try_next().await? {
                yield value;
            }
        }),
        QuantifierKind::AtMost(count) => Box::pin(try_stream! {
            let mut rows = rows;
            let mut buffered = Vec::new();
            while buffered.len() <= count {
                match rows.try_next().await? {
                    Some(value) => buffered.push(value),
                    None => break,
                }
            }
            if buffered.len() > count {
                Err(EqlError::MoreThanOneSolutionFound { expected: count })?;
            }
            for value in buffered {
                yield value;
            }
        }),
    }
}
