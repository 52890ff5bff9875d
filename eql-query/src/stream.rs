//! Stream aliases and small helpers for the lazy evaluation pipeline.
//!
//! Every node exposes its emissions as a boxed stream; the root
//! quantifier drives the pull. Suspension points are exactly the
//! `yield`s inside each node's step.

use std::pin::Pin;

use async_stream::try_stream;

/// Re-exported stream traits for consumers of result streams.
pub use futures_core::Stream;
pub use futures_util::{StreamExt, TryStreamExt};

use eql_symbols::Value;

use crate::binding::OperationResult;
use crate::error::EqlError;

/// The lazy sequence of `(binding, truth)` emissions a node produces.
pub type Emissions = Pin<Box<dyn Stream<Item = Result<OperationResult, EqlError>> + Send>>;

/// The lazy sequence of projected result rows a query produces.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Value, EqlError>> + Send>>;

/// A stream with a single emission.
pub(crate) fn once(result: OperationResult) -> Emissions {
    Box::pin(try_stream! {
        yield result;
    })
}

/// A stream that fails on first pull.
pub(crate) fn fail(error: EqlError) -> Emissions {
    Box::pin(futures_util::stream::once(async move { Err(error) }))
}
