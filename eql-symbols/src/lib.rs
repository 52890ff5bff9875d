//! Host-object layer for the EQL engine.
//!
//! This crate defines the currency the query engine trades in: the
//! [`Value`] enum that wraps host data, the [`Symbol`] reflection trait
//! that lets the engine navigate arbitrary user objects, the
//! [`TypeInfo`] descriptors used for type tests, and the
//! [`SymbolRegistry`] that supplies default domains for variables whose
//! instances opted in at construction.
//!
//! The engine itself lives in the `eql-query` crate and consumes these
//! interfaces only; nothing here knows about expressions or queries.

pub mod registry;
pub mod symbol;
pub mod value;

pub use registry::SymbolRegistry;
pub use symbol::{AccessError, Symbol, TypeInfo};
pub use value::{GroupKey, Value};
