//! Core types for jitload.
//!
//! This crate provides the foundational abstractions for just-in-time
//! batched association loading:
//!
//! - `Value` and `Row` for dynamically-typed column data
//! - `EntityInfo` / `Schema` for externally-supplied entity metadata
//! - `AssociationInfo` descriptors (cardinality, keys, scopes, STI,
//!   polymorphism, through-chains)
//! - `Record` handles with per-association loaded/unloaded slots
//! - `BatchGroup` sibling sets with weak membership

pub mod association;
pub mod batch;
pub mod entity;
pub mod error;
pub mod record;
pub mod row;
pub mod value;

pub use association::{AssociationInfo, AssociationKind, Scope, Target};
pub use batch::BatchGroup;
pub use entity::{EntityInfo, Schema};
pub use error::{Error, MetadataError, MetadataErrorKind, QueryError, QueryErrorKind, Result};
pub use record::{Record, Slot};
pub use row::{ColumnInfo, Row};
pub use value::Value;
