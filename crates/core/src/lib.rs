//! Core types for the Arbor storage engine
//!
//! This crate holds the pieces every other layer depends on:
//! - The unified [`Error`] type and [`Result`] alias
//! - Identity types: [`Address`], [`StructureId`]
//! - Store descriptors: [`StoreConfig`], [`TreeMetaInfo`]
//! - The string binding layer with its explicit interning strategy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bindings;
pub mod error;
pub mod types;

pub use bindings::{InternStrategy, StringBinding, StringInterner};
pub use error::{Error, Result};
pub use types::{Address, StoreConfig, StructureId, TreeMetaInfo};
