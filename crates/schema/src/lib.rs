//! Kope schema: compile described types to `openAPIV3Schema` and build resource definitions.

#![forbid(unsafe_code)]

pub mod compile;
pub mod definition;

pub use compile::{compile, compile_root, SchemaNode};
pub use definition::{definition, DefinitionDocument};
