//! Kope core: type models, field metadata, resource identity and the `Describe` capability.

#![forbid(unsafe_code)]

mod capability;
mod error;
mod identity;
mod macros;
mod metadata;
mod model;
mod value;
pub mod walker;

pub use capability::{Bytes, Describe, MapKey};
pub use error::SchemaError;
pub use identity::{ApiStyle, IdentityBuilder, ResourceIdentity, Scope};
pub use metadata::Metadata;
pub use model::{Composite, Field, FieldMeta, ScalarKind, TypeModel};
pub use value::{FieldValues, Value, ValueError};
pub use walker::{classify, TypeCache};

pub mod prelude {
    pub use super::{describe, ApiStyle, Bytes, Describe, FieldMeta, Metadata, ResourceIdentity, Scope};
}
