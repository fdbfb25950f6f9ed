//! # Schema Registry & Validator
//!
//! Model and field definitions are first-class records; this module
//! caches them, validates payloads against them, and emits the DDL that
//! materialises each model as a backing table.

pub mod ddl;
pub mod definition;
pub mod registry;
pub mod types;
pub mod validator;

pub use definition::{validate_model_name, FieldDef, ModelDef, ModelStatus};
pub use registry::SchemaRegistry;
pub use types::FieldType;
pub use validator::Schema;
