// Tools module - provider registry, schemas, validation, dispatch
#![allow(unused_imports)]

pub mod bash;
pub mod error;
pub mod provider;
pub mod registry;
pub mod schema;

pub use error::{RegistryError, ToolCallError};
pub use provider::{Declaration, JsonMap, ToolProvider, ToolValue};
pub use registry::{RegistryConfig, ToolRegistry};
pub use schema::{ParamType, Parameter, Tool};
