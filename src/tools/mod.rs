pub mod approval;
pub mod catalog;
pub mod command;
pub mod registry;
pub mod spec;
pub mod traits;

pub use catalog::ToolCatalog;
pub use registry::ToolRegistry;
pub use spec::{ParamKind, ParamSpec, ToolArgs, ToolOutcome, ToolSpec};
pub use traits::{FnTool, Tool};
