use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::errors::ToolError;
use crate::tools::spec::{ToolArgs, ToolSpec};

/// A side-effecting capability invocable by name through the `ToolRegistry`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn invoke(&self, args: ToolArgs) -> Result<String, ToolError>;
}

type BoxedCall =
    Box<dyn Fn(ToolArgs) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>> + Send + Sync>;

/// Closure-backed tool, handy for in-process capabilities.
pub struct FnTool {
    spec: ToolSpec,
    call: BoxedCall,
}

impl FnTool {
    pub fn new<F, Fut>(spec: ToolSpec, call: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            spec,
            call: Box::new(move |args| Box::pin(call(args))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, args: ToolArgs) -> Result<String, ToolError> {
        (self.call)(args).await
    }
}
