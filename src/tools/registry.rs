use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::ToolError;
use crate::llm::types::{FunctionDef, ToolDef};
use crate::tools::approval::{requires_approval, ApprovalGate, StaticApproval};
use crate::tools::catalog::{CatalogEntry, ToolCatalog};
use crate::tools::spec::ToolArgs;
use crate::tools::traits::Tool;

/// Allow-list of callable tools. Nothing outside this map can ever run.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    safe_mode: bool,
    require_approval_for: Vec<String>,
    approval: Arc<dyn ApprovalGate>,
}

impl ToolRegistry {
    /// A registry that denies sensitive tools when `safe_mode` is on until an
    /// approval gate is attached.
    pub fn new(safe_mode: bool) -> Self {
        Self {
            tools: BTreeMap::new(),
            safe_mode,
            require_approval_for: Vec::new(),
            approval: Arc::new(StaticApproval(false)),
        }
    }

    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_require_list(mut self, names: Vec<String>) -> Self {
        self.require_approval_for = names;
        self
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode
    }

    /// Inserts or replaces the tool under its spec name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name.clone();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "tool re-registered, previous entry replaced");
        } else {
            tracing::debug!(tool = %name, "tool registered");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a registered tool with safety checks.
    pub async fn execute(&self, name: &str, args: ToolArgs) -> Result<String, ToolError> {
        let Some(tool) = self.tools.get(name).cloned() else {
            tracing::warn!(tool = %name, "refused to execute unregistered tool");
            return Err(ToolError::NotRegistered(name.to_string()));
        };

        let spec = tool.spec();
        if self.safe_mode && requires_approval(name, spec.sensitive, &self.require_approval_for) {
            tracing::info!(tool = %name, "sensitive tool awaiting approval");
            if !self.approval.confirm(name, &spec.description).await {
                tracing::warn!(tool = %name, "sensitive tool denied");
                return Err(ToolError::PermissionDenied(name.to_string()));
            }
        }

        if let Err(e) = spec.validate(&args) {
            tracing::warn!(tool = %name, error = %e, "rejected tool arguments");
            return Err(e);
        }

        tracing::debug!(tool = %name, args = %args.to_value(), "executing tool");

        // Run on its own task so a panicking tool surfaces as a failure.
        let handle = tokio::spawn(async move { tool.invoke(args).await });
        match handle.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e @ ToolError::Reported(_))) | Ok(Err(e @ ToolError::InvalidArguments { .. })) => Err(e),
            Ok(Err(e)) => Err(ToolError::ExecutionFailed {
                tool: name.to_string(),
                message: e.to_string(),
            }),
            Err(join) => Err(ToolError::ExecutionFailed {
                tool: name.to_string(),
                message: format!("tool task aborted: {join}"),
            }),
        }
    }

    /// OpenAI-compatible function definitions for every registered tool.
    pub fn get_tool_schema(&self) -> Vec<ToolDef> {
        self.tools
            .values()
            .map(|tool| {
                let spec = tool.spec();
                ToolDef {
                    def_type: "function".into(),
                    function: FunctionDef {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        parameters: spec.parameters_schema(),
                    },
                }
            })
            .collect()
    }

    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog::new(
            self.tools
                .values()
                .map(|t| CatalogEntry {
                    name: t.spec().name.clone(),
                    description: t.spec().description.clone(),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SpyTool;
    use crate::tools::spec::{ParamKind, ParamSpec, ToolSpec};
    use crate::tools::traits::FnTool;

    #[tokio::test]
    async fn unregistered_tool_never_reaches_a_callable() {
        let spy = SpyTool::ok("get_volume", "50");
        let mut registry = ToolRegistry::new(false);
        registry.register(spy.clone());

        let err = registry.execute("nonexistent_tool", ToolArgs::none()).await.unwrap_err();
        assert_eq!(err, ToolError::NotRegistered("nonexistent_tool".into()));
        assert_eq!(spy.calls().len(), 0);
    }

    #[tokio::test]
    async fn sensitive_tool_is_denied_without_approval_in_safe_mode() {
        let spy = SpyTool::sensitive_ok("create_folder", "created");
        let mut registry = ToolRegistry::new(true);
        registry.register(spy.clone());

        let err = registry.execute("create_folder", ToolArgs::none()).await.unwrap_err();
        assert_eq!(err, ToolError::PermissionDenied("create_folder".into()));
        assert_eq!(spy.calls().len(), 0);

        let mut registry = ToolRegistry::new(true).with_approval(Arc::new(StaticApproval(true)));
        registry.register(spy.clone());
        assert_eq!(registry.execute("create_folder", ToolArgs::none()).await.unwrap(), "created");
        assert_eq!(spy.calls().len(), 1);
    }

    #[tokio::test]
    async fn require_list_gates_tools_not_flagged_sensitive() {
        let spy = SpyTool::ok("launch_app", "launched");
        let mut registry = ToolRegistry::new(true).with_require_list(vec!["launch_app".into()]);
        registry.register(spy.clone());

        assert!(registry.execute("launch_app", ToolArgs::none()).await.is_err());
        assert_eq!(spy.calls().len(), 0);
    }

    #[tokio::test]
    async fn callable_errors_are_wrapped_but_reports_pass_through() {
        let mut registry = ToolRegistry::new(false);
        registry.register(Arc::new(FnTool::new(
            ToolSpec::new("flaky", "raises"),
            |_args| async { Err::<String, ToolError>(ToolError::NotRegistered("inner".into())) },
        )));
        registry.register(SpyTool::failing("set_caps_lock", "caps lock unavailable"));

        match registry.execute("flaky", ToolArgs::none()).await {
            Err(ToolError::ExecutionFailed { tool, message }) => {
                assert_eq!(tool, "flaky");
                assert!(message.contains("inner"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            registry.execute("set_caps_lock", ToolArgs::none()).await,
            Err(ToolError::Reported("caps lock unavailable".into()))
        );
    }

    #[tokio::test]
    async fn ill_typed_or_missing_parameters_never_reach_the_callable() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = ToolRegistry::new(false);
        registry.register(Arc::new(FnTool::new(
            ToolSpec::new("set_volume", "Sets master volume (0-100).")
                .param(ParamSpec::required("level", ParamKind::Integer)),
            move |_args| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Ok::<String, ToolError>("ok".to_string()) }
            },
        )));

        for raw in [r#"{"level": "loud"}"#, "{}"] {
            let args = ToolArgs::from_json_str("set_volume", raw).unwrap();
            let err = registry.execute("set_volume", args).await.unwrap_err();
            assert_eq!(err.kind(), "invalid_arguments");
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let args = ToolArgs::from_json_str("set_volume", r#"{"level": 40}"#).unwrap();
        assert_eq!(registry.execute("set_volume", args).await.unwrap(), "ok");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_tool_becomes_execution_failure() {
        let mut registry = ToolRegistry::new(false);
        registry.register(Arc::new(FnTool::new(ToolSpec::new("boom", "panics"), |_args| async {
            if true {
                panic!("kaboom");
            }
            Ok::<String, ToolError>(String::new())
        })));

        let err = registry.execute("boom", ToolArgs::none()).await.unwrap_err();
        assert_eq!(err.kind(), "execution_failed");
    }

    #[test]
    fn last_registration_wins_and_schema_follows_spec() {
        let mut registry = ToolRegistry::new(false);
        registry.register(SpyTool::ok("set_volume", "old"));
        registry.register(Arc::new(FnTool::new(
            ToolSpec::new("set_volume", "Sets master volume (0-100).")
                .param(ParamSpec::required("level", ParamKind::Integer)),
            |_args| async { Ok::<String, ToolError>("ok".to_string()) },
        )));

        assert_eq!(registry.len(), 1);
        let schema = registry.get_tool_schema();
        assert_eq!(schema[0].function.name, "set_volume");
        assert_eq!(schema[0].function.parameters["properties"]["level"]["type"], "integer");
        assert_eq!(registry.catalog().description("set_volume"), Some("Sets master volume (0-100)."));
    }
}
