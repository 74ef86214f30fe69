use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use relay_core::{ToolDefinition, ToolHandler};

/// Name → handler table consulted when the model calls a function.
/// Built once at startup, shared read-only afterwards.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a handler. A later registration under the same name wins.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool registered twice, replacing");
        }
        self
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions sent with the turn request, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::{ToolError, TurnMeta};

    struct DummyTool {
        name: String,
        reply: &'static str,
    }

    impl DummyTool {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                reply: "ok",
            })
        }
    }

    #[async_trait]
    impl ToolHandler for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A dummy tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn handle(&self, _args: &str, _meta: &TurnMeta) -> Result<String, ToolError> {
            Ok(self.reply.to_string())
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("roll_dice"));

        assert!(registry.contains("roll_dice"));
        assert!(!registry.contains("current_time"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("roll_dice").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("roll_dice"));
        assert!(registry.unregister("roll_dice"));
        assert!(!registry.unregister("roll_dice"));
    }

    #[test]
    fn names_and_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry
            .register(DummyTool::new("recent_history"))
            .register(DummyTool::new("current_time"))
            .register(DummyTool::new("roll_dice"));

        assert_eq!(registry.names(), vec!["current_time", "recent_history", "roll_dice"]);
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "current_time");
        assert_eq!(defs[2].description, "A dummy tool for testing");
    }

    #[tokio::test]
    async fn re_registration_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("t"));
        registry.register(Arc::new(DummyTool { name: "t".into(), reply: "second" }));

        assert_eq!(registry.count(), 1);
        let meta = TurnMeta::new("oc", "ou", relay_core::TraceId::new());
        let out = registry.get("t").unwrap().handle("{}", &meta).await.unwrap();
        assert_eq!(out, "second");
    }
}
