use crate::capability::AgentCapability;
use ensemble_core::{AgentInvoker, AgentType, EnsembleError, EnsembleResult, TaskRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Minimum keyword confidence for a chat routing match.
const ROUTE_THRESHOLD: f32 = 0.2;

struct RegisteredAgent {
    capabilities: Vec<AgentCapability>,
    keywords: Vec<String>,
    invoker: Arc<dyn AgentInvoker>,
}

/// Builds a [`CapabilityRegistry`] at startup.
///
/// Registration happens once during composition; the built registry is
/// immutable for the lifetime of the engine.
#[derive(Default)]
pub struct RegistryBuilder {
    agents: HashMap<AgentType, RegisteredAgent>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent with its capabilities, routing keywords, and
    /// invoker. Registering the same agent type twice replaces the earlier
    /// entry.
    pub fn register(
        mut self,
        agent_type: AgentType,
        capabilities: Vec<AgentCapability>,
        keywords: Vec<String>,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Self {
        if self.agents.contains_key(&agent_type) {
            debug!(agent = %agent_type, "replacing existing registration");
        }
        self.agents.insert(
            agent_type,
            RegisteredAgent {
                capabilities,
                keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
                invoker,
            },
        );
        self
    }

    /// Freezes the registrations into an immutable registry.
    pub fn build(self) -> CapabilityRegistry {
        info!(agents = self.agents.len(), "capability registry built");
        CapabilityRegistry {
            agents: self.agents,
        }
    }
}

/// Immutable lookup of agent capabilities and invokers.
pub struct CapabilityRegistry {
    agents: HashMap<AgentType, RegisteredAgent>,
}

impl CapabilityRegistry {
    /// Returns the invoker registered for an agent type.
    pub fn invoker(&self, agent_type: AgentType) -> Option<Arc<dyn AgentInvoker>> {
        self.agents.get(&agent_type).map(|a| Arc::clone(&a.invoker))
    }

    /// Returns the capabilities declared by an agent type.
    pub fn capabilities(&self, agent_type: AgentType) -> Option<&[AgentCapability]> {
        self.agents
            .get(&agent_type)
            .map(|a| a.capabilities.as_slice())
    }

    /// Returns a specific capability by agent and task type.
    pub fn capability(&self, agent_type: AgentType, task_type: &str) -> Option<&AgentCapability> {
        self.agents
            .get(&agent_type)?
            .capabilities
            .iter()
            .find(|c| c.name == task_type)
    }

    /// All registered agent types.
    pub fn agent_types(&self) -> Vec<AgentType> {
        self.agents.keys().copied().collect()
    }

    /// Whether an agent declares the given task type.
    pub fn supports(&self, agent_type: AgentType, task_type: &str) -> bool {
        self.capability(agent_type, task_type).is_some()
    }

    /// Validates a request at the orchestration boundary.
    ///
    /// Rejects unknown agents, undeclared task types, non-object inputs,
    /// and inputs missing fields the capability's schema requires.
    pub fn validate(&self, request: &TaskRequest) -> EnsembleResult<()> {
        let Some(agent) = self.agents.get(&request.agent_type) else {
            return Err(EnsembleError::Validation(format!(
                "unknown agent type: {}",
                request.agent_type
            )));
        };

        let Some(capability) = agent
            .capabilities
            .iter()
            .find(|c| c.name == request.task_type)
        else {
            return Err(EnsembleError::Validation(format!(
                "agent '{}' does not declare task type '{}'",
                request.agent_type, request.task_type
            )));
        };

        let Some(input) = request.input.as_object() else {
            return Err(EnsembleError::Validation(format!(
                "input for '{}:{}' must be a JSON object",
                request.agent_type, request.task_type
            )));
        };

        for field in capability.required_fields() {
            if !input.contains_key(field) {
                return Err(EnsembleError::Validation(format!(
                    "input for '{}:{}' is missing required field '{}'",
                    request.agent_type, request.task_type, field
                )));
            }
        }

        Ok(())
    }

    /// Routes a free-form request to the best-matching agent by keyword
    /// confidence. Returns `None` when no agent clears the confidence
    /// threshold.
    pub fn route(&self, message: &str) -> Option<(AgentType, f32)> {
        let lower = message.to_lowercase();
        let mut best: Option<(AgentType, f32)> = None;

        for (&agent_type, agent) in &self.agents {
            if agent.keywords.is_empty() {
                continue;
            }
            let matches = agent
                .keywords
                .iter()
                .filter(|kw| lower.contains(kw.as_str()))
                .count();
            let confidence =
                (matches as f32 / agent.keywords.len().max(1) as f32).min(1.0);
            if confidence > ROUTE_THRESHOLD
                && best.map_or(true, |(_, c)| confidence > c)
            {
                best = Some((agent_type, confidence));
            }
        }

        if let Some((agent, confidence)) = best {
            debug!(agent = %agent, confidence, "routed request");
        }
        best
    }

    /// Summary of all registered agents, for dashboards and diagnostics.
    pub fn agent_info(&self) -> serde_json::Value {
        let mut info: Vec<serde_json::Value> = self
            .agents
            .iter()
            .map(|(agent_type, agent)| {
                serde_json::json!({
                    "type": agent_type.as_str(),
                    "capabilities": agent
                        .capabilities
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>(),
                    "keywords": agent.keywords,
                })
            })
            .collect();
        info.sort_by(|a, b| a["type"].as_str().cmp(&b["type"].as_str()));
        serde_json::Value::Array(info)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoInvoker;

    #[async_trait]
    impl AgentInvoker for EchoInvoker {
        async fn invoke(&self, request: &TaskRequest) -> EnsembleResult<serde_json::Value> {
            Ok(request.input.clone())
        }
    }

    fn sample_registry() -> CapabilityRegistry {
        RegistryBuilder::new()
            .register(
                AgentType::Grant,
                vec![AgentCapability::new("score_fit", "Score grant fit")
                    .with_input_schema(serde_json::json!({"required": ["grant_id"]}))],
                vec!["grant".into(), "funding".into(), "nsf".into()],
                Arc::new(EchoInvoker),
            )
            .register(
                AgentType::Writing,
                vec![AgentCapability::new("draft", "Draft a document")],
                vec!["write".into(), "draft".into(), "edit".into()],
                Arc::new(EchoInvoker),
            )
            .build()
    }

    #[test]
    fn test_lookup_and_supports() {
        let registry = sample_registry();
        assert!(registry.supports(AgentType::Grant, "score_fit"));
        assert!(!registry.supports(AgentType::Grant, "draft"));
        assert!(registry.invoker(AgentType::Writing).is_some());
        assert!(registry.invoker(AgentType::Calendar).is_none());
    }

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let registry = sample_registry();
        let req = TaskRequest::new(
            AgentType::Grant,
            "score_fit",
            serde_json::json!({"grant_id": "g-1"}),
        );
        assert!(registry.validate(&req).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_agent() {
        let registry = sample_registry();
        let req = TaskRequest::new(AgentType::Calendar, "book", serde_json::json!({}));
        let err = registry.validate(&req).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_validate_rejects_undeclared_task_type() {
        let registry = sample_registry();
        let req = TaskRequest::new(AgentType::Writing, "summarize", serde_json::json!({}));
        assert!(registry.validate(&req).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_required_field() {
        let registry = sample_registry();
        let req = TaskRequest::new(AgentType::Grant, "score_fit", serde_json::json!({}));
        let err = registry.validate(&req).unwrap_err();
        assert!(err.to_string().contains("grant_id"));
    }

    #[test]
    fn test_validate_rejects_non_object_input() {
        let registry = sample_registry();
        let req = TaskRequest::new(AgentType::Writing, "draft", serde_json::json!("text"));
        assert!(registry.validate(&req).is_err());
    }

    #[test]
    fn test_route_picks_best_match() {
        let registry = sample_registry();
        let (agent, confidence) = registry
            .route("Find NSF funding for my grant proposal")
            .unwrap();
        assert_eq!(agent, AgentType::Grant);
        assert!(confidence > ROUTE_THRESHOLD);
    }

    #[test]
    fn test_route_returns_none_below_threshold() {
        let registry = sample_registry();
        assert!(registry.route("what is the weather today").is_none());
    }

    #[test]
    fn test_agent_info_sorted() {
        let registry = sample_registry();
        let info = registry.agent_info();
        let types: Vec<&str> = info
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["grant", "writing"]);
    }
}
