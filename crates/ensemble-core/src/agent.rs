use serde::{Deserialize, Serialize};

/// The specialized agents known to the engine.
///
/// Each variant is a capability provider registered at startup; the engine
/// itself never implements agent business logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Task planning and triage.
    Task,
    /// Project tracking.
    Project,
    /// Grant discovery and fit scoring.
    Grant,
    /// Literature and background research.
    Research,
    /// Calendar and scheduling.
    Calendar,
    /// Drafting and editing text.
    Writing,
    /// Personnel and staffing.
    Personnel,
    /// General planning and request decomposition.
    Planner,
    /// Coordinates the other agents.
    Orchestrator,
}

impl AgentType {
    /// All agent types, in declaration order.
    pub fn all() -> [AgentType; 9] {
        [
            AgentType::Task,
            AgentType::Project,
            AgentType::Grant,
            AgentType::Research,
            AgentType::Calendar,
            AgentType::Writing,
            AgentType::Personnel,
            AgentType::Planner,
            AgentType::Orchestrator,
        ]
    }

    /// Lowercase wire name of this agent type.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Task => "task",
            AgentType::Project => "project",
            AgentType::Grant => "grant",
            AgentType::Research => "research",
            AgentType::Calendar => "calendar",
            AgentType::Writing => "writing",
            AgentType::Personnel => "personnel",
            AgentType::Planner => "planner",
            AgentType::Orchestrator => "orchestrator",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
