//! Role strategies and the services they delegate to

use std::sync::Arc;

use tracing::debug;

mod analyzer;
mod architect;
mod developer;
mod devops;
pub mod services;
mod tester;

pub use analyzer::AnalyzerRole;
pub use architect::ArchitectRole;
pub use developer::DeveloperRole;
pub use devops::DevOpsRole;
pub use services::{
    CodeIssue, CodeMetrics, CodeParser, CommandOutput, CommandRunner, CompletionRequest, CompletionService,
    HeuristicParser, ParseResult, ShellRunner,
};
pub use tester::TesterRole;

use crate::agent::Role;
use crate::domain::AgentType;

/// The collaborators shared by every role
#[derive(Clone)]
pub struct RoleServices {
    pub completion: Arc<dyn CompletionService>,
    pub parser: Arc<dyn CodeParser>,
    pub runner: Arc<dyn CommandRunner>,
}

impl RoleServices {
    /// Use the built-in parser and shell runner with the given completion service
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            parser: Arc::new(HeuristicParser),
            runner: Arc::new(ShellRunner::default()),
        }
    }
}

/// Build the role for `agent_type`; the coordinator and unknown types have none
pub fn create_role(agent_type: AgentType, services: &RoleServices) -> Option<Arc<dyn Role>> {
    debug!(%agent_type, "create_role: called");
    let role: Arc<dyn Role> = match agent_type {
        AgentType::Developer => Arc::new(DeveloperRole::new(Arc::clone(&services.completion))),
        AgentType::Analyzer => Arc::new(AnalyzerRole::new(Arc::clone(&services.parser))),
        AgentType::Architect => Arc::new(ArchitectRole::new(Arc::clone(&services.completion))),
        AgentType::Tester => Arc::new(TesterRole::new(
            Arc::clone(&services.completion),
            Arc::clone(&services.runner),
        )),
        AgentType::DevOps => Arc::new(DevOpsRole::new(
            Arc::clone(&services.completion),
            Arc::clone(&services.runner),
        )),
        AgentType::Coordinator | AgentType::Unknown => return None,
    };
    Some(role)
}
