//! System prompt assembly

use tradeclaw_core::{AgentDefinition, ToolDefinition};

const DEFAULT_PREAMBLE: &str = "You are an autonomous trading agent. Work in small, verifiable steps: \
gather data with the tools available, act only when the data supports it, and finish with a short \
summary of what you did and why.";

/// Built once per session, from the agent's instructions, the operator's
/// safety policy, and the tools the first run was allowed to see.
pub fn build_system_prompt(agent: &AgentDefinition, safety_policy: Option<&str>, tools: &[ToolDefinition]) -> String {
    let mut prompt = match agent.instructions.as_deref() {
        Some(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => DEFAULT_PREAMBLE.to_string(),
    };
    prompt.push_str(&format!("\n\nAgent: {}", agent.id));

    if let Some(policy) = safety_policy.map(str::trim).filter(|p| !p.is_empty()) {
        prompt.push_str("\n\n## Safety policy\n");
        prompt.push_str(policy);
    }

    if tools.is_empty() {
        prompt.push_str("\n\n## Tools\nNo tools are available in this session.");
    } else {
        prompt.push_str("\n\n## Tools");
        for tool in tools {
            prompt.push_str(&format!("\n- {}: {}", tool.name, tool.description));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema: json!({}),
        }
    }

    #[test]
    fn default_preamble_with_policy_and_tools() {
        let prompt = build_system_prompt(
            &AgentDefinition::permissive("trader"),
            Some("Max 1 ETH per trade."),
            &[tool("market.quote"), tool("trade.swap")],
        );
        assert!(prompt.starts_with("You are an autonomous trading agent."));
        assert!(prompt.contains("Agent: trader"));
        assert!(prompt.contains("## Safety policy\nMax 1 ETH per trade."));
        assert!(prompt.contains("- market.quote: market.quote tool"));
        assert!(prompt.contains("- trade.swap"));
    }

    #[test]
    fn instructions_replace_preamble() {
        let agent = AgentDefinition::permissive("risk").with_instructions("You watch exposure.");
        let prompt = build_system_prompt(&agent, None, &[]);
        assert!(prompt.starts_with("You watch exposure."));
        assert!(!prompt.contains("Safety policy"));
        assert!(prompt.contains("No tools are available"));
    }
}
