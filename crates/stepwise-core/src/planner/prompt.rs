//! Prompt composition for plan creation.
//!
//! The prompt enumerates the tool catalog and pins the LLM to a strict JSON
//! document shape. The same catalog rendering is reused by workflow
//! generation.

use std::fmt::Write as _;

use stepwise_types::tool::ToolDescriptor;

/// System prompt shared by plan creation requests.
pub const PLANNER_SYSTEM_PROMPT: &str = "You are a planning assistant. You break goals into \
ordered tasks made of concrete steps that use the available tools. You reply with a single \
JSON object and nothing else.";

const PLAN_SHAPE: &str = r#"{
  "goal": "<the goal, restated>",
  "summary": "<one or two sentences>",
  "tasks": [
    {
      "name": "<short task name>",
      "description": "<what the task achieves>",
      "priority": "high|medium|low",
      "dependencies": ["<name of a task that must finish first>"],
      "tools": ["<tool name>"],
      "steps": [
        {
          "action": "<short verb phrase>",
          "description": "<what this step does>",
          "tool": "<tool name, or omit for a manual step>",
          "parameters": { "<parameter>": "<value>" }
        }
      ]
    }
  ]
}"#;

/// Render the catalog as a bullet list: one line per tool, then one
/// indented line per parameter with its type and whether it is required.
pub fn render_catalog(catalog: &[ToolDescriptor]) -> String {
    if catalog.is_empty() {
        return "(no tools available)\n".to_string();
    }
    let mut out = String::new();
    // Writing to a String cannot fail.
    for tool in catalog {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
        for param in tool.parameter_specs() {
            let mut flags: Vec<&str> = param.kind.as_deref().into_iter().collect();
            if param.required {
                flags.push("required");
            }
            let _ = write!(out, "  - {}", param.name);
            if !flags.is_empty() {
                let _ = write!(out, " ({})", flags.join(", "));
            }
            let _ = match &param.description {
                Some(description) => writeln!(out, ": {description}"),
                None => writeln!(out),
            };
        }
    }
    out
}

/// Build the plan-creation prompt for `goal`.
pub fn plan_prompt(goal: &str, catalog: &[ToolDescriptor]) -> String {
    format!(
        "Create an execution plan for the following goal.\n\n\
         Goal: {goal}\n\n\
         Available tools:\n{catalog}\n\
         Rules:\n\
         - Use only the tools listed above; leave \"tool\" out for steps that need none.\n\
         - List dependencies by task name; a task may depend only on earlier tasks.\n\
         - Parameters may reference earlier results with {{{{task_N.key}}}} or {{{{step_N_M}}}}.\n\
         - Respond with exactly one JSON object of this shape:\n\n\
         {PLAN_SHAPE}\n",
        catalog = render_catalog(catalog),
    )
}
