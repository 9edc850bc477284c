use std::path::Path;
use std::sync::Arc;

use crate::providers::Message;
use crate::tools::Tool;

pub const NEXT_STEP_PROMPT: &str = "Current Status: WORKING. What is your next step?";

/// Everything the model sees for one decision.
pub struct PromptContext<'a> {
    pub task_title: &'a str,
    pub knowledge: &'a str,
    pub workspace_root: &'a Path,
    pub latest_log: Option<&'a str>,
    pub tools: &'a [Arc<dyn Tool>],
    pub pending_input: Option<&'a str>,
}

fn tool_line(tool: &dyn Tool) -> String {
    let args = tool.schema().summary();
    if args.is_empty() {
        format!("- {}: {}", tool.name(), tool.description())
    } else {
        format!("- {}: {} (args: {})", tool.name(), tool.description(), args)
    }
}

pub fn compose(ctx: &PromptContext<'_>) -> Vec<Message> {
    let knowledge = if ctx.knowledge.trim().is_empty() {
        "No stored knowledge."
    } else {
        ctx.knowledge.trim()
    };
    let tools = ctx
        .tools
        .iter()
        .map(|tool| tool_line(tool.as_ref()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut system = format!(
        "You are an autonomous agent working on: \"{title}\".\n\n\
         Context:\n{knowledge}\n\n\
         Current Workspace: {workspace}\n\
         (All file operations are relative to this directory)\n\n\
         Recent Logs:\n{logs}\n\n\
         Available Tools:\n{tools}\n\
         - task_complete: Finish the task (args: result: string)\n",
        title = ctx.task_title,
        knowledge = knowledge,
        workspace = ctx.workspace_root.display(),
        logs = ctx.latest_log.unwrap_or("No recent logs"),
        tools = tools,
    );

    if let Some(input) = ctx.pending_input {
        system.push_str(&format!(
            "\nUSER MESSAGE: {}\nRespond to this user message specifically.\n",
            input
        ));
    }

    system.push_str(
        "\nRespond in JSON format:\n{ \"thought\": \"reasoning\", \"action\": \"tool_name\", \"args\": { ... } }\n",
    );

    vec![Message::system(system), Message::user(NEXT_STEP_PROMPT)]
}
