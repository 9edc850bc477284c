//! Turns a model reply into a typed [`Decision`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::ASK_USER_TOOL;

pub const TASK_COMPLETE_ACTION: &str = "task_complete";
pub const ASK_USER_ACTION: &str = ASK_USER_TOOL;
pub const DEFAULT_QUESTION: &str = "No question provided.";

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[a-zA-Z]*\s*(\{.*\})\s*```").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Complete { result: Option<String> },
    AskUser { question: String },
    InvokeTool { name: String, args: Value },
    Unknown { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecision {
    pub thought: String,
    pub decision: Decision,
}

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("no JSON object in response")]
    NoJson,

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("response has no action")]
    MissingAction,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    thought: Value,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    args: Value,
}

/// Finds the JSON object in a reply. Models often wrap it in a fenced block
/// or surround it with prose.
fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(inner) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        return Some(inner.as_str());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Parses `{"thought": .., "action": .., "args": {..}}`. Reserved actions
/// take precedence over tools of the same name; `is_tool` decides whether any
/// other action resolves.
pub fn parse_decision(raw: &str, is_tool: impl Fn(&str) -> bool) -> Result<ParsedDecision, DecisionError> {
    let json = extract_json(raw).ok_or(DecisionError::NoJson)?;
    let parsed: RawDecision = serde_json::from_str(json)?;
    let action = parsed
        .action
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or(DecisionError::MissingAction)?;

    let decision = match action.as_str() {
        TASK_COMPLETE_ACTION => Decision::Complete {
            result: parsed.args.get("result").and_then(text_of),
        },
        ASK_USER_ACTION => Decision::AskUser {
            question: parsed
                .args
                .get("question")
                .and_then(text_of)
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_QUESTION.to_string()),
        },
        name if is_tool(name) => Decision::InvokeTool {
            name: name.to_string(),
            args: parsed.args,
        },
        name => Decision::Unknown {
            name: name.to_string(),
        },
    };

    Ok(ParsedDecision {
        thought: text_of(&parsed.thought).unwrap_or_default(),
        decision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known(name: &str) -> bool {
        matches!(name, "read_file" | "write_file" | "fs__search")
    }

    #[test]
    fn test_task_complete() {
        let parsed = parse_decision(
            r#"{"thought":"all done","action":"task_complete","args":{"result":"Shipped"}}"#,
            known,
        )
        .unwrap();
        assert_eq!(parsed.thought, "all done");
        assert_eq!(
            parsed.decision,
            Decision::Complete {
                result: Some("Shipped".to_string())
            }
        );

        let parsed = parse_decision(r#"{"action":"task_complete"}"#, known).unwrap();
        assert_eq!(parsed.decision, Decision::Complete { result: None });
    }

    #[test]
    fn test_ask_user_question_and_default() {
        let parsed = parse_decision(
            r#"{"action":"ask_user","args":{"question":"Which branch?"}}"#,
            known,
        )
        .unwrap();
        assert_eq!(
            parsed.decision,
            Decision::AskUser {
                question: "Which branch?".to_string()
            }
        );

        let parsed = parse_decision(r#"{"action":"ask_user"}"#, known).unwrap();
        assert_eq!(
            parsed.decision,
            Decision::AskUser {
                question: DEFAULT_QUESTION.to_string()
            }
        );
    }

    #[test]
    fn test_tool_and_unknown() {
        let parsed = parse_decision(
            r#"{"thought":"look","action":"read_file","args":{"path":"a.txt"}}"#,
            known,
        )
        .unwrap();
        assert_eq!(
            parsed.decision,
            Decision::InvokeTool {
                name: "read_file".to_string(),
                args: json!({"path": "a.txt"})
            }
        );

        let parsed = parse_decision(r#"{"action":"read_task","args":{}}"#, known).unwrap();
        assert_eq!(
            parsed.decision,
            Decision::Unknown {
                name: "read_task".to_string()
            }
        );
    }

    #[test]
    fn test_fenced_and_wrapped_json() {
        let fenced = "Here is my plan:\n```json\n{\"action\":\"fs__search\",\"args\":{\"q\":\"x\"}}\n```\n";
        let parsed = parse_decision(fenced, known).unwrap();
        assert!(matches!(parsed.decision, Decision::InvokeTool { ref name, .. } if name == "fs__search"));

        let wrapped = "Sure! {\"action\":\"task_complete\",\"args\":{\"result\":\"ok\"}} Hope that helps.";
        assert!(matches!(
            parse_decision(wrapped, known).unwrap().decision,
            Decision::Complete { .. }
        ));
    }

    #[test]
    fn test_malformed_responses() {
        assert!(matches!(parse_decision("I think I'm done", known), Err(DecisionError::NoJson)));
        assert!(matches!(
            parse_decision("{\"action\": task_complete}", known),
            Err(DecisionError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_decision(r#"{"thought":"hmm"}"#, known),
            Err(DecisionError::MissingAction)
        ));
        assert!(matches!(
            parse_decision(r#"{"action":"   "}"#, known),
            Err(DecisionError::MissingAction)
        ));
    }
}
