// Conversation messages exchanged with the model provider
//
// The history owned by a running agent never contains the system prompt;
// the engine prepends it fresh on every inference so prompt edits between
// turns take effect immediately.

use serde::{Deserialize, Serialize};

use crate::response::ActionRequest;

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    /// Assistant turn that requested actions
    ToolCall,
    /// Result of one dispatched action
    ToolResult,
}

/// One message in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// Action requests carried by a tool-call message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_requests: Vec<ActionRequest>,
    /// For tool-result messages, the id of the request this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            action_requests: Vec::new(),
            request_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    /// Assistant turn carrying the round's action requests
    pub fn tool_call(content: impl Into<String>, action_requests: Vec<ActionRequest>) -> Self {
        Self {
            role: MessageRole::ToolCall,
            content: content.into(),
            action_requests,
            request_id: None,
        }
    }

    /// Result message answering one action request
    pub fn tool_result(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::ToolResult,
            content: content.into(),
            action_requests: Vec::new(),
            request_id: Some(request_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serialization() {
        let msg = Message::user("hello");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hello");
        assert!(value.get("request_id").is_none());
    }

    #[test]
    fn test_tool_result_carries_request_id() {
        let msg = Message::tool_result("call-1", "42");
        assert_eq!(msg.request_id.as_deref(), Some("call-1"));
        assert_eq!(msg.role, MessageRole::ToolResult);
    }

    #[test]
    fn test_tool_call_carries_requests() {
        let msg = Message::tool_call("", vec![ActionRequest::new("1", "search", json!({}))]);
        assert_eq!(msg.action_requests.len(), 1);

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool_call");
        assert_eq!(value["action_requests"][0]["name"], "search");
    }
}
