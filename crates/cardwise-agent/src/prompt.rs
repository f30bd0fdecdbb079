//! Prompt assembly for the retrieval and answer stages.

use cardwise_core::types::{Document, Message, ToolDefinition};

/// Name of the single retrieval tool offered to the model.
pub const RETRIEVE_TOOL_NAME: &str = "retrieve_credit_cards";

const ROLE_INSTRUCTION: &str = "You are an assistant for question-answering tasks about credit cards. \
Use the following pieces of retrieved context to answer the question. \
Only answer with information found in the context. \
If you don't know the answer, say that you don't know. \
Do not ask the user follow-up questions.";

/// Tool definition advertised during DECIDE.
pub fn retrieval_tool() -> ToolDefinition {
    ToolDefinition {
        name: RETRIEVE_TOOL_NAME.into(),
        description: "Retrieve information about credit cards related to a query.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        }),
    }
}

/// Render retrieved documents as the text stored in the `tool` message.
///
/// Each document becomes `Source: {metadata}\nContent: {content}`; documents
/// are separated by a blank line. No documents yields an empty string.
pub fn serialize_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|doc| format!("Source: {}\nContent: {}", doc.metadata_label(), doc.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System instruction with `context` embedded after the role text.
pub fn system_instruction(context: &str) -> String {
    format!("{ROLE_INSTRUCTION}\n\n{context}")
}

/// Whether a message is visible to the answer stage.
///
/// Tool results and `ai` messages that only announced tool calls are dropped.
pub fn is_conversational(message: &Message) -> bool {
    match message {
        Message::System { .. } | Message::Human { .. } => true,
        Message::Ai { tool_calls, .. } => tool_calls.is_empty(),
        Message::Tool { .. } => false,
    }
}

/// Messages sent to the model in GENERATE: the system instruction followed
/// by the conversational history in chronological order.
pub fn generation_prompt(history: &[Message], context: &str) -> Vec<Message> {
    std::iter::once(Message::system(system_instruction(context)))
        .chain(history.iter().filter(|m| is_conversational(m)).cloned())
        .collect()
}
