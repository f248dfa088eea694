//! The "search legal knowledge base" tool offered to the model.

use serde_json::{json, Value};
use std::fmt::Write;

use crate::models::internal::SearchDocument;
use crate::services::llm::{ToolCall, ToolDeclaration};

pub const TOOL_NAME: &str = "search_legal_knowledge_base";

pub const SYSTEM_INSTRUCTION: &str = "You are a legal consultant specialising in the laws of the \
Macau Special Administrative Region. When a question depends on specific statutes, regulations \
or case law, call the search_legal_knowledge_base tool with concise keywords before answering. \
Cite the documents you rely on, state when the knowledge base has nothing relevant, and remind \
the user that your answer is general information rather than formal legal advice.";

pub fn declaration() -> ToolDeclaration {
    ToolDeclaration {
        name: TOOL_NAME.to_string(),
        description: "Search the Macau legal knowledge base (laws, regulations, decisions) \
                      for documents relevant to the given keywords."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "keywords": {
                    "type": "string",
                    "description": "Search keywords describing the legal topic, in the user's language"
                }
            },
            "required": ["keywords"]
        }),
    }
}

/// Reads the `keywords` argument; a bare string argument bag is accepted too.
pub fn keywords(call: &ToolCall) -> Option<String> {
    let raw = match &call.args {
        Value::String(s) => Some(s.as_str()),
        args => args.get("keywords").and_then(Value::as_str),
    }?;

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Renders search hits as the markdown handed back to the model.
pub fn render_results(keywords: &str, documents: &[SearchDocument]) -> String {
    if documents.is_empty() {
        return String::new();
    }

    let mut out = format!(
        "Found {} relevant legal documents for \"{}\":\n",
        documents.len(),
        keywords
    );

    for (i, doc) in documents.iter().enumerate() {
        let title = doc.metadata_str("title").unwrap_or("Untitled document");
        let _ = write!(out, "\n### {}. {}\n", i + 1, title);
        let _ = writeln!(out, "- Document ID: {}", doc.id);
        if let Some(law_number) = doc.metadata_str("law_number") {
            let _ = writeln!(out, "- Law number: {}", law_number);
        }
        if let Some(category) = doc.metadata_str("category") {
            let _ = writeln!(out, "- Category: {}", category);
        }
        let _ = writeln!(out, "- Relevance: {:.1}%", doc.similarity * 100.0);
        let _ = writeln!(out, "\n{}", doc.content.trim());
    }

    out
}
