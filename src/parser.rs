//! Output parsing.

/// Passes model text through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrOutputParser;

impl StrOutputParser {
    pub fn parse(&self, text: String) -> String {
        text
    }

    pub fn output_schema(&self) -> serde_json::Value {
        serde_json::json!({ "title": "StrOutputParserOutput", "type": "string" })
    }
}
