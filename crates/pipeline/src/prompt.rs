use schemars::{JsonSchema, schema::RootSchema, schema_for};
use serde::Serialize;

/// JSON Schema of a stage response type
pub fn response_schema<T: JsonSchema>() -> RootSchema {
    schema_for!(T)
}

/// Assembles a stage prompt from titled sections
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    text: String,
}

impl PromptBuilder {
    pub fn new(role: &str) -> Self {
        Self { text: format!("{}\n", role.trim()) }
    }

    pub fn section(mut self, title: &str, body: impl AsRef<str>) -> Self {
        self.text.push_str(&format!("\n## {title}\n{}\n", body.as_ref().trim()));
        self
    }

    /// Section whose body is `value` as pretty JSON
    pub fn json_section<T: Serialize>(self, title: &str, value: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_string_pretty(value)?;
        Ok(self.section(title, body))
    }

    /// Closing section demanding a JSON reply matching `T`
    pub fn response_format<T: JsonSchema>(self) -> serde_json::Result<Self> {
        let schema = serde_json::to_string_pretty(&response_schema::<T>())?;
        Ok(self.section(
            "Response format",
            format!(
                "Reply with a single JSON object that validates against this JSON Schema. \
                 Do not add any text outside the JSON object.\n{schema}"
            ),
        ))
    }

    pub fn build(self) -> String {
        self.text
    }
}
