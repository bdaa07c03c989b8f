//! Extraction prompt construction.

use crate::models::NOT_FOUND;

/// System instruction sent with every extraction prompt.
pub const SYSTEM_PROMPT: &str =
    "You are a data extraction specialist. Always respond with valid JSON.";

/// Default number of document characters placed in a prompt.
pub const DEFAULT_CHAR_BUDGET: usize = 8000;

/// Builds extraction prompts with a bounded amount of document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBuilder {
    char_budget: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CHAR_BUDGET)
    }
}

impl PromptBuilder {
    pub fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }

    pub fn char_budget(&self) -> usize {
        self.char_budget
    }

    /// Build the user prompt for `fields` of a `form_type` document.
    pub fn build(&self, text: &str, fields: &[String], form_type: &str) -> String {
        self.build_with_instructions(text, fields, form_type, None)
    }

    /// Build the user prompt, appending caller instructions after the rules.
    pub fn build_with_instructions(
        &self,
        text: &str,
        fields: &[String],
        form_type: &str,
        instructions: Option<&str>,
    ) -> String {
        let field_list = fields
            .iter()
            .map(|f| json_string(f))
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = String::new();
        prompt.push_str(&format!(
            "You are an expert at extracting structured data from {form_type} forms.\n\n"
        ));
        prompt.push_str(&format!(
            "Please extract the following fields from the provided text: {field_list}\n\n"
        ));
        prompt.push_str("Instructions:\n");
        prompt.push_str("1. Analyze the text carefully and identify the requested information\n");
        prompt.push_str(&format!(
            "2. If a field is not found, use \"{NOT_FOUND}\" as the value. Never omit a requested field\n"
        ));
        prompt.push_str("3. Return the data in JSON format with the exact field names requested\n");
        prompt.push_str("4. Include confidence scores (0.0 to 1.0) for each extraction\n");
        prompt.push_str("5. Provide brief reasoning for each extraction\n");

        if let Some(extra) = instructions.map(str::trim).filter(|s| !s.is_empty()) {
            prompt.push_str(&format!("\nAdditional instructions:\n{extra}\n"));
        }

        prompt.push_str("\nText to analyze:\n");
        prompt.push_str(truncate_chars(text, self.char_budget));
        prompt.push_str("\n\nPlease respond with a JSON object in this exact format:\n");
        prompt.push_str(&response_shape(fields));
        prompt.push('\n');
        prompt
    }
}

/// Build a prompt with the default character budget.
pub fn build_prompt(text: &str, fields: &[String], form_type: &str) -> String {
    PromptBuilder::default().build(text, fields, form_type)
}

/// The longest prefix of `text` holding at most `budget` characters.
pub fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `value` as a quoted, escaped JSON string.
fn json_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Example of the three-key response object, keyed by the requested fields.
fn response_shape(fields: &[String]) -> String {
    let section = |value: &str| {
        fields
            .iter()
            .map(|f| format!("        {}: {value}", json_string(f)))
            .collect::<Vec<_>>()
            .join(",\n")
    };

    format!(
        "{{\n    \"extracted_data\": {{\n{}\n    }},\n    \"confidence_scores\": {{\n{}\n    }},\n    \"reasoning\": {{\n{}\n    }}\n}}",
        section("\"extracted value\""),
        section("0.95"),
        section("\"brief explanation of where the value was found\""),
    )
}
