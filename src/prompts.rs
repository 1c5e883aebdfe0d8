//! Prompts for LLM-based slide field extraction.
//!
//! The wording is tunable; what is fixed is the output contract described by
//! [`FIELD_SCHEMA`]: one JSON object with five string fields. Callers can
//! override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`].

/// JSON schema of the object the service must return.
pub const FIELD_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "codigoParceiro": { "type": "string", "description": "Partner code, digits only" },
    "nomeLoja":       { "type": "string", "description": "Store name without codes" },
    "colaborador":    { "type": "string", "description": "Promoter full name without label" },
    "superior":       { "type": "string", "description": "Supervisor full name without label" },
    "dataEnvio":      { "type": "string", "description": "Submission date/time exactly as written" }
  },
  "required": ["codigoParceiro", "nomeLoja", "colaborador", "superior", "dataEnvio"],
  "additionalProperties": false
}"#;

/// Default system prompt for extracting fields from one slide's text.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You extract structured data from the text of a single PowerPoint slide used in retail merchandising reports. The text is noisy: labels, brand names and values may share a line or be split across lines.

Extract exactly these fields:

1. codigoParceiro: the partner (store) code. Digits only; strip any label or brand prefix (e.g. "Junco 225699" → "225699").
2. nomeLoja: the store name that follows the code. Do not include the code or separators.
3. colaborador: the promoter's full name. Remove labels such as "Colaborador:" and any brand word that prefixes the label and repeats before the name.
4. superior: the supervisor's full name, without the "Superior:" label.
5. dataEnvio: the submission date and time, copied verbatim in whatever format appears in the text.

Rules:
- Use an empty string for any field you cannot find. Never invent values.
- Answer with ONE JSON object matching the schema below and nothing else: no prose, no markdown fences.

Schema:
"#;

/// Build the full system prompt: instructions followed by the schema.
pub fn system_prompt(custom: Option<&str>) -> String {
    match custom {
        Some(p) => p.to_string(),
        None => format!("{DEFAULT_SYSTEM_PROMPT}{FIELD_SCHEMA}"),
    }
}

/// Build the user message carrying the slide text.
pub fn slide_user_message(slide_number: u32, text: &str) -> String {
    format!("Slide {slide_number} text:\n\"\"\"\n{text}\n\"\"\"")
}
