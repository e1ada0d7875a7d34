/// Prompt construction for batch translation.
///
/// The system prompt carries the task, the response contract and the
/// preservation rules. The user message is a bare JSON array of
/// `{"id", "en"}` objects.
use serde::Serialize;
use std::collections::BTreeMap;

/// One entry of the user payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub id: String,
    pub en: String,
}

/// Rules the model is told to follow.
#[derive(Debug, Clone)]
pub struct TranslationConstraints {
    /// Require `⟦B<n>⟧` tokens to survive untouched.
    pub preserve_markers: bool,
    /// Vocabulary that must stay in English.
    pub protected_terms: Vec<String>,
    /// Required English → Spanish renderings.
    pub glossary: BTreeMap<String, String>,
}

impl Default for TranslationConstraints {
    fn default() -> Self {
        Self {
            preserve_markers: true,
            protected_terms: Vec::new(),
            glossary: BTreeMap::new(),
        }
    }
}

impl TranslationConstraints {
    pub fn to_prompt(&self) -> String {
        let mut constraints = Vec::new();

        if self.preserve_markers {
            constraints.push(
                "CRITICAL: Tokens like ⟦B0⟧, ⟦B1⟧ stand for bracketed game text. Copy every token exactly, once, in a sensible position.".to_string(),
            );
        }

        if !self.protected_terms.is_empty() {
            constraints.push(format!(
                "Keep these terms in English exactly as written: {}",
                self.protected_terms.join(", ")
            ));
        }

        if !self.glossary.is_empty() {
            constraints.push("Always use these translations:".to_string());
            for (english, spanish) in &self.glossary {
                constraints.push(format!("- {english} => {spanish}"));
            }
        }

        constraints.push("".to_string());
        constraints.push("Translation rules:".to_string());
        constraints.push("- Keep radio brevity and military aviation phraseology.".to_string());
        constraints.push("- Do NOT change numbers, headings, frequencies, or callsigns.".to_string());
        constraints.push("- Translate every item; never merge or drop ids.".to_string());

        constraints.join("\n")
    }
}

pub fn build_system_prompt(constraints: &TranslationConstraints) -> String {
    let base_prompt = "You are a professional translator of DCS World mission text.\n\
        Translate each item from English to Spanish.\n\n";

    format!(
        "{}\
        IMPORTANT CONSTRAINTS:\n\
        {}\n\n\
        Respond ONLY with JSON of the form {{\"data\": [{{\"id\": \"...\", \"es\": \"...\"}}]}}, \
        one object per input id, without explanations or notes.",
        base_prompt,
        constraints.to_prompt()
    )
}

/// JSON array sent as the user message.
pub fn build_user_payload(items: &[BatchItem]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let prompt = TranslationConstraints::default().to_prompt();
        assert!(prompt.contains("CRITICAL"));
        assert!(prompt.contains("⟦B0⟧"));
        assert!(!prompt.contains("Keep these terms"));
    }

    #[test]
    fn test_terms_and_glossary_are_listed() {
        let constraints = TranslationConstraints {
            protected_terms: vec!["Bullseye".into(), "AWACS".into()],
            glossary: BTreeMap::from([("tanker".to_string(), "cisterna".to_string())]),
            ..Default::default()
        };
        let prompt = constraints.to_prompt();
        assert!(prompt.contains("Bullseye, AWACS"));
        assert!(prompt.contains("- tanker => cisterna"));
    }

    #[test]
    fn test_build_system_prompt() {
        let prompt = build_system_prompt(&TranslationConstraints::default());
        assert!(prompt.contains("English to Spanish"));
        assert!(prompt.contains("IMPORTANT CONSTRAINTS"));
        assert!(prompt.contains(r#"{"data": [{"id": "...", "es": "..."}]}"#));
    }

    #[test]
    fn test_build_user_payload() {
        let payload = build_user_payload(&[BatchItem {
            id: "SEG_0123456789ab".into(),
            en: "Say \"ready\" ⟦B0⟧".into(),
        }]);
        assert_eq!(
            payload,
            r#"[{"id":"SEG_0123456789ab","en":"Say \"ready\" ⟦B0⟧"}]"#
        );
    }
}
