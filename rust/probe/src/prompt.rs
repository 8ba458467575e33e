//! Chat prompts and templates.

use probe_config::TemplateType;
use serde::{Deserialize, Serialize};

const QA_INSTRUCTION: &str = "Please evaluate the statement or claim contained in the question. \
Respond with only one word, either 'Yes' if the claim is correct or 'No' if it is incorrect. \
Do not include any additional text or commentary.";

const FC_INSTRUCTION: &str = "Please evaluate the statement or claim. \
Respond with only one word, either 'True' if the claim is correct or 'False' if it is incorrect. \
Do not include any additional text or commentary.";

/// Speaker of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A chat-style prompt: a list of messages sent as one conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatPrompt {
    pub messages: Vec<ChatMessage>,
}

impl ChatPrompt {
    /// System instruction followed by a single user turn.
    #[must_use]
    pub fn with_system(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: system.into(),
                },
                ChatMessage {
                    role: Role::User,
                    content: user.into(),
                },
            ],
        }
    }

    /// Content of the last user message.
    #[must_use]
    pub fn user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// A validated triple template for one prompt family.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    kind: TemplateType,
    template: String,
}

impl PromptTemplate {
    /// Validate `template` for `kind`.
    ///
    /// Every template needs `{subject}`, `{predicate}` and `{object}`; question
    /// templates also need `?` and statement templates `.`.
    pub fn new(kind: TemplateType, template: impl Into<String>) -> Result<Self, PromptError> {
        let template = template.into();
        let terminator = match kind {
            TemplateType::Qa => "?",
            TemplateType::Fc => ".",
        };
        let missing: Vec<&'static str> = ["{subject}", "{predicate}", "{object}", terminator]
            .into_iter()
            .filter(|ph| !template.contains(ph))
            .collect();
        if !missing.is_empty() {
            return Err(PromptError::MissingPlaceholders {
                template,
                missing: missing.join(", "),
            });
        }
        Ok(Self { kind, template })
    }

    #[must_use]
    pub fn kind(&self) -> TemplateType {
        self.kind
    }

    #[must_use]
    pub fn instruction(&self) -> &'static str {
        match self.kind {
            TemplateType::Qa => QA_INSTRUCTION,
            TemplateType::Fc => FC_INSTRUCTION,
        }
    }

    /// Fill the template with a triple.
    #[must_use]
    pub fn render(&self, subject: &str, predicate: &str, object: &str) -> ChatPrompt {
        let user = self
            .template
            .replace("{subject}", subject)
            .replace("{predicate}", predicate)
            .replace("{object}", object);
        ChatPrompt::with_system(self.instruction(), user)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("template {template:?} is missing {missing}")]
    MissingPlaceholders { template: String, missing: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_qa() {
        let t = PromptTemplate::new(TemplateType::Qa, "Was {subject} {predicate} {object}?").unwrap();
        let prompt = t.render("Ada Lovelace", "born in", "London");
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert!(prompt.messages[0].content.contains("'Yes'"));
        assert_eq!(
            prompt.user_content(),
            Some("Was Ada Lovelace born in London?")
        );
    }

    #[test]
    fn test_fc_requires_period() {
        let err = PromptTemplate::new(TemplateType::Fc, "{subject} {predicate} {object}").unwrap_err();
        let PromptError::MissingPlaceholders { missing, .. } = err;
        assert_eq!(missing, ".");
    }

    #[test]
    fn test_missing_placeholders_listed() {
        let err = PromptTemplate::new(TemplateType::Qa, "Is {subject} real?").unwrap_err();
        assert!(err.to_string().contains("{predicate}, {object}"));
    }

    #[test]
    fn test_prompt_serializes_as_message_list() {
        let prompt = ChatPrompt::with_system("sys", "hi");
        let json = serde_json::to_string(&prompt).unwrap();
        assert_eq!(
            json,
            r#"[{"role":"system","content":"sys"},{"role":"user","content":"hi"}]"#
        );
    }
}
