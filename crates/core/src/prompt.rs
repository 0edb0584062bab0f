//! Prompt templates with named `{slot}` placeholders.
//!
//! Every slot a template mentions must be supplied at render time; rendering
//! fails instead of leaving a raw placeholder in the prompt.

use crate::error::PromptError;
use std::collections::HashMap;

pub const REFINE_TEMPLATE: &str = concat!(
    "You are a helpful assistant refining document chunks extracted from a PDF. ",
    "Rewrite the chunk so it reads cleanly: fix broken words and hyphenation, ",
    "join lines that were split mid-sentence and drop page headers, footers and ",
    "stray artifacts. Keep every fact, number and name. Do not summarize or add ",
    "information. Return only the rewritten text.\n\n",
    "Original:\n\"\"\"{chunk}\"\"\""
);

pub const CONDENSE_QUESTION_TEMPLATE: &str = concat!(
    "Given the following conversation and a follow up question, rephrase the follow up ",
    "question to be a standalone question, in its original language.\n\n",
    "Chat History:\n{chat_history}\n",
    "Follow Up Input: {question}\n",
    "Standalone question:"
);

pub const ANSWER_TEMPLATE: &str = concat!(
    "Use the following pieces of context to answer the question at the end. ",
    "If you don't know the answer, just say that you don't know, don't try to ",
    "make up an answer.\n\n",
    "{context}\n\n",
    "Chat History:\n{chat_history}\n\n",
    "Question: {question}\n",
    "Helpful Answer:"
);

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    slots: Vec<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let slots = parse_slots(&template);
        Self { template, slots }
    }

    pub fn refine() -> Self {
        Self::new(REFINE_TEMPLATE)
    }

    pub fn condense_question() -> Self {
        Self::new(CONDENSE_QUESTION_TEMPLATE)
    }

    pub fn answer() -> Self {
        Self::new(ANSWER_TEMPLATE)
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    pub fn render(&self, fields: &HashMap<&str, &str>) -> Result<String, PromptError> {
        if let Some(missing) = self
            .slots
            .iter()
            .find(|slot| !fields.contains_key(slot.as_str()))
        {
            return Err(PromptError::MissingSlot(missing.clone()));
        }

        let mut rendered = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some((before, name, after)) = next_placeholder(rest) {
            rendered.push_str(before);
            match fields.get(name) {
                Some(value) => rendered.push_str(value),
                None => {
                    rendered.push('{');
                    rendered.push_str(name);
                    rendered.push('}');
                }
            }
            rest = after;
        }
        rendered.push_str(rest);

        Ok(rendered)
    }
}

/// Splits `text` at the first `{identifier}` into (before, identifier, after).
fn next_placeholder(text: &str) -> Option<(&str, &str, &str)> {
    let mut offset = 0;
    while let Some(open) = text[offset..].find('{') {
        let open = offset + open;
        let after_open = &text[open + 1..];
        let close = after_open.find('}')?;
        let name = &after_open[..close];
        let is_identifier = !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if is_identifier {
            return Some((&text[..open], name, &after_open[close + 1..]));
        }
        offset = open + 1;
    }
    None
}

fn parse_slots(template: &str) -> Vec<String> {
    let mut slots: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some((_, name, after)) = next_placeholder(rest) {
        if !slots.iter().any(|slot| slot == name) {
            slots.push(name.to_string());
        }
        rest = after;
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_declare_their_slots() {
        assert_eq!(PromptTemplate::refine().slots(), ["chunk"]);
        assert_eq!(
            PromptTemplate::condense_question().slots(),
            ["chat_history", "question"]
        );
        assert_eq!(
            PromptTemplate::answer().slots(),
            ["context", "chat_history", "question"]
        );
    }

    #[test]
    fn render_fills_every_slot() {
        let template = PromptTemplate::new("Q: {question}\nA about {question} using {context}");
        let fields = HashMap::from([("question", "pumps"), ("context", "manual")]);

        let rendered = template.render(&fields).expect("all slots supplied");
        assert_eq!(rendered, "Q: pumps\nA about pumps using manual");
    }

    #[test]
    fn render_rejects_missing_slot() {
        let template = PromptTemplate::refine();
        let error = template.render(&HashMap::new()).unwrap_err();
        assert!(matches!(error, PromptError::MissingSlot(slot) if slot == "chunk"));
    }

    #[test]
    fn placeholders_inside_values_are_left_alone() {
        let template = PromptTemplate::condense_question();
        let fields = HashMap::from([
            ("chat_history", "Human: what is {question}?"),
            ("question", "why"),
        ]);
        let rendered = template.render(&fields).expect("slots supplied");
        assert!(rendered.contains("Human: what is {question}?"));
        assert!(rendered.contains("Follow Up Input: why\n"));
    }
}
