//! Prompt assembly shared by the answering handlers

use crate::llm::provider::Message;
use crate::retrieval::RetrievedDocument;
use crate::search::SearchHit;
use crate::session::{ChatRole, LearnerProfile, Persona, TurnState};

/// Messages of history sent along with every answer
pub const HISTORY_MESSAGES: usize = 10;

pub const NO_RESOURCES_FOUND: &str =
    "No additional resources were found for this question. Answer from general knowledge and say so if you are unsure.";

/// Persona system prompt built from the learner profile
pub fn persona_prompt(profile: &LearnerProfile) -> String {
    let name = non_empty(&profile.name, "there");
    let grade = non_empty(&profile.grade, "unspecified");
    let subject = non_empty(&profile.subject, "general studies");

    let mut prompt = match profile.persona {
        Persona::Teacher => format!(
            "You are a teaching assistant helping {name}, a teacher of grade {grade} {subject}. \
             Help plan lessons, explain concepts at the right level for grade {grade}, draft \
             exercises and answer keys, and keep answers practical for the classroom."
        ),
        Persona::Student => format!(
            "You are a friendly tutor for {name}, a grade {grade} student studying {subject}. \
             Explain step by step, check understanding with short questions, encourage the \
             student, and never just hand over answers to homework without the reasoning."
        ),
    };

    prompt.push_str(&format!(
        "\nReply in the language with code '{}' unless the user writes in another language.",
        non_empty(&profile.language, "en")
    ));

    if !profile.pending_items.is_empty() {
        prompt.push_str("\n\nPending items to keep in mind:\n");
        for item in &profile.pending_items {
            prompt.push_str(&format!("- {item}\n"));
        }
    }

    prompt
}

fn non_empty<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// Summary of older conversation plus earlier steps of the current plan
pub fn session_context_block(state: &TurnState) -> String {
    let mut block = String::new();

    if let Some(summary) = state.context.summary.as_deref().filter(|s| !s.is_empty()) {
        block.push_str("\n\nEarlier conversation summary:\n");
        block.push_str(summary);
    }

    if !state.intermediate_results.is_empty() {
        block.push_str("\n\nResults from earlier steps for this message:\n");
        for result in &state.intermediate_results {
            block.push_str(&format!(
                "[{}]\n{}\n",
                result.handler.display_name(),
                result.output
            ));
        }
    }

    block
}

/// System prompt followed by recent history, ending with the current query
pub fn build_messages(state: &TurnState, system_prompt: String) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt)];

    let start = state.messages.len().saturating_sub(HISTORY_MESSAGES);
    for message in &state.messages[start..] {
        messages.push(match message.role {
            ChatRole::Human => Message::user(message.content.clone()),
            ChatRole::Assistant => Message::assistant(message.content.clone()),
        });
    }

    let ends_with_query = state
        .messages
        .last()
        .map(|m| m.role == ChatRole::Human && m.content == state.resolved_query)
        .unwrap_or(false);
    if !ends_with_query && !state.resolved_query.is_empty() {
        messages.push(Message::user(state.resolved_query.clone()));
    }

    messages
}

/// Retrieved chunks rendered as a numbered context block
pub fn document_context(documents: &[RetrievedDocument]) -> String {
    if documents.is_empty() {
        return NO_RESOURCES_FOUND.to_string();
    }

    let mut block = String::from(
        "Use the following excerpts from the learner's documents. Cite the source name when you rely on one.\n",
    );
    for (i, doc) in documents.iter().enumerate() {
        block.push_str(&format!(
            "\n[{}] {} (relevance {:.2})\n{}\n",
            i + 1,
            doc.source.display_name(),
            doc.score,
            doc.text.trim()
        ));
    }
    block
}

/// Web results rendered as a numbered list
pub fn web_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {} - {}\n{}", i + 1, hit.title, hit.url, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Instructions for the web-search handler, shaped by what was found
pub fn web_search_instructions(kb: &[RetrievedDocument], web: &[SearchHit]) -> String {
    let web_block = if web.is_empty() {
        "No web results were returned.".to_string()
    } else {
        web_context(web)
    };

    if kb.is_empty() {
        format!(
            "Answer primarily from these web search results. Mention the source URLs you used \
             and point out when information may be outdated.\n\nWEB RESULTS:\n{web_block}"
        )
    } else {
        format!(
            "Answer primarily from the curriculum knowledge base below, which matches what the \
             learner is taught. Use the web results only to add recent facts or examples, and \
             say when they disagree with the curriculum.\n\nCURRICULUM KNOWLEDGE BASE:\n{}\n\nWEB RESULTS:\n{web_block}",
            document_context(kb)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::SourceMeta;
    use crate::session::ChatMessage;

    fn profile(persona: Persona) -> LearnerProfile {
        LearnerProfile {
            persona,
            name: "Sam".to_string(),
            grade: "5".to_string(),
            subject: "math".to_string(),
            language: "en".to_string(),
            pending_items: vec!["fractions worksheet".to_string()],
        }
    }

    fn doc(text: &str) -> RetrievedDocument {
        RetrievedDocument {
            text: text.to_string(),
            score: 0.82,
            source: SourceMeta {
                url: "http://files/notes.pdf".to_string(),
                file_name: Some("notes.pdf".to_string()),
                chunk_index: 0,
            },
        }
    }

    #[test]
    fn test_persona_prompt_variants() {
        let teacher = persona_prompt(&profile(Persona::Teacher));
        assert!(teacher.contains("teacher of grade 5 math"));
        assert!(teacher.contains("fractions worksheet"));

        let student = persona_prompt(&profile(Persona::Student));
        assert!(student.contains("grade 5 student"));
    }

    #[test]
    fn test_persona_prompt_defaults_for_blank_profile() {
        let prompt = persona_prompt(&LearnerProfile::default());
        assert!(prompt.contains("general studies"));
        assert!(!prompt.contains("Pending items"));
    }

    #[test]
    fn test_document_context_empty_and_filled() {
        assert_eq!(document_context(&[]), NO_RESOURCES_FOUND);
        let block = document_context(&[doc("Fractions are parts of a whole.")]);
        assert!(block.contains("[1] notes.pdf"));
        assert!(block.contains("Fractions are parts of a whole."));
    }

    #[test]
    fn test_web_instructions_switch_framing() {
        let hits = vec![SearchHit {
            title: "News".to_string(),
            url: "https://news".to_string(),
            snippet: "fresh".to_string(),
        }];
        let web_primary = web_search_instructions(&[], &hits);
        assert!(web_primary.starts_with("Answer primarily from these web search results"));

        let kb_primary = web_search_instructions(&[doc("curriculum text")], &hits);
        assert!(kb_primary.starts_with("Answer primarily from the curriculum knowledge base"));
        assert!(kb_primary.contains("curriculum text"));
    }

    #[test]
    fn test_build_messages_ends_with_query_once() {
        let mut state = TurnState::new("s", profile(Persona::Student));
        state.messages.push(ChatMessage::human("hi"));
        state.messages.push(ChatMessage::assistant("hello"));
        state.messages.push(ChatMessage::human("what is 1/2 + 1/4?"));
        state.resolved_query = "what is 1/2 + 1/4?".to_string();

        let messages = build_messages(&state, "sys".to_string());
        assert_eq!(messages.len(), 4);
        assert_eq!(messages.last().unwrap().content, "what is 1/2 + 1/4?");
    }
}
