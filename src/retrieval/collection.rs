//! Deterministic collection naming

use crate::session::LearnerProfile;
use std::fmt;

/// Prefix shared by every per-session collection
pub const SESSION_PREFIX: &str = "session_";
pub const KNOWLEDGE_BASE_PREFIX: &str = "kb_";

/// Identifies one vector collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    name: String,
}

impl CollectionKey {
    /// Documents uploaded during one session
    pub fn session(session_id: &str, profile: &LearnerProfile) -> Self {
        Self {
            name: format!(
                "{SESSION_PREFIX}{}_{}",
                sanitize_identifier(session_id),
                scope_suffix(profile)
            ),
        }
    }

    /// Curriculum knowledge base for the learner's grade, subject and language
    pub fn knowledge_base(profile: &LearnerProfile) -> Self {
        Self {
            name: format!("{KNOWLEDGE_BASE_PREFIX}{}", scope_suffix(profile)),
        }
    }

    /// Wrap an existing collection name, e.g. one returned by a listing
    pub fn from_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_session(&self) -> bool {
        self.name.starts_with(SESSION_PREFIX)
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn scope_suffix(profile: &LearnerProfile) -> String {
    format!(
        "{}_{}_{}",
        sanitize_identifier(&profile.grade),
        sanitize_identifier(&profile.subject),
        sanitize_identifier(&profile.language)
    )
}

/// Lower-case and map every character outside `[a-z0-9]` to `_`
pub fn sanitize_identifier(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}
