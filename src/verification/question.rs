//! Effective verification question for a guild.
//!
//! A guild override wins when it is usable. Otherwise the global question is
//! used, which may itself be missing.

use poise::serenity_prelude::GuildId;
use std::fmt;

use crate::config::{Question, VerifierConfig};

/// Where a resolved question came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionSource {
    Guild,
    Global,
}

impl fmt::Display for QuestionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionSource::Guild => write!(f, "guild"),
            QuestionSource::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuestion {
    pub question: Option<Question>,
    pub source: QuestionSource,
}

impl ResolvedQuestion {
    /// The question, only if it can actually be asked
    pub fn usable(&self) -> Option<&Question> {
        self.question.as_ref().filter(|q| q.is_usable())
    }
}

pub fn resolve_question(config: &VerifierConfig, guild_id: GuildId) -> ResolvedQuestion {
    let guild_question = config
        .guilds
        .get(&guild_id.to_string())
        .and_then(|g| g.question.clone())
        .filter(Question::is_usable);

    match guild_question {
        Some(question) => ResolvedQuestion {
            question: Some(question),
            source: QuestionSource::Guild,
        },
        None => ResolvedQuestion {
            question: config.global.question.clone(),
            source: QuestionSource::Global,
        },
    }
}

/// Result of trying to remove a guild's override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOverride {
    Cleared,
    NoOverride,
    /// Refused because the guild would be left without any question
    NoGlobalFallback,
}

/// Remove a guild's question override unless that leaves it with nothing.
/// Must run inside a single store update.
pub fn clear_guild_question(config: &mut VerifierConfig, guild_id: GuildId) -> ClearOverride {
    let has_override = config
        .guilds
        .get(&guild_id.to_string())
        .is_some_and(|g| g.question.is_some());
    if !has_override {
        return ClearOverride::NoOverride;
    }

    let has_global = config
        .global
        .question
        .as_ref()
        .is_some_and(Question::is_usable);
    if !has_global {
        return ClearOverride::NoGlobalFallback;
    }

    config.guild_mut(guild_id).question = None;
    ClearOverride::Cleared
}
