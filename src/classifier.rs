//! Task Classifier
//!
//! Routes a goal to one of four categories:
//! - Delegate: hands-on execution a peer executor can take over ("покажи файлы", "restart the container")
//! - Analytic: reasoning-heavy requests ("compare these two approaches")
//! - Trivial: greetings and acknowledgements, short inputs only
//! - Complex: everything else
//!
//! Indicators are checked in that order, so a short "привет, покажи файлы"
//! is still delegated rather than treated as a greeting.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Trivial,
    Delegate,
    Analytic,
    Complex,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Trivial => "trivial",
            TaskCategory::Delegate => "delegate",
            TaskCategory::Analytic => "analytic",
            TaskCategory::Complex => "complex",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword table: `phrases` match anywhere in the lower-cased text,
/// `words` only as whole tokens.
struct Indicators {
    phrases: &'static [&'static str],
    words: &'static [&'static str],
}

const DELEGATE: Indicators = Indicators {
    phrases: &[
        // Files and directories
        "покажи файл", "покажи папк", "список файлов", "содержимое", "прочитай", "открой файл",
        "show files", "list files", "show the file", "read the file", "directory listing",
        // Commands
        "запусти", "выполни", "перезапусти", "установи", "останови", "удали файл",
        "run the", "run a ", "execute", "restart", "install", "deploy",
        // Infrastructure
        "docker", "контейнер", "container", "логи", "ssh", "терминал", "terminal",
        "git status", "git log", "systemctl", "kubectl",
    ],
    words: &["покажи", "ls", "cat", "grep", "pwd", "logs", "run"],
};

const ANALYTIC: Indicators = Indicators {
    phrases: &[
        "проанализируй", "анализ", "сравни", "оцени", "исследуй", "объясни почему", "стратеги",
        "плюсы и минусы", "архитектур",
        "analyze", "analyse", "analysis", "compare", "evaluate", "investigate", "research",
        "explain why", "pros and cons", "trade-off", "tradeoff", "strategy", "architecture",
    ],
    words: &["почему", "why"],
};

const TRIVIAL: Indicators = Indicators {
    phrases: &[
        "доброе утро", "добрый день", "добрый вечер", "как дела", "thank you", "good morning",
        "good evening", "how are you",
    ],
    words: &[
        "привет", "здравствуй", "здравствуйте", "спасибо", "пока", "ок", "хорошо",
        "hi", "hello", "hey", "thanks", "ok", "okay", "bye",
    ],
};

/// Administrative or self-referential questions. These need a
/// retrieval-backed answer, never hands-on execution elsewhere.
const REFERENCE: Indicators = Indicators {
    phrases: &[
        "твой статус", "какой статус", "статус системы", "кто ты", "что ты умеешь", "твои возможности",
        "your status", "system status", "who are you", "what can you do", "your capabilities",
        "what is your", "what's your",
    ],
    words: &["помощь", "справка", "help"],
};

/// Inputs longer than this are never trivial.
const TRIVIAL_MAX_WORDS: usize = 8;

pub struct TaskClassifier;

impl TaskClassifier {
    /// Classify a goal. Total and deterministic.
    pub fn classify(goal: &str) -> TaskCategory {
        let text = goal.trim().to_lowercase();
        if text.is_empty() {
            return TaskCategory::Trivial;
        }
        let tokens = tokenize(&text);

        if DELEGATE.matches(&text, &tokens) {
            TaskCategory::Delegate
        } else if ANALYTIC.matches(&text, &tokens) {
            TaskCategory::Analytic
        } else if tokens.len() <= TRIVIAL_MAX_WORDS && TRIVIAL.matches(&text, &tokens) {
            TaskCategory::Trivial
        } else {
            TaskCategory::Complex
        }
    }

    /// True for "what is your status"-style goals that must stay local.
    pub fn is_reference_query(goal: &str) -> bool {
        let text = goal.trim().to_lowercase();
        let tokens = tokenize(&text);
        REFERENCE.matches(&text, &tokens)
    }
}

impl Indicators {
    fn matches(&self, text: &str, tokens: &[&str]) -> bool {
        self.phrases.iter().any(|p| text.contains(p))
            || tokens.iter().any(|t| self.words.contains(t))
    }
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}
