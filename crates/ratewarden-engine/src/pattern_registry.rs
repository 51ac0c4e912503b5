//! Component C1 — classifies an opaque error as rate-limit / not, via a
//! priority-ordered set of patterns (spec §4.1).

use parking_lot::RwLock;
use regex::Regex;

use ratewarden_core::ClassifiableError;

/// A single match rule: either a literal (case-insensitive substring) or a
/// pre-compiled regex, tested verbatim (spec §9: "represent as a sum type
/// Pattern = Literal(String) | Regex(CompiledPattern) and compile regexes at
/// registration time").
#[derive(Clone)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    fn matches(&self, haystack: &str) -> bool {
        match self {
            Pattern::Literal(lit) => haystack.contains(&lit.to_lowercase()),
            Pattern::Regex(re) => re.is_match(haystack),
        }
    }
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Literal(s) => write!(f, "Literal({s:?})"),
            Pattern::Regex(r) => write!(f, "Regex({})", r.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub name: String,
    pub provider: Option<String>,
    pub patterns: Vec<Pattern>,
    pub priority: i32,
}

/// Priority-sorted classifier. Read-mostly; mutations are rare and guarded
/// by a single lock (spec §4.1 "Thread-safety").
pub struct PatternRegistry {
    patterns: RwLock<Vec<ErrorPattern>>,
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PatternRegistry {
    /// Empty registry — no defaults.
    pub fn new() -> Self {
        Self {
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// Registry seeded with the built-in defaults (spec §4.1).
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.reset_to_defaults();
        registry
    }

    fn default_patterns() -> Vec<ErrorPattern> {
        vec![
            ErrorPattern {
                name: "http-429".into(),
                provider: None,
                patterns: vec![Pattern::Regex(Regex::new(r"\b429\b").unwrap())],
                priority: 100,
            },
            ErrorPattern {
                name: "generic-rate-limit".into(),
                provider: None,
                patterns: vec![
                    Pattern::Literal("rate limit".into()),
                    Pattern::Literal("too many requests".into()),
                    Pattern::Literal("quota exceeded".into()),
                ],
                priority: 90,
            },
            ErrorPattern {
                name: "provider-anthropic".into(),
                provider: Some("anthropic".into()),
                patterns: vec![
                    Pattern::Literal("overloaded_error".into()),
                    Pattern::Literal("usage limit".into()),
                ],
                priority: 80,
            },
            ErrorPattern {
                name: "provider-openai".into(),
                provider: Some("openai".into()),
                patterns: vec![
                    Pattern::Literal("insufficient_quota".into()),
                    Pattern::Literal("requests per min".into()),
                ],
                priority: 80,
            },
            ErrorPattern {
                name: "provider-bedrock".into(),
                provider: Some("bedrock".into()),
                patterns: vec![Pattern::Literal("throttlingexception".into())],
                priority: 80,
            },
        ]
    }

    /// Restore the default pattern set, discarding any custom registrations.
    pub fn reset_to_defaults(&self) {
        let mut patterns = Self::default_patterns();
        patterns.sort_by(|a, b| b.priority.cmp(&a.priority));
        *self.patterns.write() = patterns;
    }

    /// Register a pattern. A duplicate `name` replaces the prior definition.
    /// The whole list is re-sorted by descending priority.
    pub fn register(&self, pattern: ErrorPattern) {
        let mut patterns = self.patterns.write();
        patterns.retain(|p| p.name != pattern.name);
        patterns.push(pattern);
        patterns.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn register_many(&self, patterns: impl IntoIterator<Item = ErrorPattern>) {
        for p in patterns {
            self.register(p);
        }
    }

    pub fn remove(&self, name: &str) {
        self.patterns.write().retain(|p| p.name != name);
    }

    pub fn clear_all(&self) {
        self.patterns.write().clear();
    }

    /// Classify `error`, returning the first (highest-priority) matching
    /// pattern's name, or `None` if nothing matches.
    pub fn get_matched(&self, error: &ClassifiableError) -> Option<String> {
        let haystack = error.searchable_text();
        let patterns = self.patterns.read();
        for entry in patterns.iter() {
            if entry.patterns.iter().any(|p| p.matches(&haystack)) {
                return Some(entry.name.clone());
            }
        }
        None
    }

    pub fn is_rate_limit_error(&self, error: &ClassifiableError) -> bool {
        self.get_matched(error).is_some()
    }
}
