//! Reply sanitization.
//!
//! Generated text passes through a fixed, ordered list of case-insensitive
//! removals (upstream product name, provider name, disclosure phrases)
//! before it ever reaches a caller. The pass is deterministic and
//! idempotent so replies that are stored and later re-emitted (job polling,
//! audit records) can be sanitized defensively more than once.

use regex::Regex;

/// Substituted when sanitization strips a reply down to nothing.
pub const EMPTY_PLACEHOLDER: &str = "**Aviso:** resposta indisponível.";

/// Prepended when the reply leaks tell-tale Spanish (the upstream
/// occasionally ignores the pt-BR instruction).
pub const LANGUAGE_NOTICE: &str = "**Aviso:** resposta corrigida automaticamente.";

/// Words that indicate the reply slipped into Spanish.
const SPANISH_MARKERS: [&str; 5] = ["usted", "respuesta", "mensaje", "puede", "hola"];

/// Ordered removal patterns. Order matters: the compound product names go
/// first so their remnants don't survive a shorter pattern.
const STRIP_PATTERNS: [&str; 6] = [
    r"(?i)wormgpt(?:[-\s]?v\d+)?",
    r"(?i)wrmgpt",
    r"(?i)openai",
    r"(?i)chatgpt",
    r"(?i)como (?:um )?modelo de linguagem(?: de ia)?",
    r"(?i)as an ai language model",
];

pub struct Sanitizer {
    strips: Vec<Regex>,
    squeeze_spaces: Regex,
    squeeze_newlines: Regex,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            strips: STRIP_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("fixed sanitizer pattern"))
                .collect(),
            squeeze_spaces: Regex::new(r"[ \t]{2,}").expect("fixed sanitizer pattern"),
            squeeze_newlines: Regex::new(r"\n{3,}").expect("fixed sanitizer pattern"),
        }
    }

    /// Strip forbidden terms and normalize whitespace.
    ///
    /// Never returns an empty string: a reply reduced to nothing becomes
    /// [`EMPTY_PLACEHOLDER`]. Idempotent by construction - every rewrite
    /// step maps its own output to itself.
    pub fn sanitize(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pattern in &self.strips {
            out = pattern.replace_all(&out, "").into_owned();
        }

        out = self.squeeze_spaces.replace_all(&out, " ").into_owned();
        out = self.squeeze_newlines.replace_all(&out, "\n\n").into_owned();
        let out = out.trim();

        if out.is_empty() {
            return EMPTY_PLACEHOLDER.to_string();
        }

        if self.leaked_spanish(out) && !out.starts_with(LANGUAGE_NOTICE) {
            return format!("{}\n\n{}", LANGUAGE_NOTICE, out);
        }

        out.to_string()
    }

    fn leaked_spanish(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        SPANISH_MARKERS.iter().any(|word| lower.contains(word))
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}
