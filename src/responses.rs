//! Canned chat replies.
//!
//! A `ResponseTable` maps keyword groups to pre-split fragments. Fragments
//! are emitted verbatim as chunk frames, so their spacing and punctuation are
//! part of the rendered text.

/// One keyword group and the reply it selects.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRule {
    /// Lowercase keywords; any one of them matching selects this rule.
    pub keywords: Vec<String>,
    /// Reply fragments in emission order.
    pub fragments: Vec<String>,
}

impl ResponseRule {
    pub fn new(keywords: &[&str], fragments: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn matches(&self, normalized: &str) -> bool {
        self.keywords.iter().any(|k| normalized.contains(k.as_str()))
    }
}

/// Immutable keyword -> fragments lookup with a fallback reply.
///
/// Rules are checked in order and the first match wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTable {
    rules: Vec<ResponseRule>,
    fallback: Vec<String>,
}

impl ResponseTable {
    pub fn new(rules: Vec<ResponseRule>, fallback: &[&str]) -> Self {
        Self {
            rules,
            fallback: fallback.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Pick the reply for `message` (case-insensitive substring match).
    pub fn select(&self, message: &str) -> &[String] {
        let normalized = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&normalized))
            .map(|rule| rule.fragments.as_slice())
            .unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &[String] {
        &self.fallback
    }
}

impl Default for ResponseTable {
    fn default() -> Self {
        let rules = vec![
            ResponseRule::new(
                &["hello", "hi"],
                &[
                    "Hello", "! ", "Welcome", " to ", "Inventing", " Chat", ". ", "How", " can",
                    " I ", "help", " you", " today", "?",
                ],
            ),
            ResponseRule::new(
                &["how are you"],
                &[
                    "I", "'m", " doing", " great", ", ", "thanks", " for", " asking", "! ", "I",
                    "'m", " here", " to", " assist", " you", " with", " any", " questions", " or",
                    " tasks", " you", " might", " have", ".",
                ],
            ),
            ResponseRule::new(
                &["what can you do"],
                &[
                    "I", " can", " help", " you", " with", " a", " variety", " of", " tasks",
                    " including", ":", "\n", "\u{2022} ", "Answering", " questions", "\n",
                    "\u{2022} ", "Providing", " information", "\n", "\u{2022} ", "Creative",
                    " writing", "\n", "\u{2022} ", "Code", " assistance", "\n", "\u{2022} ",
                    "And", " much", " more", "!",
                ],
            ),
            ResponseRule::new(
                &["weather"],
                &[
                    "I", " don", "'t", " have", " access", " to", " real-time", " weather",
                    " data", ", ", "but", " I", " can", " help", " you", " find", " weather",
                    " information", " or", " suggest", " weather", " apps", " to", " use", ".",
                ],
            ),
            ResponseRule::new(
                &["joke"],
                &[
                    "Why", " don", "'t", " scientists", " trust", " atoms", "? ", "Because",
                    " they", " make", " up", " everything", "! ", "\u{1F604}",
                ],
            ),
        ];

        let fallback = [
            "That", "'s", " an", " interesting", " question", "! ", "I", "'m", " still",
            " learning", " and", " improving", " my", " responses", ". ", "Is", " there",
            " anything", " specific", " you", "'d", " like", " to", " know", " more", " about",
            "?",
        ];

        Self::new(rules, &fallback)
    }
}
