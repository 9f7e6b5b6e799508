//! Glob pattern matching for `KEYS` and pattern subscriptions.
//!
//! Supports `*` (any run), `?` (any single character) and `[...]` character
//! classes, compiled once to an anchored regex.

use regex::Regex;

use crate::error::{Error, Result};

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob expression.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fincache::shared::pattern::GlobPattern;
    ///
    /// let pat = GlobPattern::compile("md.*.trades").unwrap();
    /// assert!(pat.matches("md.AAPL.trades"));
    /// assert!(!pat.matches("md.AAPL.quotes"));
    /// ```
    pub fn compile(glob: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(glob))
            .map_err(|e| Error::Constraint(format!("invalid pattern '{glob}': {e}")))?;
        Ok(Self {
            source: glob.to_string(),
            regex,
        })
    }

    /// Test a candidate string against the pattern.
    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    /// The original glob text.
    pub fn source(&self) -> &str {
        &self.source
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                // Pass the class body through, escaping nothing but a
                // leading `!` negation (glob spelling for `^`).
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            },
            c if "\\.+()|^$#&-~{}".contains(c) => {
                out.push('\\');
                out.push(c);
            },
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        let pat = GlobPattern::compile("*").unwrap();
        assert!(pat.matches(""));
        assert!(pat.matches("orders.us.nyse"));
    }

    #[test]
    fn literal_matches_itself_only() {
        let pat = GlobPattern::compile("md").unwrap();
        assert!(pat.matches("md"));
        assert!(!pat.matches("mdx"));
        assert!(!pat.matches("xmd"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        let pat = GlobPattern::compile("user:???").unwrap();
        assert!(pat.matches("user:123"));
        assert!(!pat.matches("user:12"));
    }

    #[test]
    fn character_class_and_negation() {
        let pat = GlobPattern::compile("h[ae]llo").unwrap();
        assert!(pat.matches("hallo"));
        assert!(pat.matches("hello"));
        assert!(!pat.matches("hillo"));

        let neg = GlobPattern::compile("h[!a]llo").unwrap();
        assert!(neg.matches("hello"));
        assert!(!neg.matches("hallo"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let pat = GlobPattern::compile("price.usd").unwrap();
        assert!(pat.matches("price.usd"));
        assert!(!pat.matches("priceXusd"));
    }
}
