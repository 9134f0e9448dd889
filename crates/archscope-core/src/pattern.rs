use glob::{MatchOptions, Pattern};

use crate::error::{Error, Result};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Shell-style wildcard: `*` matches zero or more characters (including
/// `/`), `?` exactly one. Brackets are literal. Matching ignores case.
#[derive(Debug, Clone)]
pub struct Glob {
    raw: String,
    pattern: Pattern,
}

impl Glob {
    pub fn new(raw: &str) -> Result<Self> {
        let mut escaped = String::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '[' => escaped.push_str("[[]"),
                ']' => escaped.push_str("[]]"),
                // `**` means something else to the glob crate.
                '*' if escaped.ends_with('*') => {}
                _ => escaped.push(c),
            }
        }
        let pattern = Pattern::new(&escaped).map_err(|e| Error::InvalidPattern {
            pattern: raw.to_string(),
            message: e.msg.to_string(),
        })?;
        Ok(Self {
            raw: raw.to_string(),
            pattern,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.matches_with(text, OPTIONS)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_and_question_mark() {
        let g = Glob::new("auth*").unwrap();
        assert!(g.matches("auth"));
        assert!(g.matches("Auth Service"));
        assert!(!g.matches("oauth"));

        let g = Glob::new("db?").unwrap();
        assert!(g.matches("db1"));
        assert!(!g.matches("db"));
        assert!(!g.matches("db12"));
    }

    #[test]
    fn star_crosses_path_separators() {
        assert!(Glob::new("shop/*").unwrap().matches("shop/api/auth"));
        assert!(Glob::new("*/auth").unwrap().matches("shop/api/auth"));
        assert!(Glob::new("shop**auth").unwrap().matches("shop/api/auth"));
    }

    #[test]
    fn brackets_are_literal() {
        let g = Glob::new("cache[1]").unwrap();
        assert!(g.matches("cache[1]"));
        assert!(!g.matches("cache1"));
    }
}
