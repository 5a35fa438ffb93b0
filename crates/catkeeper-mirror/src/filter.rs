//! Include/exclude id filters for the mirror driver (spec.md §4.10 step 2).
//!
//! Patterns use shell-style globs (`*`, `?`), compiled to anchored,
//! case-insensitive regexes.

use regex::Regex;

#[derive(Default)]
pub struct IdFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl IdFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, String> {
        Ok(Self {
            include: include
                .iter()
                .map(|p| compile_glob(p))
                .collect::<Result<_, _>>()?,
            exclude: exclude
                .iter()
                .map(|p| compile_glob(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// True unless explicitly excluded, and (when any include patterns are
    /// configured) only if at least one of them matches.
    pub fn matches(&self, id: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(id)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(id))
    }
}

fn compile_glob(pattern: &str) -> Result<Regex, String> {
    let mut anchored = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => anchored.push_str(".*"),
            '?' => anchored.push('.'),
            other => anchored.push_str(&regex::escape(&other.to_string())),
        }
    }
    anchored.push('$');
    Regex::new(&anchored).map_err(|e| format!("invalid glob pattern '{pattern}': {e}"))
}
