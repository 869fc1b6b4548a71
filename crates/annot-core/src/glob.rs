//! Case-insensitive whole-string glob matching for column headers.
//!
//! Only `*` is special; it matches any run of characters, including none.
//! Everything else, `?` and `[` included, is matched literally.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob into an anchored, case-insensitive matcher.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] only if the translated expression exceeds the
    /// regex size limit, which ordinary header patterns never do.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("(?is)^{body}$"))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn is_match(&self, header: &str) -> bool {
        self.regex.is_match(header)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Whether `value` carries a wildcard and should be treated as a pattern.
#[must_use]
pub fn is_glob(value: &str) -> bool {
    value.contains('*')
}
