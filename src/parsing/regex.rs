use std::collections::HashMap;

use onig::{MatchParam, RegexOptions, SearchOptions, Syntax};
use once_cell::sync::OnceCell;

/// A variable substitution round for every `{{name}}` occurrence; a pattern
/// still containing placeholders after this many rounds has cyclic variables.
const MAX_EXPANSION_ROUNDS: usize = 1000;

lazy_static! {
    static ref VAR_REGEX: onig::Regex = onig::Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").unwrap();
}

/// An abstraction for the regex patterns of match actions.
///
/// * Keeps the Oniguruma machinery in this one module.
/// * Lazily expands `{{variable}}` references and compiles the result on first
///   use. Syntax files routinely contain far more patterns than any one input
///   exercises, so eager compilation would be wasted work.
/// * A failed compilation is cached too, and reported again on every use.
#[derive(Debug)]
pub struct Regex {
    regex_str: String,
    regex: OnceCell<Result<onig::Regex, PatternError>>,
}

/// A region contains text positions for capture groups in a match result.
#[derive(Debug)]
pub struct Region {
    region: onig::Region,
}

/// A pattern that could not be turned into a usable Oniguruma regex.
///
/// `pattern` is the text as written in the syntax file; `message` names the
/// expanded pattern too when variable substitution changed it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("error compiling pattern '{pattern}': {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

/// Replaces `{{name}}` references with the corresponding variable text,
/// repeatedly, until none remain. Variables may reference other variables.
pub(crate) fn expand_variables(
    pattern: &str,
    variables: &HashMap<String, String>,
) -> Result<String, PatternError> {
    let mut expanded = pattern.to_owned();
    let mut rounds = 0;
    while let Some(caps) = VAR_REGEX.captures(&expanded) {
        let name = caps.at(1).unwrap_or("");
        let var = variables.get(name).ok_or_else(|| PatternError {
            pattern: pattern.to_owned(),
            message: format!("variable '{}' not found", name),
        })?;
        let (start, end) = caps.pos(0).unwrap();
        expanded.replace_range(start..end, var);
        rounds += 1;
        if rounds > MAX_EXPANSION_ROUNDS {
            return Err(PatternError {
                pattern: pattern.to_owned(),
                message: format!(
                    "variable substitution did not terminate (expanded so far: '{}')",
                    expanded
                ),
            });
        }
    }
    Ok(expanded)
}

impl Regex {
    /// Create a new regex from the pattern string.
    ///
    /// Note that variable expansion and compilation happen on first use, which
    /// is why this method does not return a result.
    pub fn new(regex_str: String) -> Self {
        Self {
            regex_str,
            regex: OnceCell::new(),
        }
    }

    /// Return the regex pattern as written, placeholders included.
    pub fn regex_str(&self) -> &str {
        &self.regex_str
    }

    /// Match the pattern against `text`, anchored at byte position `begin`.
    ///
    /// Returns the `(start, end)` byte span of the whole match, with `start ==
    /// begin`. Capture group positions are stored in `region`; reusing one
    /// `Region` between calls makes a significant performance difference.
    pub fn match_at(
        &self,
        text: &str,
        begin: usize,
        variables: &HashMap<String, String>,
        region: &mut Region,
    ) -> Result<Option<(usize, usize)>, PatternError> {
        let regex = self.compiled(variables)?;
        let matched = regex.match_with_param(
            text,
            begin,
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region.region),
            MatchParam::default(),
        );

        // Errors during matching (e.g. a retry limit hit by catastrophic
        // backtracking) are treated as non-matches.
        match matched {
            Ok(Some(_)) => Ok(region.pos(0)),
            _ => Ok(None),
        }
    }

    /// Expand and compile the pattern if that hasn't happened yet, and hand
    /// out the compiled regex.
    fn compiled(&self, variables: &HashMap<String, String>) -> Result<&onig::Regex, PatternError> {
        self.regex
            .get_or_init(|| {
                let expanded = expand_variables(&self.regex_str, variables)?;
                onig::Regex::with_options(
                    &expanded,
                    RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
                    Syntax::default(),
                )
                .map_err(|e| {
                    let message = if expanded == self.regex_str {
                        e.to_string()
                    } else {
                        format!("(expanded to '{}') {}", expanded, e)
                    };
                    PatternError {
                        pattern: self.regex_str.clone(),
                        message,
                    }
                })
            })
            .as_ref()
            .map_err(|e| e.clone())
    }
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        Regex {
            regex_str: self.regex_str.clone(),
            regex: OnceCell::new(),
        }
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Regex) -> bool {
        self.regex_str == other.regex_str
    }
}

impl Eq for Regex {}

impl Region {
    pub fn new() -> Self {
        Self {
            region: onig::Region::with_capacity(8),
        }
    }

    /// Get the start/end byte positions of the capture group with given index.
    ///
    /// If there is no match for that group or the index does not correspond to
    /// a group, `None` is returned. The index 0 returns the whole match.
    pub fn pos(&self, index: usize) -> Option<(usize, usize)> {
        self.region.pos(index)
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new()
    }
}
