//! Topic selectors and matching
//!
//! A topic selector is one of:
//! - `*`, which matches every topic
//! - a literal topic IRI, matched verbatim
//! - an RFC 6570 URI Template, e.g. `https://example.com/books/{id}`
//!
//! A selector that fails to parse as a URI Template still matches verbatim;
//! the parse failure is logged once and the selector never matches through
//! template expansion.

use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// The selector matching every topic.
pub const WILDCARD: &str = "*";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated expression (missing '}}')")]
    UnterminatedExpression,

    #[error("'}}' outside of an expression")]
    UnexpectedClose,

    #[error("empty expression")]
    EmptyExpression,

    #[error("invalid variable name '{0}'")]
    InvalidVariable(String),

    #[error("pattern compilation failed: {0}")]
    Pattern(#[from] regex::Error),
}

/// A single compiled topic selector.
///
/// The raw string always participates in wildcard and verbatim matching;
/// `template` is present only when the selector compiled as a URI Template.
#[derive(Debug, Clone)]
pub struct TopicSelector {
    raw: String,
    template: Option<Arc<Regex>>,
}

impl TopicSelector {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.raw == WILDCARD
    }

    /// Test a topic against the template part of this selector only.
    fn template_matches(&self, topic: &str) -> bool {
        self.template.as_ref().is_some_and(|re| re.is_match(topic))
    }
}

/// Compiles selectors into [`TopicSelector`]s, caching compiled templates
/// by their raw string. Template compilation is the expensive part of
/// matching, so the cache is shared hub-wide and lives as long as the hub.
#[derive(Debug, Default)]
pub struct TopicMatcher {
    templates: DashMap<String, Option<Arc<Regex>>>,
}

impl TopicMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a raw selector, reusing a previously compiled template when
    /// available. A selector that is not a valid URI Template is warned
    /// about once and thereafter only matches verbatim.
    pub fn selector(&self, raw: &str) -> TopicSelector {
        if raw == WILDCARD || !raw.contains(['{', '}']) {
            // Plain IRIs never need template machinery.
            return TopicSelector {
                raw: raw.to_string(),
                template: None,
            };
        }

        if let Some(cached) = self.templates.get(raw) {
            return TopicSelector {
                raw: raw.to_string(),
                template: cached.value().clone(),
            };
        }

        let template = match compile_template(raw) {
            Ok(re) => Some(Arc::new(re)),
            Err(e) => {
                warn!(selector = %raw, error = %e, "Selector is not a valid URI template, matching it verbatim only");
                None
            }
        };

        self.templates.insert(raw.to_string(), template.clone());
        TopicSelector {
            raw: raw.to_string(),
            template,
        }
    }

    /// Compile a list of raw selectors.
    pub fn selectors(&self, raws: &[String]) -> SelectorList {
        SelectorList {
            selectors: raws.iter().map(|r| self.selector(r)).collect(),
        }
    }
}

/// An ordered set of compiled selectors belonging to one subscriber.
#[derive(Debug, Clone, Default)]
pub struct SelectorList {
    selectors: Vec<TopicSelector>,
}

impl SelectorList {
    /// Whether a topic satisfies any selector in the list.
    ///
    /// Wildcard and verbatim matches are checked across the whole list
    /// before any template is consulted.
    pub fn matches(&self, topic: &str) -> bool {
        for s in &self.selectors {
            if s.is_wildcard() || s.raw == topic {
                return true;
            }
        }

        self.selectors.iter().any(|s| s.template_matches(topic))
    }

    pub fn has_wildcard(&self) -> bool {
        self.selectors.iter().any(TopicSelector::is_wildcard)
    }

    pub fn raw(&self) -> Vec<String> {
        self.selectors.iter().map(|s| s.raw.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

/// Compile a URI Template into an anchored regex accepting its expansions.
///
/// Covers the expression forms topic selectors use in practice: simple
/// expansion matches unreserved or percent-encoded characters, while the
/// reserved (`+`) and fragment (`#`) operators also accept reserved
/// characters such as `/`.
fn compile_template(template: &str) -> Result<Regex, TemplateError> {
    let mut pattern = String::with_capacity(template.len() + 16);
    pattern.push('^');

    let mut rest = template;
    while let Some(open) = rest.find(['{', '}']) {
        let (literal, tail) = rest.split_at(open);
        pattern.push_str(&regex::escape(literal));

        if tail.starts_with('}') {
            return Err(TemplateError::UnexpectedClose);
        }

        let Some(close) = tail.find('}') else {
            return Err(TemplateError::UnterminatedExpression);
        };

        let expression = &tail[1..close];
        pattern.push_str(&compile_expression(expression)?);
        rest = &tail[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    Ok(Regex::new(&pattern)?)
}

fn compile_expression(expression: &str) -> Result<String, TemplateError> {
    if expression.is_empty() {
        return Err(TemplateError::EmptyExpression);
    }

    let (operator, variables) = match expression.as_bytes()[0] {
        op @ (b'+' | b'#' | b'.' | b'/' | b';' | b'?' | b'&') => {
            (op as char, &expression[1..])
        }
        _ => ('\0', expression),
    };

    if variables.is_empty() {
        return Err(TemplateError::EmptyExpression);
    }

    for variable in variables.split(',') {
        let name = variable.trim_end_matches('*');
        let name = name.split_once(':').map_or(name, |(n, _)| n);

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(TemplateError::InvalidVariable(variable.to_string()));
        }
    }

    // Unreserved or percent-encoded characters; reserved expansion also
    // passes the reserved set through unencoded.
    let matched = match operator {
        '+' | '#' => r"(?:[A-Za-z0-9\-._~!$&'()*+,;=:@/?#\[\]]|%[0-9A-Fa-f]{2})*",
        _ => r"(?:[A-Za-z0-9\-._~]|%[0-9A-Fa-f]{2})*",
    };

    Ok(matched.to_string())
}
