//! Template compilation.
//!
//! A template is the author-facing form of a subject, resource or permission
//! pattern. Text outside a delimited span is literal; the text inside a span
//! is a regular expression fragment:
//!
//! ```text
//! users:<[0-9]+>:profile   =>   ^users:([0-9]+):profile$
//! ```
//!
//! Compiled patterns are anchored at both ends, so a template always describes
//! the whole candidate string.
//!
//! Delimiters are not escapable, and a backslash does not hide one from the
//! span scanner: `<\<>` is an unterminated span. A template that needs a
//! literal `<` or `>` is either authored with different delimiters or spells
//! the character as a hex escape inside a span (`a<\x3c>` matches `a<`).
//!
//! Fragments are inserted verbatim: a careless `.*` grants far more than
//! intended, and patterns are not screened for pathological cost. Both are
//! the author's responsibility.
//!
//! Compiled patterns are also evaluated by PostgreSQL, so fragments are held
//! to the syntax both engines read the same way. Group flags and named groups
//! (`(?i)`, `(?P<name>...)`), Unicode classes (`\pL`), the `\b`, `\B`, `\<`,
//! `\>` and `\z` assertions and braced hex escapes are rejected with
//! [`CompileError::Unsupported`]. `.` matches a newline in both.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

pub const DEFAULT_START_DELIMITER: char = '<';
pub const DEFAULT_END_DELIMITER: char = '>';

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Unbalanced delimiters in template {template:?} at byte {position}")]
    Unbalanced { template: String, position: usize },

    #[error("Invalid pattern {fragment:?} in template {template:?}: {source}")]
    InvalidPattern {
        template: String,
        fragment: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unsupported construct {construct:?} in pattern {fragment:?} of template {template:?}")]
    Unsupported {
        template: String,
        fragment: String,
        construct: String,
    },

    #[error("Pattern {pattern:?} of template {template:?} rejected by the store: {reason}")]
    Rejected {
        template: String,
        pattern: String,
        reason: String,
    },

    #[error("Start and end delimiter must differ, both are {0:?}")]
    AmbiguousDelimiters(char),
}

/// Matcher for an anchored pattern, with `.` matching any character.
pub(crate) fn build_matcher(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .case_insensitive(case_insensitive)
        .build()
}

/// A template together with its anchored matcher.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    template: String,
    regex: Regex,
}

impl CompiledTemplate {
    /// Rebuild a matcher from a pattern produced by [`compile`].
    pub fn from_pattern(template: &str, pattern: &str) -> Result<Self, CompileError> {
        let regex = build_matcher(pattern, false).map_err(|source| CompileError::InvalidPattern {
            template: template.to_string(),
            fragment: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            template: template.to_string(),
            regex,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// The anchored pattern, as persisted next to the template.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    /// Text matched by each delimited span, in template order.
    ///
    /// Returns `None` when the candidate does not match. Capture groups that
    /// authors put inside their own fragments are included as well.
    pub fn captures(&self, candidate: &str) -> Option<Vec<String>> {
        let captures = self.regex.captures(candidate)?;
        Some(
            captures
                .iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

impl PartialEq for CompiledTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template && self.pattern() == other.pattern()
    }
}

impl Eq for CompiledTemplate {}

/// Byte offsets of the opening and closing delimiter of one span.
#[derive(Debug, Clone, Copy)]
struct Span {
    open: usize,
    close: usize,
}

/// Reject syntax the `regex` crate accepts but PostgreSQL reads differently.
fn screen_fragment(template: &str, fragment: &str) -> Result<(), CompileError> {
    let unsupported = |construct: String| CompileError::Unsupported {
        template: template.to_string(),
        fragment: fragment.to_string(),
        construct,
    };

    let mut chars = fragment.chars().peekable();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let Some(escaped) = chars.next() else {
                    break;
                };
                let braced_hex = escaped == 'x' && chars.peek() == Some(&'{');
                if matches!(escaped, 'p' | 'P' | 'b' | 'B' | 'z' | '<' | '>') || braced_hex {
                    return Err(unsupported(format!("\\{escaped}")));
                }
            }
            '[' if !in_class => {
                in_class = true;
                // A leading `]` (after an optional `^`) is a literal member.
                chars.next_if_eq(&'^');
                chars.next_if_eq(&']');
            }
            ']' if in_class => in_class = false,
            '(' if !in_class && chars.peek() == Some(&'?') => {
                chars.next();
                match chars.peek() {
                    Some(':') => {}
                    Some(flag) => return Err(unsupported(format!("(?{flag}"))),
                    None => return Err(unsupported("(?".to_string())),
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn delimited_spans(template: &str, start: char, end: char) -> Result<Vec<Span>, CompileError> {
    let mut spans = Vec::new();
    let mut level = 0usize;
    let mut open = 0;

    for (index, c) in template.char_indices() {
        if c == start {
            if level == 0 {
                open = index;
            }
            level += 1;
        } else if c == end {
            if level == 0 {
                return Err(CompileError::Unbalanced {
                    template: template.to_string(),
                    position: index,
                });
            }
            level -= 1;
            if level == 0 {
                spans.push(Span { open, close: index });
            }
        }
    }

    if level != 0 {
        return Err(CompileError::Unbalanced {
            template: template.to_string(),
            position: open,
        });
    }

    Ok(spans)
}

/// Compile `template` into an anchored matcher.
///
/// Spans nest, so `start` may appear inside a span as long as every
/// occurrence is closed again. The result depends only on the arguments.
///
/// # Errors
///
/// [`CompileError::Unbalanced`] for an unterminated span or a stray `end`,
/// [`CompileError::InvalidPattern`] when a fragment is not a valid regular
/// expression, [`CompileError::Unsupported`] for syntax outside the common
/// subset, and [`CompileError::AmbiguousDelimiters`] when `start == end`.
pub fn compile(template: &str, start: char, end: char) -> Result<CompiledTemplate, CompileError> {
    if start == end {
        return Err(CompileError::AmbiguousDelimiters(start));
    }

    let spans = delimited_spans(template, start, end)?;
    let mut pattern = String::with_capacity(template.len() + 2);
    pattern.push('^');

    let mut cursor = 0;
    for span in spans {
        let literal = template.get(cursor..span.open).unwrap_or_default();
        let fragment = template
            .get(span.open + start.len_utf8()..span.close)
            .unwrap_or_default();

        // Validated alone so a fragment cannot close or reopen the group it
        // is wrapped in.
        Regex::new(fragment).map_err(|source| CompileError::InvalidPattern {
            template: template.to_string(),
            fragment: fragment.to_string(),
            source,
        })?;
        screen_fragment(template, fragment)?;

        pattern.push_str(&regex::escape(literal));
        pattern.push('(');
        pattern.push_str(fragment);
        pattern.push(')');
        cursor = span.close + end.len_utf8();
    }
    pattern.push_str(&regex::escape(template.get(cursor..).unwrap_or_default()));
    pattern.push('$');

    CompiledTemplate::from_pattern(template, &pattern)
}

/// [`compile`] with the default `<` and `>` delimiters.
///
/// # Errors
///
/// See [`compile`].
pub fn compile_default(template: &str) -> Result<CompiledTemplate, CompileError> {
    compile(template, DEFAULT_START_DELIMITER, DEFAULT_END_DELIMITER)
}
