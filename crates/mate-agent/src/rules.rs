//! Post-processing rules applied to finished assistant responses

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a rule does to the text it receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuleKind {
    /// Replace every match of `pattern` with `replacement`
    RegexReplace {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replacement: Option<String>,
    },

    /// Prepend a fixed string
    AddPrefix { prefix: String },

    /// Append a fixed string
    AddSuffix { suffix: String },

    /// A rule type written by a newer version; applied as a no-op
    #[serde(other)]
    Unknown,
}

impl RuleKind {
    /// Short type name for display
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::RegexReplace { .. } => "regex-replace",
            RuleKind::AddPrefix { .. } => "add-prefix",
            RuleKind::AddSuffix { .. } => "add-suffix",
            RuleKind::Unknown => "unknown",
        }
    }
}

/// A named, toggleable text transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Create an enabled rule stamped with the current time
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: RuleKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            kind,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply this rule to `text`.
    ///
    /// Never fails: a disabled rule, an empty pattern, or a pattern that no
    /// longer compiles all leave the text unchanged.
    pub fn apply(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }

        match &self.kind {
            RuleKind::RegexReplace {
                pattern,
                replacement,
            } => {
                if pattern.is_empty() {
                    return text.to_string();
                }
                match Regex::new(pattern) {
                    Ok(re) => {
                        let replacement = replacement.as_deref().unwrap_or("");
                        let template = replacement_template(replacement, re.captures_len());
                        re.replace_all(text, template.as_ref()).into_owned()
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Rule '{}' has an invalid pattern, skipping: {}",
                            self.name,
                            e
                        );
                        text.to_string()
                    }
                }
            }
            RuleKind::AddPrefix { prefix } => format!("{}{}", prefix, text),
            RuleKind::AddSuffix { suffix } => format!("{}{}", text, suffix),
            RuleKind::Unknown => text.to_string(),
        }
    }

    /// Check that the rule is well-formed before it is stored
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("rule name is required".into()));
        }

        match &self.kind {
            RuleKind::RegexReplace { pattern, .. } => {
                if pattern.trim().is_empty() {
                    return Err(Error::Validation("regex pattern is required".into()));
                }
                Regex::new(pattern)
                    .map_err(|e| Error::Validation(format!("invalid regex pattern: {}", e)))?;
            }
            RuleKind::AddPrefix { .. } | RuleKind::AddSuffix { .. } => {}
            RuleKind::Unknown => {
                return Err(Error::Validation("unsupported rule type".into()));
            }
        }
        Ok(())
    }
}

/// Rewrite bare capture references into the `regex` crate's braced form.
///
/// `$1_at` means group 1 followed by `_at`, not a group named `1_at`. Two
/// digits are read as one group number only when that group exists, and a
/// reference to a missing group stays literal. `$&` is the whole match and
/// `$<name>` a named group. Anything else, including `${name}` and `$$`, is
/// left for `regex` to expand.
fn replacement_template(replacement: &str, captures_len: usize) -> Cow<'_, str> {
    if !replacement.contains('$') {
        return Cow::Borrowed(replacement);
    }

    let group = |digits: &str| {
        digits
            .bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| digits.parse::<usize>().ok())
            .flatten()
            .filter(|&n| n > 0 && n < captures_len)
    };

    let mut out = String::with_capacity(replacement.len() + 8);
    let mut rest = replacement;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        let two = tail.get(..2).and_then(group);
        let one = tail.get(..1).and_then(group);
        let named = tail
            .strip_prefix('<')
            .and_then(|t| t.split_once('>'))
            .map(|(name, _)| name)
            .filter(|name| !name.is_empty());

        let consumed = if let Some(n) = two {
            out.push_str(&format!("${{{}}}", n));
            2
        } else if let Some(n) = one {
            out.push_str(&format!("${{{}}}", n));
            1
        } else if tail.starts_with('&') {
            out.push_str("${0}");
            1
        } else if let Some(name) = named {
            out.push_str(&format!("${{{}}}", name));
            name.len() + 2
        } else if tail.starts_with('$') {
            out.push_str("$$");
            1
        } else if tail.starts_with(|c: char| c.is_ascii_digit()) {
            // no such group
            out.push_str("$$");
            0
        } else {
            out.push('$');
            0
        };
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}
