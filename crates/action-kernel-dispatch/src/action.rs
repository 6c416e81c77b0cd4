use std::fmt;
use std::str::FromStr;

use crate::error::KernelError;

/// Parsed `domain.verb[.noun]` action id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub domain: String,
    pub verb: String,
    pub noun: Option<String>,
}

impl ActionId {
    pub fn parse(raw: &str) -> Result<Self, KernelError> {
        raw.parse()
    }
}

impl FromStr for ActionId {
    type Err = KernelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let valid_segment =
            |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        let segments: Vec<&str> = raw.split('.').collect();
        if !(2..=3).contains(&segments.len()) || !segments.iter().all(|s| valid_segment(s)) {
            return Err(KernelError::ActionNotFound(format!(
                "'{}' is not a domain.verb[.noun] action id",
                raw
            )));
        }

        Ok(Self {
            domain: segments[0].to_string(),
            verb: segments[1].to_string(),
            noun: segments.get(2).map(|s| s.to_string()),
        })
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.noun {
            Some(noun) => write!(f, "{}.{}.{}", self.domain, self.verb, noun),
            None => write!(f, "{}.{}", self.domain, self.verb),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let id = ActionId::parse("acct.create.entry").unwrap();
        assert_eq!(id.domain, "acct");
        assert_eq!(id.noun.as_deref(), Some("entry"));
        assert_eq!(id.to_string(), "acct.create.entry");

        let id = ActionId::parse("registry.list").unwrap();
        assert!(id.noun.is_none());
    }

    #[test]
    fn test_rejects_bad_format() {
        for raw in ["acct", "acct..entry", "a.b.c.d", "", "acct.create/entry", ".x"] {
            let err = ActionId::parse(raw).unwrap_err();
            assert_eq!(err.code(), "ACTION_NOT_FOUND", "{}", raw);
        }
    }
}
