//! String format checks

use regex::Regex;

use crate::descriptor::StringFormat;

/// Precompiled checker for one [`StringFormat`]
pub(crate) struct FormatChecker {
    format: StringFormat,
    re: Option<Regex>,
}

impl FormatChecker {
    pub(crate) fn new(format: StringFormat) -> Self {
        let re = match format {
            StringFormat::Email => Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok(),
            StringFormat::Url => Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s/?#]+[^\s]*$").ok(),
            StringFormat::Uuid | StringFormat::Datetime => None,
        };
        Self { format, re }
    }

    pub(crate) fn format(&self) -> StringFormat {
        self.format
    }

    pub(crate) fn check(&self, s: &str) -> bool {
        match self.format {
            StringFormat::Email | StringFormat::Url => self.re.as_ref().map_or(false, |re| re.is_match(s)),
            StringFormat::Uuid => uuid::Uuid::parse_str(s).is_ok(),
            StringFormat::Datetime => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        }
    }
}
