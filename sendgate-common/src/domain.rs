//! Domain newtype for type safety
//!
//! Wraps recipient domain strings so they cannot be confused with full
//! addresses or rate limit keys. Domains are normalised on construction
//! (trimmed, ASCII lowercase), which makes filtered-domain lookups case
//! insensitive.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Deserializer, Serialize};

/// A normalised domain name
///
/// # Examples
///
/// ```
/// use sendgate_common::Domain;
///
/// let domain = Domain::new(" Gmail.COM ");
/// assert_eq!(domain.as_str(), "gmail.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Create a new `Domain`, trimming whitespace and lowercasing ASCII
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref().trim().to_ascii_lowercase()))
    }

    /// Derive the recipient domain from a `to` field.
    ///
    /// The `to` field is treated as one joined string: the domain follows the
    /// **last** `@`, so `a@x.com,b@gmail.com` yields `gmail.com`. It ends at
    /// the closing `>` of a `Name <address>` form or at any separator.
    /// Returns `None` when there is no `@` or nothing follows it.
    ///
    /// ```
    /// use sendgate_common::Domain;
    ///
    /// let domain = Domain::of_recipient("a@x.com,b@gmail.com").unwrap();
    /// assert_eq!(domain.as_str(), "gmail.com");
    ///
    /// let domain = Domain::of_recipient("Bob <bob@Gmail.com>").unwrap();
    /// assert_eq!(domain.as_str(), "gmail.com");
    /// assert!(Domain::of_recipient("nobody").is_none());
    /// ```
    #[must_use]
    pub fn of_recipient(to: &str) -> Option<Self> {
        let (_, rest) = to.rsplit_once('@')?;
        let rest = rest.trim_start();
        let end = rest
            .find(|c: char| c == '>' || c == ',' || c == ';' || c == ')' || c.is_whitespace())
            .unwrap_or(rest.len());
        let domain = Self::new(&rest[..end]);

        if domain.is_empty() { None } else { Some(domain) }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Arc<str> {
        self.0
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Domain> for Arc<str> {
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_normalised() {
        let domain = Domain::new("  Mail.Example.COM\t");
        assert_eq!(domain.as_str(), "mail.example.com");
    }

    #[test]
    fn test_domain_of_single_recipient() {
        let domain = Domain::of_recipient("someone@gmail.com").unwrap();
        assert_eq!(domain, Domain::new("gmail.com"));
    }

    #[test]
    fn test_domain_of_joined_recipients_uses_last() {
        let domain = Domain::of_recipient("a@x.com, b@y.org,c@Gmail.com").unwrap();
        assert_eq!(domain.as_str(), "gmail.com");
    }

    #[test]
    fn test_domain_of_display_name_recipient() {
        let domain = Domain::of_recipient("Bob <bob@gmail.com>").unwrap();
        assert_eq!(domain.as_str(), "gmail.com");

        let domain = Domain::of_recipient("a@x.com, Bee <b@Yahoo.com> ").unwrap();
        assert_eq!(domain.as_str(), "yahoo.com");

        let domain = Domain::of_recipient("c@example.org (Carol)").unwrap();
        assert_eq!(domain.as_str(), "example.org");

        assert!(Domain::of_recipient("Bob <bob@>").is_none());
    }

    #[test]
    fn test_domain_of_recipient_without_at() {
        assert!(Domain::of_recipient("postmaster").is_none());
        assert!(Domain::of_recipient("trailing@").is_none());
        assert!(Domain::of_recipient("trailing@   ").is_none());
    }

    #[test]
    fn test_domain_display() {
        let domain = Domain::new("display.example.com");
        assert_eq!(format!("{domain}"), "display.example.com");
    }

    #[test]
    fn test_domain_deref() {
        let domain = Domain::new("deref.example.com");
        assert_eq!(domain.len(), "deref.example.com".len());
        assert!(domain.ends_with(".com"));
    }

    #[test]
    fn test_domain_serde_normalises() {
        let deserialized: Domain = serde_json::from_str("\"EXAMPLE.com\"").unwrap();
        assert_eq!(deserialized.as_str(), "example.com");

        let serialized = serde_json::to_string(&deserialized).unwrap();
        assert_eq!(serialized, "\"example.com\"");
    }

    #[test]
    fn test_domain_hash() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(Domain::new("hash.example.com"), 42);

        assert_eq!(map.get(&Domain::new("HASH.example.com")), Some(&42));
    }
}
