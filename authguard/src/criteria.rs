//! Criteria keys
//!
//! A [`CounterKey`] deterministically identifies one counter instance: which
//! policy it belongs to ([`CounterKind`]) and which domain, client, provider,
//! factor and subject it is scoped to ([`CounterCriteria`]). The same key
//! always renders to the same storage key, and distinct keys never collide.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of entity that owns a counter, a context or a password history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// A security domain
    Domain,
    /// An application (client) registered in a domain
    Application,
    /// An organization spanning several domains
    Organization,
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain => write!(f, "domain"),
            Self::Application => write!(f, "application"),
            Self::Organization => write!(f, "organization"),
        }
    }
}

/// Owner reference: reference type + reference id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Kind of owner
    pub reference_type: ReferenceType,
    /// Owner identifier
    pub id: String,
}

impl Reference {
    /// Create a new reference
    pub fn new(reference_type: ReferenceType, id: impl Into<String>) -> Self {
        Self {
            reference_type,
            id: id.into(),
        }
    }

    /// Reference to a security domain
    pub fn domain(id: impl Into<String>) -> Self {
        Self::new(ReferenceType::Domain, id)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference_type, self.id)
    }
}

/// Counter namespace, one per policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Failed login attempts
    Login,
    /// MFA challenge verification attempts
    Verify,
    /// Generic fixed-window rate limit
    RateLimit,
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Verify => write!(f, "verify"),
            Self::RateLimit => write!(f, "rate_limit"),
        }
    }
}

/// Composite criteria scoping a counter to one domain/client/user/factor
///
/// # Example
///
/// ```rust
/// use authguard::criteria::{CounterCriteria, Reference};
///
/// let criteria = CounterCriteria::new(Reference::domain("acme"), "alice")
///     .with_client("web-app")
///     .with_identity_provider("default-idp");
/// assert_eq!(criteria.subject, "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterCriteria {
    /// Owning domain (or other reference)
    pub reference: Reference,
    /// Client / application id
    pub client: Option<String>,
    /// Identity provider that performed the authentication
    pub identity_provider: Option<String>,
    /// MFA factor id
    pub factor: Option<String>,
    /// Subject: username for login, user id for MFA and rate limits
    pub subject: String,
}

impl CounterCriteria {
    /// Create criteria for a subject within a reference
    pub fn new(reference: Reference, subject: impl Into<String>) -> Self {
        Self {
            reference,
            client: None,
            identity_provider: None,
            factor: None,
            subject: subject.into(),
        }
    }

    /// Scope to a client
    #[must_use]
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Scope to an identity provider
    #[must_use]
    pub fn with_identity_provider(mut self, provider: impl Into<String>) -> Self {
        self.identity_provider = Some(provider.into());
        self
    }

    /// Scope to an MFA factor
    #[must_use]
    pub fn with_factor(mut self, factor: impl Into<String>) -> Self {
        self.factor = Some(factor.into());
        self
    }
}

/// Key of exactly one counter record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    /// Policy namespace
    pub kind: CounterKind,
    /// Scope
    pub criteria: CounterCriteria,
}

impl CounterKey {
    /// Create a new key
    pub fn new(kind: CounterKind, criteria: CounterCriteria) -> Self {
        Self { kind, criteria }
    }

    /// Render the key as a flat storage key
    ///
    /// Components are separated by `:`; `%` and `:` inside components are
    /// percent-escaped and absent components render as `-` (a literal `-` is
    /// escaped too), so two different keys never render the same string.
    pub fn storage_key(&self) -> String {
        let c = &self.criteria;
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.kind,
            c.reference.reference_type,
            escape(&c.reference.id),
            escape_opt(c.client.as_deref()),
            escape_opt(c.identity_provider.as_deref()),
            escape_opt(c.factor.as_deref()),
            escape(&c.subject),
        )
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '-' if value.len() == 1 => out.push_str("%2D"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_opt(value: Option<&str>) -> String {
    match value {
        Some(v) => escape(v),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> CounterCriteria {
        CounterCriteria::new(Reference::domain("acme"), "alice")
            .with_client("web")
            .with_identity_provider("idp")
    }

    #[test]
    fn test_storage_key_format() {
        let key = CounterKey::new(CounterKind::Login, criteria());
        assert_eq!(key.storage_key(), "login:domain:acme:web:idp:-:alice");
    }

    #[test]
    fn test_storage_key_is_deterministic() {
        let a = CounterKey::new(CounterKind::Verify, criteria().with_factor("otp"));
        let b = CounterKey::new(CounterKind::Verify, criteria().with_factor("otp"));
        assert_eq!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn test_kinds_are_namespaced() {
        let login = CounterKey::new(CounterKind::Login, criteria());
        let rate = CounterKey::new(CounterKind::RateLimit, criteria());
        assert_ne!(login.storage_key(), rate.storage_key());
    }

    #[test]
    fn test_separator_in_component_does_not_collide() {
        let a = CounterKey::new(
            CounterKind::Login,
            CounterCriteria::new(Reference::domain("a:b"), "c"),
        );
        let b = CounterKey::new(
            CounterKind::Login,
            CounterCriteria::new(Reference::domain("a"), "b:c"),
        );
        assert_ne!(a.storage_key(), b.storage_key());
        assert!(a.storage_key().contains("a%3Ab"));
    }

    #[test]
    fn test_absent_component_differs_from_dash() {
        let absent = CounterKey::new(CounterKind::Login, CounterCriteria::new(Reference::domain("d"), "u"));
        let dash = CounterKey::new(
            CounterKind::Login,
            CounterCriteria::new(Reference::domain("d"), "u").with_client("-"),
        );
        assert_ne!(absent.storage_key(), dash.storage_key());
    }

    #[test]
    fn test_reference_display() {
        assert_eq!(Reference::domain("acme").to_string(), "domain:acme");
        assert_eq!(
            Reference::new(ReferenceType::Organization, "DEFAULT").to_string(),
            "organization:DEFAULT"
        );
    }
}
