//! Provider credential lookup.
//!
//! The API key is read at the moment a completion session is created, never
//! cached and never validated at startup. Callers pass the result into
//! [`CompletionSession::open`](crate::session::CompletionSession::open)
//! explicitly; nothing here is process-global.

/// Where the provider API key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Read the named environment variable on every lookup.
    Env(String),
    /// A fixed value, mainly for tests and embedding.
    Fixed(Option<String>),
}

impl CredentialSource {
    /// Current credential, or `None` when absent.
    ///
    /// Empty values and the literal `undefined` (what an unset variable
    /// becomes after naive string interpolation) count as absent.
    pub fn read(&self) -> Option<String> {
        let raw = match self {
            CredentialSource::Env(var) => std::env::var(var).ok(),
            CredentialSource::Fixed(value) => value.clone(),
        };
        raw.filter(|key| is_usable(key))
    }

    /// Human-readable name for error copy.
    pub fn describe(&self) -> &str {
        match self {
            CredentialSource::Env(var) => var,
            CredentialSource::Fixed(_) => "an API key",
        }
    }
}

pub fn is_usable(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && key != "undefined"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_values_count_as_absent() {
        assert_eq!(CredentialSource::Fixed(None).read(), None);
        assert_eq!(CredentialSource::Fixed(Some(String::new())).read(), None);
        assert_eq!(CredentialSource::Fixed(Some("  ".into())).read(), None);
        assert_eq!(
            CredentialSource::Fixed(Some("undefined".into())).read(),
            None
        );
        assert_eq!(
            CredentialSource::Fixed(Some("k-123".into())).read(),
            Some("k-123".to_string())
        );
    }

    #[test]
    fn unset_env_var_is_absent() {
        let source = CredentialSource::Env("NEXUS_TEST_SURELY_UNSET_KEY".into());
        assert_eq!(source.read(), None);
        assert_eq!(source.describe(), "NEXUS_TEST_SURELY_UNSET_KEY");
    }
}
