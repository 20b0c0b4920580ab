//! Caller identities and the anonymized keys used to scope cached clients.
//!
//! Credentials never leave this module in raw form: the [`Anonymizer`] feeds a
//! canonical, length-prefixed encoding of every credential field into a keyed
//! HMAC-SHA256, and only the resulting [`IdentityKey`] is stored or logged.

use std::collections::BTreeMap;
use std::fmt;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Field tags for the canonical encoding. A tag precedes every field so that
/// a token can never be confused with an impersonated user name.
const TAG_ANONYMOUS: u8 = 0x00;
const TAG_TOKEN: u8 = 0x01;
const TAG_USER: u8 = 0x02;
const TAG_GROUP: u8 = 0x03;
const TAG_EXTRA_KEY: u8 = 0x04;
const TAG_EXTRA_VALUE: u8 = 0x05;

/// An impersonated principal, as carried by `Impersonate-*` headers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Impersonation {
    pub user: String,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

impl Impersonation {
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Groups sorted and deduplicated; the order headers arrive in is not
    /// part of the principal's identity.
    pub fn canonical_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = self.groups.iter().map(String::as_str).collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }
}

/// Credentials presented by a caller.
///
/// A value with neither a token nor an impersonated principal is the explicit
/// anonymous marker.
#[derive(Clone, Default)]
pub struct Credentials {
    bearer_token: Option<SecretString>,
    impersonate: Option<Impersonation>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            bearer_token: Some(SecretString::new(token.into())),
            impersonate: None,
        }
    }

    pub fn with_impersonation(mut self, impersonate: Impersonation) -> Self {
        self.impersonate = Some(impersonate);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.bearer_token.is_none() && self.impersonate.is_none()
    }

    /// Expose the bearer token. Only store connectors should call this.
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_ref().map(|t| t.expose_secret())
    }

    pub fn impersonation(&self) -> Option<&Impersonation> {
        self.impersonate.as_ref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("impersonate", &self.impersonate)
            .finish()
    }
}

/// Stable, non-sensitive key derived from a caller's credentials.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey([u8; 32]);

impl IdentityKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes in hex, enough to correlate log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", self.short())
    }
}

/// Derives [`IdentityKey`]s from [`Credentials`].
///
/// The HMAC key is generated per process unless one is supplied, so keys are
/// meaningless outside the process that produced them.
#[derive(Clone)]
pub struct Anonymizer {
    key: [u8; 32],
}

impl Anonymizer {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn random() -> Self {
        Self::new(rand::random::<[u8; 32]>())
    }

    pub fn anonymize(&self, credentials: &Credentials) -> IdentityKey {
        let mut mac = match HmacSha256::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
        };

        if credentials.is_anonymous() {
            mac.update(&[TAG_ANONYMOUS]);
        }
        if let Some(token) = credentials.bearer_token() {
            write_field(&mut mac, TAG_TOKEN, token.as_bytes());
        }
        if let Some(imp) = credentials.impersonation() {
            write_field(&mut mac, TAG_USER, imp.user.as_bytes());
            for group in imp.canonical_groups() {
                write_field(&mut mac, TAG_GROUP, group.as_bytes());
            }
            for (key, values) in &imp.extra {
                write_field(&mut mac, TAG_EXTRA_KEY, key.as_bytes());
                let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
                values.sort_unstable();
                values.dedup();
                for value in values {
                    write_field(&mut mac, TAG_EXTRA_VALUE, value.as_bytes());
                }
            }
        }

        let digest = mac.finalize().into_bytes();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        IdentityKey(key)
    }
}

impl fmt::Debug for Anonymizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Anonymizer([REDACTED])")
    }
}

fn write_field(mac: &mut HmacSha256, tag: u8, bytes: &[u8]) {
    mac.update(&[tag]);
    mac.update(&(bytes.len() as u64).to_be_bytes());
    mac.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymizer() -> Anonymizer {
        Anonymizer::new([7u8; 32])
    }

    #[test]
    fn test_same_token_same_key() {
        let a = anonymizer();
        assert_eq!(
            a.anonymize(&Credentials::bearer("token-a")),
            a.anonymize(&Credentials::bearer("token-a"))
        );
    }

    #[test]
    fn test_different_tokens_different_keys() {
        let a = anonymizer();
        assert_ne!(
            a.anonymize(&Credentials::bearer("token-a")),
            a.anonymize(&Credentials::bearer("token-b"))
        );
    }

    #[test]
    fn test_token_and_user_are_not_confused() {
        let a = anonymizer();
        let token = Credentials::bearer("alice");
        let user = Credentials::anonymous().with_impersonation(Impersonation::user("alice"));
        assert_ne!(a.anonymize(&token), a.anonymize(&user));
    }

    #[test]
    fn test_group_order_is_canonical() {
        let a = anonymizer();
        let one = Credentials::bearer("t").with_impersonation(
            Impersonation::user("bob").with_group("x").with_group("y"),
        );
        let two = Credentials::bearer("t").with_impersonation(
            Impersonation::user("bob").with_group("y").with_group("x"),
        );
        assert_eq!(a.anonymize(&one), a.anonymize(&two));
    }

    #[test]
    fn test_group_boundaries_matter() {
        let a = anonymizer();
        let one = Credentials::anonymous()
            .with_impersonation(Impersonation::user("bob").with_group("ab"));
        let two = Credentials::anonymous().with_impersonation(
            Impersonation::user("bob").with_group("a").with_group("b"),
        );
        assert_ne!(a.anonymize(&one), a.anonymize(&two));
    }

    #[test]
    fn test_anonymous_is_stable_and_distinct() {
        let a = anonymizer();
        let anon = a.anonymize(&Credentials::anonymous());
        assert_eq!(anon, a.anonymize(&Credentials::anonymous()));
        assert_ne!(anon, a.anonymize(&Credentials::bearer("")));
    }

    #[test]
    fn test_keys_depend_on_process_secret() {
        let creds = Credentials::bearer("token");
        assert_ne!(
            Anonymizer::new([1u8; 32]).anonymize(&creds),
            Anonymizer::new([2u8; 32]).anonymize(&creds)
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::bearer("super-secret-token");
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("REDACTED"));

        let key = anonymizer().anonymize(&creds);
        assert!(!key.to_string().contains("super-secret-token"));
        assert_eq!(key.short().len(), 16);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Anonymizing the same credentials twice yields the same key.
        #[test]
        fn prop_anonymize_is_deterministic(token in ".{0,64}", user in "[a-z]{0,16}") {
            let a = Anonymizer::new([3u8; 32]);
            let creds = Credentials::bearer(token.clone())
                .with_impersonation(Impersonation::user(user.clone()));
            let again = Credentials::bearer(token).with_impersonation(Impersonation::user(user));
            prop_assert_eq!(a.anonymize(&creds), a.anonymize(&again));
        }

        /// Distinct bearer tokens never share a key.
        #[test]
        fn prop_distinct_tokens_distinct_keys(t1 in ".{0,64}", t2 in ".{0,64}") {
            prop_assume!(t1 != t2);
            let a = Anonymizer::new([3u8; 32]);
            prop_assert_ne!(
                a.anonymize(&Credentials::bearer(t1)),
                a.anonymize(&Credentials::bearer(t2))
            );
        }
    }
}
