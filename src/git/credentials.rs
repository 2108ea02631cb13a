//! Single-offer credential gate
//!
//! libgit2 keeps re-asking the credential callback for as long as the remote
//! answers with an authentication challenge. A callback that always hands
//! back the same user/secret therefore loops forever on a wrong secret.
//! The gate offers its credentials exactly once and answers every later
//! request with an abort, turning that loop into one deterministic failure.
//!
//! A gate lives for one network operation. Clone, fetch and push each build
//! a fresh one; nothing is shared between operations.

use git2::{Cred, CredentialType, RemoteCallbacks};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;

/// A username/secret pair for HTTPS remotes
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// What the gate answers to one credential request
#[derive(Debug, PartialEq, Eq)]
pub enum Offer<'a> {
    Supply(&'a Credentials),
    Abort,
}

/// One-shot credential source for a single network operation
pub struct CredentialGate<'a> {
    credentials: &'a Credentials,
    offered: Cell<bool>,
    aborted: Cell<bool>,
}

impl<'a> CredentialGate<'a> {
    pub fn new(credentials: &'a Credentials) -> Self {
        Self {
            credentials,
            offered: Cell::new(false),
            aborted: Cell::new(false),
        }
    }

    /// Answer one credential request
    pub fn next_offer(&self) -> Offer<'a> {
        if self.offered.replace(true) {
            self.aborted.set(true);
            Offer::Abort
        } else {
            Offer::Supply(self.credentials)
        }
    }

    /// Credential callback body, in the shape libgit2 expects
    pub fn offer(
        &self,
        url: &str,
        username_from_url: Option<&str>,
        allowed: CredentialType,
    ) -> Result<Cred, git2::Error> {
        match self.next_offer() {
            Offer::Supply(creds) => {
                tracing::debug!(url, username = %creds.username, "offering credentials");
                if allowed.contains(CredentialType::USERNAME) && !allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                    return Cred::username(username_from_url.unwrap_or(&creds.username));
                }
                Cred::userpass_plaintext(&creds.username, &creds.secret)
            }
            Offer::Abort => {
                tracing::warn!(url, "credentials rejected, aborting authentication");
                Err(git2::Error::new(
                    git2::ErrorCode::User,
                    git2::ErrorClass::Callback,
                    format!("authentication aborted for {}: credentials already offered once", url),
                ))
            }
        }
    }

    /// Whether credentials have been handed out
    pub fn offered(&self) -> bool {
        self.offered.get()
    }

    /// Whether a second request was refused
    pub fn aborted(&self) -> bool {
        self.aborted.get()
    }

    /// Remote callbacks with this gate installed as the credential hook
    pub fn remote_callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username_from_url, allowed| {
            self.offer(url, username_from_url, allowed)
        });
        callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offers_exactly_once() {
        let creds = Credentials::new("user", "secret");
        let gate = CredentialGate::new(&creds);

        assert_eq!(gate.next_offer(), Offer::Supply(&creds));
        assert_eq!(gate.next_offer(), Offer::Abort);
        assert_eq!(gate.next_offer(), Offer::Abort);
        assert!(gate.aborted());
    }

    #[test]
    fn test_callback_aborts_second_request() {
        let creds = Credentials::new("user", "secret");
        let gate = CredentialGate::new(&creds);

        let first = gate.offer("https://example.com/repo.git", None, CredentialType::USER_PASS_PLAINTEXT);
        assert!(first.is_ok());
        assert!(!gate.aborted());

        let second = gate
            .offer("https://example.com/repo.git", None, CredentialType::USER_PASS_PLAINTEXT)
            .err()
            .expect("second request must abort");
        assert_eq!(second.code(), git2::ErrorCode::User);
        assert!(gate.aborted());
    }

    #[test]
    fn test_fresh_gate_per_operation() {
        let creds = Credentials::new("user", "secret");

        let first_op = CredentialGate::new(&creds);
        let _ = first_op.next_offer();
        let _ = first_op.next_offer();

        let second_op = CredentialGate::new(&creds);
        assert!(!second_op.offered());
        assert_eq!(second_op.next_offer(), Offer::Supply(&creds));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("user", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }
}
