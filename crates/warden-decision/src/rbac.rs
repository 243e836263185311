//! Signed-token RBAC: an approver is valid for a task iff its HMAC-SHA256
//! token over the task's signing message matches, checked in constant time —
//! the same idiom the teacher workspace's plugin sandbox uses to pin digests
//! via `subtle::ConstantTimeEq`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashSet;
use subtle::ConstantTimeEq;
use warden_core::config::RbacConfig;

type HmacSha256 = Hmac<Sha256>;

/// The ASCII signing message for a task: `"<event_id>:<assignee_domain>:<action>:<tenant>"`.
#[must_use]
pub fn signing_message(event_id: &str, assignee_domain: &str, action: &str, tenant: &str) -> String {
    format!("{event_id}:{assignee_domain}:{action}:{tenant}")
}

fn token_for(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(message.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

fn tokens_match(expected: &str, actual: &str) -> bool {
    let expected = expected.as_bytes();
    let actual = actual.as_bytes();
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}

/// Approvers whose token validated against `message`.
#[derive(Debug, Default)]
pub struct ValidApprovers {
    /// Ids of approvers whose signature validated.
    pub ids: Vec<String>,
    /// Union of roles held by valid approvers.
    pub roles: HashSet<String>,
}

impl ValidApprovers {
    /// Number of distinct valid approvers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

/// Verify every `rbac.active_approvers` entry against `message`, returning the
/// subset whose token is valid.
#[must_use]
pub fn verify_active_approvers(rbac: &RbacConfig, message: &str) -> ValidApprovers {
    let mut valid = ValidApprovers::default();
    for active in &rbac.active_approvers {
        let Some(record) = rbac.approvers.iter().find(|a| a.id == active.id) else {
            continue;
        };
        let expected = token_for(&record.secret, message);
        if tokens_match(&expected, &active.token) {
            valid.ids.push(record.id.clone());
            valid.roles.extend(record.roles.iter().cloned());
        }
    }
    valid
}
