//! Classification of failed credential-exchange attempts.

use crate::auth::ApiError;

/// Platform error subtypes after which retrying can never succeed.
///
/// Everything on this list is an authentication or authorization failure:
/// the token is revoked, the account is gone, or the caller was never
/// authorized in the first place.
const UNRECOVERABLE_SUBTYPES: &[&str] = &[
    "not_authed",
    "invalid_auth",
    "account_inactive",
    "user_removed_from_team",
    "team_disabled",
];

/// Verdict over a single failed credential-exchange attempt.
///
/// Derived per failure, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoverabilityVerdict {
    /// Whether retrying the exchange is expected to eventually succeed.
    pub recoverable: bool,
}

/// Classify a failed credential-exchange attempt.
///
/// A platform error is unrecoverable iff its subtype is in the closed
/// auth-failure set. Request and HTTP errors never completed a platform
/// round-trip and are always unrecoverable. Every other platform error
/// (rate limits, internal errors, ...) is recoverable.
pub fn classify(error: &ApiError) -> RecoverabilityVerdict {
    let recoverable = match error {
        ApiError::Platform { subtype } => !UNRECOVERABLE_SUBTYPES.contains(&subtype.as_str()),
        ApiError::Request { .. } | ApiError::Http { .. } => false,
    };
    RecoverabilityVerdict { recoverable }
}

/// Whether an automatic reconnect may be attempted after `error`.
///
/// Both the auto-reconnect flag and a recoverable verdict are required.
pub fn may_reconnect(error: &ApiError, auto_reconnect_enabled: bool) -> bool {
    auto_reconnect_enabled && classify(error).recoverable
}
