//! Device token heuristics and redaction.
//!
//! [`classify`] guesses the platform a raw token was issued for from its
//! length and character set. The guess is advisory: it picks payload
//! decorations and annotates diagnostics, it never decides whether a token is
//! sent. The real platform is whatever transport the token was registered
//! against, and the boundaries below have known false positives (an FCM token
//! for an iOS app lands in the `64 < len < 140` band, web tokens look like
//! Android ones).

use serde::Serialize;

/// Length of a legacy raw APNs device token in hex characters.
pub const LEGACY_APNS_TOKEN_LEN: usize = 64;

/// Tokens longer than this are treated as FCM (Android/Web) registrations.
pub const ANDROID_MIN_EXCLUSIVE_LEN: usize = 140;

/// Characters of a token that may appear in logs and reports.
pub const REDACTED_PREFIX_LEN: usize = 10;

/// Platform a token appears to belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Apple device (APNs).
    Ios,
    /// Android device or web browser (FCM).
    Android,
    /// Could not tell.
    Unknown,
}

impl Platform {
    /// Metric/log label for this platform.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Unknown => "unknown",
        }
    }
}

/// Classify a raw token. Rules apply in order:
///
/// 1. empty (or whitespace only) → `Unknown`; callers must not send it
/// 2. exactly 64 hex characters → `Ios` (legacy APNs format)
/// 3. longer than 140 → `Android`
/// 4. between 64 and 140 exclusive → `Ios`
/// 5. anything else → `Unknown`
#[must_use]
pub fn classify(token: &str) -> Platform {
    let token = token.trim();
    if token.is_empty() {
        return Platform::Unknown;
    }

    let len = token.chars().count();
    if len == LEGACY_APNS_TOKEN_LEN && token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Platform::Ios;
    }
    if len > ANDROID_MIN_EXCLUSIVE_LEN {
        return Platform::Android;
    }
    if len > LEGACY_APNS_TOKEN_LEN && len < ANDROID_MIN_EXCLUSIVE_LEN {
        return Platform::Ios;
    }
    Platform::Unknown
}

/// Whether the token is a legacy 64-hex APNs token.
#[must_use]
pub fn is_legacy_apns(token: &str) -> bool {
    let token = token.trim();
    token.len() == LEGACY_APNS_TOKEN_LEN && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether a token is worth sending at all.
#[must_use]
pub fn is_usable(token: &str) -> bool {
    !token.trim().is_empty()
}

/// Truncate a token for logs and reports: the first 10 characters followed
/// by `...`. Full tokens never leave the transport layer.
#[must_use]
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(REDACTED_PREFIX_LEN).collect();
    format!("{prefix}...")
}
