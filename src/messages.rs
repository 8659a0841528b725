//! Well-known `%%NNNN` message identifiers found in security event data.
//!
//! Providers write these placeholders instead of localized text. Only a small, provider
//! independent subset is known here; unknown identifiers are returned unchanged.

use std::borrow::Cow;

static MESSAGES: &[(u32, &str)] = &[
    // Logon / authentication
    (1963, "An account was successfully logged on."),
    (1964, "An account failed to log on."),
    (2048, "The logon attempt was made using explicit credentials."),
    // Elevation
    (1936, "TokenElevationTypeDefault (1)"),
    (1937, "TokenElevationTypeFull (2)"),
    (1938, "TokenElevationTypeLimited (3)"),
    // Impersonation levels
    (1832, "Identification"),
    (1833, "Impersonation"),
    (1840, "Delegation"),
    (1841, "Anonymous"),
    // Logon types
    (1842, "Interactive"),
    (1843, "Network"),
    (1844, "Batch"),
    (1845, "Service"),
    (1850, "RemoteInteractive"),
    // Privileges
    (1601, "SeAssignPrimaryTokenPrivilege"),
    (1603, "SeTcbPrivilege"),
    (1605, "SeSecurityPrivilege"),
    (1608, "SeSystemtimePrivilege"),
    (1612, "SeDebugPrivilege"),
];

/// Looks up the text of message `id`.
pub fn lookup(id: u32) -> Option<&'static str> {
    MESSAGES
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, text)| *text)
}

/// Replaces a `%%NNNN` placeholder with its text.
///
/// Anything that is not exactly `%%` followed by a known decimal id is returned as-is.
pub fn resolve(value: &str) -> Cow<'_, str> {
    let resolved = value
        .strip_prefix("%%")
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u32>().ok())
        .and_then(lookup);

    match resolved {
        Some(text) => Cow::Borrowed(text),
        None => Cow::Borrowed(value),
    }
}
