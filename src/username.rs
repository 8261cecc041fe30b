//! Platform username rules.
//!
//! Usernames are 3-32 characters from `[A-Za-z0-9_]` and compared
//! case-insensitively everywhere.

pub const MIN_LENGTH: usize = 3;
pub const MAX_LENGTH: usize = 32;

/// Names that can never be claimed, regardless of availability.
const RESERVED: &[&str] = &[
    "admin",
    "administrator",
    "moderator",
    "root",
    "support",
    "system",
    "staff",
    "murmur",
    "everyone",
    "anonymous",
    "fuck",
    "shit",
    "asshole",
];

/// Validate a client-supplied username. Returns a human-readable message on
/// failure.
pub fn validate(username: &str) -> Result<(), &'static str> {
    if username.len() < MIN_LENGTH {
        return Err("Username must be at least 3 characters");
    }
    if username.len() > MAX_LENGTH {
        return Err("Username must be at most 32 characters");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err("Username may only contain letters, digits and underscores");
    }
    if RESERVED.contains(&fold(username).as_str()) {
        return Err("Username is not available");
    }
    Ok(())
}

/// Case-insensitive comparison key.
#[must_use]
pub fn fold(username: &str) -> String {
    username.to_lowercase()
}

/// Derive a valid base username from a provider login or display name.
///
/// Separators become underscores, everything outside the charset is dropped,
/// runs of underscores collapse, and the result is clamped to the platform
/// bounds. Inputs that sanitize to nothing usable fall back to "user".
#[must_use]
pub fn derive_base(raw: &str) -> String {
    let mut base = String::with_capacity(raw.len());
    let mut last_was_underscore = false;

    for c in raw.chars() {
        let mapped = match c {
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase()),
            '_' | '-' | '.' | ' ' => Some('_'),
            _ => None,
        };
        if let Some(c) = mapped {
            if c == '_' {
                if last_was_underscore || base.is_empty() {
                    continue;
                }
                last_was_underscore = true;
            } else {
                last_was_underscore = false;
            }
            base.push(c);
        }
    }

    let mut base = base.trim_matches('_').to_string();
    base.truncate(MAX_LENGTH);

    if base.len() < MIN_LENGTH {
        base.insert_str(0, "user");
        base.truncate(MAX_LENGTH);
    }
    if RESERVED.contains(&base.as_str()) {
        base.push('_');
        base.push('1');
    }

    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_normal_names() {
        assert!(validate("octocat").is_ok());
        assert!(validate("Octo_Cat42").is_ok());
        assert!(validate("abc").is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        assert!(validate("ab").is_err());
        assert!(validate(&"a".repeat(33)).is_err());
        assert!(validate("octo cat").is_err());
        assert!(validate("octo-cat").is_err());
        assert!(validate("octo@cat").is_err());
        assert!(validate("Admin").is_err());
    }

    #[test]
    fn test_derive_base_sanitizes() {
        assert_eq!(derive_base("octocat"), "octocat");
        assert_eq!(derive_base("Octo Cat"), "octo_cat");
        assert_eq!(derive_base("jane.doe-42"), "jane_doe_42");
        assert_eq!(derive_base("héllo wörld"), "hllo_wrld");
    }

    #[test]
    fn test_derive_base_handles_degenerate_input() {
        assert_eq!(derive_base(""), "user");
        assert_eq!(derive_base("@@@"), "user");
        assert_eq!(derive_base("ab"), "userab");
        assert!(validate(&derive_base("漢字")).is_ok());
    }

    #[test]
    fn test_derive_base_clamps_length() {
        let long = "a".repeat(80);
        let base = derive_base(&long);
        assert_eq!(base.len(), MAX_LENGTH);
        assert!(validate(&base).is_ok());
    }

    #[test]
    fn test_derive_base_avoids_reserved() {
        let base = derive_base("admin");
        assert_ne!(base, "admin");
    }
}
