//! URL path normalization into canonical endpoint patterns
//!
//! Raw paths carry high-cardinality segments (ids, hashes, tokens). Learning
//! per raw path would create one endpoint row per user id, so every path is
//! collapsed into a pattern before it touches the rest of the pipeline:
//! `/users/42/profile` → `/users/{id}/profile`.

use once_cell::sync::Lazy;
use regex::Regex;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("UUID regex is valid")
});

/// Normalize a raw URL path into a canonical endpoint pattern.
///
/// Segment rules, applied in order (first match wins):
/// 1. UUID → `{id}`
/// 2. Pure numeric → `{id}`
/// 3. Hex of length ≥ 16 without hyphens → `{hash}`
/// 4. Base64-like of length ≥ 20 with mixed character classes → `{token}`
/// 5. Slug (lowercase, ≥ 2 hyphens, length > 8) → `{slug}`
/// 6. Mixed alpha+digit of length 6–12 → `{id}`
///
/// Shorter mixed segments (`v2`, `api`) survive verbatim. The result always
/// begins with `/`, and `normalize_path` is idempotent: placeholders contain
/// braces, which no rule matches.
pub fn normalize_path(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    path.split('/')
        .map(normalize_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn normalize_segment(segment: &str) -> String {
    if segment.is_empty() {
        return String::new();
    }

    if UUID_RE.is_match(segment) {
        return "{id}".to_string();
    }

    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return "{id}".to_string();
    }

    if segment.len() >= 16 && segment.bytes().all(|b| b.is_ascii_hexdigit()) {
        return "{hash}".to_string();
    }

    if is_base64_like(segment) {
        return "{token}".to_string();
    }

    if is_slug(segment) {
        return "{slug}".to_string();
    }

    if (6..=12).contains(&segment.len())
        && segment.bytes().all(|b| b.is_ascii_alphanumeric())
        && segment.bytes().any(|b| b.is_ascii_alphabetic())
        && segment.bytes().any(|b| b.is_ascii_digit())
    {
        return "{id}".to_string();
    }

    segment.to_string()
}

/// Opaque credential-shaped segment: base64/base64url alphabet, at least 20
/// characters, at least two character classes, padding only at the end.
fn is_base64_like(segment: &str) -> bool {
    if segment.len() < 20 {
        return false;
    }
    let body = segment.trim_end_matches('=');
    if body.is_empty() || body.contains('=') {
        return false;
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'-' | b'_'))
    {
        return false;
    }
    let classes = [
        body.bytes().any(|b| b.is_ascii_uppercase()),
        body.bytes().any(|b| b.is_ascii_lowercase()),
        body.bytes().any(|b| b.is_ascii_digit()),
    ];
    classes.iter().filter(|c| **c).count() >= 2
}

/// Human-readable slug: lowercase alphanumerics joined by two or more hyphens.
fn is_slug(segment: &str) -> bool {
    segment.len() > 8
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && segment.bytes().filter(|b| *b == b'-').count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn numeric_segments_become_id() {
        assert_eq!(normalize_path("/users/42/profile"), "/users/{id}/profile");
        assert_eq!(normalize_path("/orders/1234567890"), "/orders/{id}");
    }

    #[test]
    fn uuid_segments_become_id() {
        assert_eq!(
            normalize_path("/users/550e8400-e29b-41d4-a716-446655440000/avatar"),
            "/users/{id}/avatar"
        );
        // Case-insensitive
        assert_eq!(
            normalize_path("/jobs/550E8400-E29B-41D4-A716-446655440000"),
            "/jobs/{id}"
        );
    }

    #[test]
    fn long_hex_segments_become_hash() {
        assert_eq!(
            normalize_path("/files/a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6"),
            "/files/{hash}"
        );
        assert_eq!(normalize_path("/commits/deadbeefdeadbeef"), "/commits/{hash}");
    }

    #[test]
    fn base64_segments_become_token() {
        assert_eq!(
            normalize_path("/sessions/eyJhbGciOiJIUzI1NiJ9"),
            "/sessions/{token}"
        );
        assert_eq!(
            normalize_path("/auth/dGhpcyBpcyBhIHRlc3Q24zz="),
            "/auth/{token}"
        );
    }

    #[test]
    fn slugs_become_slug() {
        assert_eq!(
            normalize_path("/posts/my-awesome-blog-post"),
            "/posts/{slug}"
        );
    }

    #[test]
    fn short_version_segments_survive() {
        assert_eq!(normalize_path("/api/v2/items"), "/api/v2/items");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn mixed_alphanumeric_of_medium_length_becomes_id() {
        assert_eq!(normalize_path("/carts/ab12cd34"), "/carts/{id}");
        // Too short to be an opaque id
        assert_eq!(normalize_path("/api/v2"), "/api/v2");
        // Too long for the mixed rule, not hex, not base64-length
        assert_eq!(normalize_path("/things/abcdefghijklm"), "/things/abcdefghijklm");
    }

    #[test]
    fn result_always_begins_with_slash() {
        assert_eq!(normalize_path("users/42"), "/users/{id}");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn idempotent_on_known_patterns() {
        for path in [
            "/users/42/profile",
            "/files/a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6",
            "/sessions/eyJhbGciOiJIUzI1NiJ9",
            "/posts/my-awesome-blog-post",
            "/api/v2/items",
        ] {
            let once = normalize_path(path);
            assert_eq!(normalize_path(&once), once);
        }
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(path in "[a-zA-Z0-9/._=-]{0,60}") {
            let once = normalize_path(&path);
            prop_assert_eq!(normalize_path(&once), once.clone());
        }

        #[test]
        fn normalize_always_starts_with_slash(path in "[a-zA-Z0-9/._=-]{0,60}") {
            prop_assert!(normalize_path(&path).starts_with('/'));
        }
    }
}
