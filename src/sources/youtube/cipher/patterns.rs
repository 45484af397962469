//! Pattern tables for the signature deriver. New obfuscation variants are
//! added here without touching the derivation code.

use super::procedure::Primitive;

/// Call sites that pass the signature to the entry function. Each pattern
/// captures the function name as `sig`.
pub const CALL_SITE_PATTERNS: &[&str] = &[
    r#"\b[cs]\s*&&\s*[adf]\.set\([^,]+\s*,\s*encodeURIComponent\s*\(\s*(?P<sig>[a-zA-Z0-9$]+)\("#,
    r#"\b[a-zA-Z0-9]+\s*&&\s*[a-zA-Z0-9]+\.set\([^,]+\s*,\s*encodeURIComponent\s*\(\s*(?P<sig>[a-zA-Z0-9$]+)\("#,
    r#"(?:^|[^a-zA-Z0-9$])(?P<sig>[a-zA-Z0-9$]{2,})\s*=\s*function\(\s*[a-zA-Z0-9$]+\s*\)\s*\{\s*[a-zA-Z0-9$]+\s*=\s*[a-zA-Z0-9$]+\.split\(\s*(?:""|'')\s*\)"#,
    r#"function\s+(?P<sig>[a-zA-Z0-9$]+)\s*\(\s*[a-zA-Z0-9$]+\s*\)\s*\{\s*[a-zA-Z0-9$]+\s*=\s*[a-zA-Z0-9$]+\.split\(\s*(?:""|'')\s*\)"#,
    r#"["']signature["']\s*,\s*(?P<sig>[a-zA-Z0-9$]+)\("#,
    r#"\.sig\s*\|\|\s*(?P<sig>[a-zA-Z0-9$]+)\("#,
];

/// Any of these in a program means it deciphers signatures somewhere.
pub const SIGNATURE_MARKERS: &[&str] = &[r#""signature""#, "'signature'", r#".sig||"#];

pub const SPLIT_MARKERS: &[&str] = &[r#".split("")"#, ".split('')"];

pub const JOIN_MARKERS: &[&str] = &[r#".join("")"#, ".join('')"];

/// Canonical bodies of helper methods: parameters renamed `a`, `b`, locals
/// `c`, `d`, whitespace dropped, declarations spelled `var`.
pub const PRIMITIVE_SHAPES: &[(Primitive, &str)] = &[
    (Primitive::Reverse, "a.reverse()"),
    (Primitive::Splice, "a.splice(0,b)"),
    (Primitive::Swap, "var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c"),
    (Primitive::Swap, "var c=a[0];a[0]=a[b%a.length];a[b]=c"),
];

/// Parameter names in declaration order after canonicalization.
pub const PARAM_NAMES: &[&str] = &["a", "b"];

/// Local names in declaration order after canonicalization.
pub const LOCAL_NAMES: &[&str] = &["c", "d", "e", "f", "g", "h"];

pub fn classify(canonical_body: &str) -> Option<Primitive> {
    PRIMITIVE_SHAPES
        .iter()
        .find(|(_, shape)| *shape == canonical_body)
        .map(|(primitive, _)| *primitive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn all_call_site_patterns_compile_with_sig_group() {
        for pattern in CALL_SITE_PATTERNS {
            let re = Regex::new(pattern).unwrap();
            assert!(re.capture_names().any(|n| n == Some("sig")), "{}", pattern);
        }
    }

    #[test]
    fn classify_known_shapes() {
        assert_eq!(classify("a.reverse()"), Some(Primitive::Reverse));
        assert_eq!(classify("a.splice(0,b)"), Some(Primitive::Splice));
        assert_eq!(
            classify("var c=a[0];a[0]=a[b%a.length];a[b]=c"),
            Some(Primitive::Swap)
        );
        assert_eq!(classify("a.sort()"), None);
    }
}
