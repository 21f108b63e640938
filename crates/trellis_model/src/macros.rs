//! `@@{name}@@` placeholder checks.
//!
//! Placeholders are resolved by the remote engine at run time, never here.
//! The compiler only guarantees that what it emits is well formed. A body
//! runs to the first `}@@`, so it may hold braces (inline JSON, format
//! strings) but not another `@@{`.

use once_cell::sync::Lazy;
use regex::Regex;
use trellis_core::{CompileError, CompileResult};

const OPEN: &str = "@@{";
const CLOSE: &str = "}@@";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)@@\{(.*?)\}@@").expect("placeholder pattern is valid"));

/// Check that every placeholder in `text` is balanced and named.
///
/// # Errors
///
/// Returns `MalformedMacro` naming `field` on an unterminated placeholder,
/// a stray closing delimiter, or an empty name.
pub fn validate_macros(field: &str, text: &str) -> CompileResult<()> {
    if !text.contains("@@") {
        return Ok(());
    }

    let malformed = |reason: &str| CompileError::MalformedMacro {
        field: field.to_string(),
        text: text.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = String::with_capacity(text.len());
    let mut last = 0;
    for m in PLACEHOLDER.find_iter(text) {
        let name = &text[m.start() + OPEN.len()..m.end() - CLOSE.len()];
        if name.trim().is_empty() {
            return Err(malformed("empty placeholder name"));
        }
        if name.contains(OPEN) {
            return Err(malformed("placeholder opened inside another"));
        }
        rest.push_str(&text[last..m.start()]);
        last = m.end();
    }
    rest.push_str(&text[last..]);

    if rest.contains(OPEN) {
        return Err(malformed("unterminated placeholder"));
    }
    if rest.contains(CLOSE) {
        return Err(malformed("closing delimiter without opener"));
    }
    Ok(())
}

/// Compile-time substitution is the identity: the text is returned
/// verbatim once its placeholders are known to be well formed.
///
/// # Errors
///
/// Returns `MalformedMacro` if the text fails [`validate_macros`]
pub fn substitute_macro(field: &str, text: &str) -> CompileResult<String> {
    validate_macros(field, text)?;
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_text_passes() {
        assert!(validate_macros("f", "echo hello").is_ok());
        assert!(validate_macros("f", "user@@host").is_ok());
    }

    #[test]
    fn test_well_formed_placeholders() {
        assert!(validate_macros("f", "echo @@{name}@@").is_ok());
        assert!(validate_macros("f", "@@{a}@@-@@{b.address}@@").is_ok());
        assert!(validate_macros("f", r#"@@{calm_time("%Y")}@@"#).is_ok());
    }

    #[test]
    fn test_unterminated() {
        let err = validate_macros("script", "echo @@{name").unwrap_err();
        match err {
            CompileError::MalformedMacro { field, reason, .. } => {
                assert_eq!(field, "script");
                assert_eq!(reason, "unterminated placeholder");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_stray_close() {
        let err = validate_macros("f", "name}@@ here").unwrap_err();
        assert!(matches!(err, CompileError::MalformedMacro { .. }));
    }

    #[test]
    fn test_empty_name() {
        assert!(validate_macros("f", "@@{}@@").is_err());
        assert!(validate_macros("f", "@@{  }@@").is_err());
    }

    #[test]
    fn test_nested_open() {
        assert!(validate_macros("f", "@@{a@@{b}@@").is_err());
    }

    #[test]
    fn test_substitute_is_identity() {
        let text = "ping @@{endpoint.address}@@";
        assert_eq!(substitute_macro("f", text).unwrap(), text);
    }

    #[test]
    fn test_braces_inside_body() {
        assert!(validate_macros("f", r#"@@{ {"a": 1} }@@"#).is_ok());
        assert!(validate_macros("f", r#"@@{{"a": {"b": 2}}}@@"#).is_ok());
        assert!(validate_macros("f", "@@{fmt(\"{0}\", x)}@@ and @@{y}@@").is_ok());
        assert!(validate_macros("f", "@@{multi\nline}@@").is_ok());
        assert!(validate_macros("f", "@@{ {open }@@ }@@").is_err());
    }

    proptest! {
        #[test]
        fn prop_wrapped_identifier_is_valid(name in "[a-z_][a-z0-9_.]{0,16}") {
            let text = format!("x @@{{{}}}@@ y", name);
            prop_assert!(validate_macros("f", &text).is_ok());
        }

        #[test]
        fn prop_unclosed_is_rejected(name in "[a-z]{1,8}") {
            let text = format!("@@{{{}", name);
            prop_assert!(validate_macros("f", &text).is_err());
        }
    }
}
