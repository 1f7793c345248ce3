//! Identity string canonicalization (§6.3): the `Map` function and the
//! *mapped* predicate core entries require.

use crate::error::CodecError;

const LOCAL_MIN: usize = 3;
const LOCAL_MAX: usize = 64;
const TOTAL_MAX: usize = 254;
const FORBIDDEN_PAIRS: [&str; 4] = ["--", "-.", ".-", ".."];

fn map_char(c: char) -> char {
    match c {
        '0' => 'o',
        '1' => 'l',
        'j' => 'i',
        other => other,
    }
}

fn check_alphabet(part: &str) -> Result<(), CodecError> {
    if part.chars().any(|c| !matches!(c, 'a'..='z' | '2'..='9' | '.' | '-')) {
        return Err(CodecError::InvalidIdentity(format!(
            "{part} contains a character outside [a-z2-9.-]"
        )));
    }
    Ok(())
}

fn check_no_leading_trailing_punctuation(part: &str) -> Result<(), CodecError> {
    let first = part.chars().next();
    let last = part.chars().last();
    if matches!(first, Some('-') | Some('.')) || matches!(last, Some('-') | Some('.')) {
        return Err(CodecError::InvalidIdentity(format!(
            "{part} starts or ends with '-' or '.'"
        )));
    }
    Ok(())
}

fn check_no_forbidden_pairs(part: &str) -> Result<(), CodecError> {
    for pair in FORBIDDEN_PAIRS {
        if part.contains(pair) {
            return Err(CodecError::InvalidIdentity(format!("{part} contains \"{pair}\"")));
        }
    }
    Ok(())
}

/// Apply `Map` (§6.3) and validate the result. Returns the canonical form.
pub fn map_identity(input: &str) -> Result<String, CodecError> {
    let trimmed = input.trim();
    let lowered = trimmed.to_lowercase();
    let mapped: String = lowered.chars().map(map_char).collect();

    let mut parts = mapped.split('@');
    let local = parts
        .next()
        .ok_or_else(|| CodecError::InvalidIdentity("missing local part".into()))?;
    let domain = parts
        .next()
        .ok_or_else(|| CodecError::InvalidIdentity("missing '@'".into()))?;
    if parts.next().is_some() {
        return Err(CodecError::InvalidIdentity("more than one '@'".into()));
    }

    if local.len() < LOCAL_MIN || local.len() > LOCAL_MAX {
        return Err(CodecError::InvalidIdentity(format!(
            "local part length {} outside [{LOCAL_MIN}, {LOCAL_MAX}]",
            local.len()
        )));
    }
    if mapped.len() > TOTAL_MAX {
        return Err(CodecError::InvalidIdentity(format!(
            "identity length {} exceeds {TOTAL_MAX}",
            mapped.len()
        )));
    }

    for part in [local, domain] {
        check_alphabet(part)?;
        check_no_leading_trailing_punctuation(part)?;
        check_no_forbidden_pairs(part)?;
    }

    Ok(mapped)
}

/// True if `input` already equals its own mapped form (§6.3: "An identity
/// equal to its mapped form is called mapped; core entries require mapped
/// identities").
pub fn is_mapped(input: &str) -> bool {
    matches!(map_identity(input), Ok(mapped) if mapped == input)
}

/// Validate that `input` is mapped, surfacing why it isn't.
pub fn require_mapped(input: &str) -> Result<(), CodecError> {
    let mapped = map_identity(input)?;
    if mapped != input {
        return Err(CodecError::InvalidIdentity(format!(
            "{input} is not in canonical mapped form (expected {mapped})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_lowercases() {
        assert_eq!(map_identity("  Alice@Example.com  ").unwrap(), "alice@example.com");
    }

    #[test]
    fn maps_digits_and_j() {
        assert_eq!(map_identity("j0e1@example.com").unwrap(), "ioel@example.com");
    }

    #[test]
    fn rejects_multiple_at_signs() {
        assert!(map_identity("a@b@example.com").is_err());
    }

    #[test]
    fn rejects_missing_at_sign() {
        assert!(map_identity("alice.example.com").is_err());
    }

    #[test]
    fn rejects_short_local_part() {
        assert!(map_identity("ab@example.com").is_err());
    }

    #[test]
    fn rejects_leading_hyphen() {
        assert!(map_identity("-alice@example.com").is_err());
    }

    #[test]
    fn rejects_double_dot() {
        assert!(map_identity("alice@example..com").is_err());
    }

    #[test]
    fn rejects_disallowed_alphabet() {
        assert!(map_identity("alice_b@example.com").is_err());
    }

    #[test]
    fn already_mapped_identity_is_mapped() {
        assert!(is_mapped("alice@example.com"));
    }

    #[test]
    fn unmapped_identity_is_not_mapped() {
        assert!(!is_mapped("Alice@example.com"));
        assert!(require_mapped("Alice@example.com").is_err());
    }
}
