//! Requester identity verification.
//!
//! Compares the requester's presented identity against the recipient
//! recorded on the capsule. Two forms are recognized: wallet addresses
//! (exact case-insensitive equality) and email/domain claims (exact equality
//! of the domain portion). The domain check is coarse and non-cryptographic:
//! it proves the claim strings line up, not that the requester controls the
//! domain. Substring containment is deliberately not a match; crafted
//! addresses or emails must not spoof a recipient.
//!
//! Malformed input is a non-match, never an error.

use crate::types::{IdentityVerdict, MatchMethod};

/// Evaluate the requester's claim against the recorded recipient.
pub fn evaluate(expected: &str, claimed: &str) -> IdentityVerdict {
    let (matched, method) = if is_wallet_address(expected) {
        (
            is_wallet_address(claimed) && expected.eq_ignore_ascii_case(claimed),
            MatchMethod::AddressEquality,
        )
    } else if let Some(expected_domain) = domain_of(expected) {
        let matched = domain_of(claimed)
            .map(|d| d.eq_ignore_ascii_case(expected_domain))
            .unwrap_or(false);
        (matched, MatchMethod::DomainClaim)
    } else {
        (false, MatchMethod::Unrecognized)
    };

    IdentityVerdict {
        claimed: claimed.to_string(),
        expected: expected.to_string(),
        matched,
        method,
    }
}

/// `0x` followed by exactly 40 hex characters.
fn is_wallet_address(s: &str) -> bool {
    let Some(hex_part) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) else {
        return false;
    };
    hex_part.len() == 40 && hex_part.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Extract the domain portion of an email address or bare domain claim.
///
/// `alice@example.org` and `example.org` both yield `example.org`. Anything
/// without a plausible domain shape yields `None`.
fn domain_of(s: &str) -> Option<&str> {
    let candidate = match s.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() => domain,
        Some(_) => return None,
        None => s,
    };

    let plausible = !candidate.is_empty()
        && candidate.contains('.')
        && !candidate.starts_with('.')
        && !candidate.ends_with('.')
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-');
    plausible.then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01";

    #[test]
    fn address_match_is_case_insensitive() {
        let verdict = evaluate(RECIPIENT, &RECIPIENT.to_lowercase());
        assert!(verdict.matched);
        assert_eq!(verdict.method, MatchMethod::AddressEquality);
    }

    #[test]
    fn address_substring_does_not_match() {
        // A requester that is merely a prefix of the recipient.
        let verdict = evaluate(RECIPIENT, &RECIPIENT[..32]);
        assert!(!verdict.matched);

        // And the reverse: recipient embedded inside a longer string.
        let padded = format!("{}ff", &RECIPIENT[..40]);
        let verdict = evaluate(RECIPIENT, &padded);
        assert!(!verdict.matched);
    }

    #[test]
    fn address_recipient_rejects_non_address_claim() {
        let verdict = evaluate(RECIPIENT, "alice@example.org");
        assert!(!verdict.matched);
        assert_eq!(verdict.method, MatchMethod::AddressEquality);
    }

    #[test]
    fn domain_claim_matches_on_exact_domain() {
        let verdict = evaluate("alice@example.org", "bob@EXAMPLE.org");
        assert!(verdict.matched);
        assert_eq!(verdict.method, MatchMethod::DomainClaim);

        let verdict = evaluate("example.org", "carol@example.org");
        assert!(verdict.matched);
    }

    #[test]
    fn domain_claim_rejects_containment() {
        // "example.org" must not match "notexample.org" or a subdomain.
        assert!(!evaluate("alice@example.org", "mallory@notexample.org").matched);
        assert!(!evaluate("alice@example.org", "mallory@example.org.evil.io").matched);
        assert!(!evaluate("alice@example.org", "mallory@sub.example.org").matched);
    }

    #[test]
    fn malformed_input_is_a_non_match_not_an_error() {
        let verdict = evaluate("", "anything");
        assert!(!verdict.matched);
        assert_eq!(verdict.method, MatchMethod::Unrecognized);

        assert!(!evaluate("@@@", "alice@example.org").matched);
        assert!(!evaluate("0xshort", "0xshort").matched);
        assert!(!evaluate("alice@example.org", "").matched);
    }
}
