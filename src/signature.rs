//! Canonical dedup signatures for skip-trace requests.
//!
//! An address + owner name is normalized into a [`CanonicalSignature`]
//! whose `primary` and `secondary` keys are deterministic SHA-256 digests.
//! The keys are the idempotency boundary for billing: equivalent requests
//! must always produce identical keys, across process restarts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Parsed pieces
// ---------------------------------------------------------------------------

/// Best-effort structured view of a free-text mailing address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl ParsedAddress {
    pub fn is_empty(&self) -> bool {
        self.street.is_empty() && self.city.is_empty() && self.state.is_empty() && self.zip.is_empty()
    }
}

/// Owner name split into first/last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedOwner {
    pub first: String,
    pub last: String,
}

// ---------------------------------------------------------------------------
// Canonical signature
// ---------------------------------------------------------------------------

/// Deterministic dedup keys for one (address, owner) pair.
///
/// `primary` hashes the full normalized tuple; `secondary` hashes the same
/// tuple with unit/suite/floor tokens stripped from the street line. The
/// secondary key is only used when a sanitized-address retry succeeds, so
/// the alternate query gets its own idempotency bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSignature {
    pub primary: String,
    pub secondary: String,
    pub normalized_address: String,
    pub normalized_person: String,
    pub has_unit: bool,
}

impl CanonicalSignature {
    /// Compute both keys from already-parsed components.
    pub fn compute(addr: &ParsedAddress, owner: &ParsedOwner) -> Self {
        let (bare_street, has_unit) = strip_unit_tokens(&addr.street);

        let primary = hash_tuple(&addr.street, &addr.city, &addr.state, &addr.zip, owner);
        let secondary = hash_tuple(&bare_street, &addr.city, &addr.state, &addr.zip, owner);

        let normalized_address = [
            normalize(&addr.street),
            normalize(&addr.city),
            format!("{} {}", normalize(&addr.state), normalize(&addr.zip))
                .trim()
                .to_string(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

        let normalized_person = format!("{} {}", normalize(&owner.first), normalize(&owner.last))
            .trim()
            .to_string();

        Self {
            primary,
            secondary,
            normalized_address,
            normalized_person,
            has_unit,
        }
    }
}

/// Convenience: parse raw strings and compute the signature in one step.
pub fn signature(raw_address: &str, raw_owner: &str) -> CanonicalSignature {
    let addr = parse_address(raw_address);
    let owner = parse_owner(raw_owner);
    CanonicalSignature::compute(&addr, &owner)
}

fn hash_tuple(street: &str, city: &str, state: &str, zip: &str, owner: &ParsedOwner) -> String {
    let mut hasher = Sha256::new();

    // Version prefix to allow for future hashing logic updates
    hasher.update(b"v1:");
    for part in [street, city, state, zip, &owner.first, &owner.last] {
        hasher.update(normalize(part).as_bytes());
        hasher.update(b"|");
    }

    format!("{:x}", hasher.finalize())
}

/// Lowercase, trim, collapse interior whitespace.
fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Address parsing
// ---------------------------------------------------------------------------

/// Parse a free-text address with comma-delimited heuristics.
///
/// The last segment is matched against a `STATE ZIP` pattern, falling back
/// progressively when the segment count is irregular. With five or more
/// segments the extra leading segments are folded into the street line.
/// This is a best-effort parse, not a guarantee; an empty input yields an
/// empty (but stable) result.
pub fn parse_address(raw: &str) -> ParsedAddress {
    let segments: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    match segments.len() {
        0 => ParsedAddress::default(),
        1 => ParsedAddress {
            street: segments[0].clone(),
            ..Default::default()
        },
        2 => {
            let (state, zip) = parse_state_zip(&segments[1]);
            if state.is_empty() && zip.is_empty() {
                // Tail didn't look like STATE ZIP; treat it as the city.
                ParsedAddress {
                    street: segments[0].clone(),
                    city: segments[1].clone(),
                    ..Default::default()
                }
            } else {
                ParsedAddress {
                    street: segments[0].clone(),
                    state,
                    zip,
                    ..Default::default()
                }
            }
        }
        _ => {
            let n = segments.len();
            let (state, zip) = parse_state_zip(&segments[n - 1]);
            if state.is_empty() && zip.is_empty() {
                // No recognizable tail: fold everything but the last into the
                // street line and call the last segment the city.
                ParsedAddress {
                    street: segments[..n - 1].join(" "),
                    city: segments[n - 1].clone(),
                    ..Default::default()
                }
            } else {
                ParsedAddress {
                    street: segments[..n - 2].join(" "),
                    city: segments[n - 2].clone(),
                    state,
                    zip,
                }
            }
        }
    }
}

/// Match a trailing `STATE ZIP` segment ("IL 62704", "IL", "IL 62704-1234").
/// Returns empty strings when the segment doesn't fit the pattern.
fn parse_state_zip(segment: &str) -> (String, String) {
    let tokens: Vec<&str> = segment.split_whitespace().collect();

    match tokens.as_slice() {
        [state] if is_state_token(state) => ((*state).to_uppercase(), String::new()),
        [state, zip] if is_state_token(state) && is_zip_token(zip) => {
            ((*state).to_uppercase(), zip_five(zip))
        }
        _ => (String::new(), String::new()),
    }
}

fn is_state_token(tok: &str) -> bool {
    tok.len() == 2 && tok.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_zip_token(tok: &str) -> bool {
    let digits = tok.split('-').next().unwrap_or("");
    digits.len() == 5 && digits.chars().all(|c| c.is_ascii_digit())
}

/// First five digits of a ZIP or ZIP+4.
fn zip_five(tok: &str) -> String {
    tok.split('-').next().unwrap_or("").to_string()
}

// ---------------------------------------------------------------------------
// Owner-name parsing
// ---------------------------------------------------------------------------

/// Split an owner name into first/last: the last token is the surname and
/// the token preceding it the first name. Connector tokens ("and", "&")
/// are dropped, so "John and Jane Smith" resolves to Jane Smith.
pub fn parse_owner(raw: &str) -> ParsedOwner {
    let tokens: Vec<&str> = raw
        .split_whitespace()
        .filter(|t| !is_connector(t))
        .collect();

    match tokens.as_slice() {
        [] => ParsedOwner::default(),
        [only] => ParsedOwner {
            first: String::new(),
            last: (*only).to_string(),
        },
        [.., first, last] => ParsedOwner {
            first: (*first).to_string(),
            last: (*last).to_string(),
        },
    }
}

fn is_connector(tok: &str) -> bool {
    matches!(tok.to_lowercase().as_str(), "and" | "&")
}

// ---------------------------------------------------------------------------
// Unit stripping
// ---------------------------------------------------------------------------

const UNIT_MARKERS: &[&str] = &["apt", "apartment", "unit", "suite", "ste", "floor", "fl"];

/// Remove unit/suite/floor designators (and their argument) from a street
/// line. Returns the stripped street and whether anything was removed.
pub fn strip_unit_tokens(street: &str) -> (String, bool) {
    let mut kept: Vec<&str> = Vec::new();
    let mut stripped = false;
    let mut skip_next = false;

    for tok in street.split_whitespace() {
        if skip_next {
            skip_next = false;
            stripped = true;
            continue;
        }
        let bare = tok.trim_end_matches('.').to_lowercase();
        if bare.starts_with('#') {
            stripped = true;
            continue;
        }
        if UNIT_MARKERS.contains(&bare.as_str()) {
            skip_next = true;
            stripped = true;
            continue;
        }
        kept.push(tok);
    }

    (kept.join(" "), stripped)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
