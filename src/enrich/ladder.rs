//! Retry/variant/fallback ladder.
//!
//! The ladder is an explicit state machine rather than nested
//! conditionals: every transition is driven by the previous attempt's
//! outcome kind and a small immutable context, which keeps each edge
//! independently testable.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Attempt reason
// ---------------------------------------------------------------------------

/// Why a given attempt was made; recorded on audit rows and surfaced on
/// the final outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptReason {
    Cached,
    Primary,
    Retry,
    ZipHintAlternate,
    AddressSanitized,
    Fallback,
}

impl AttemptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Primary => "primary",
            Self::Retry => "retry",
            Self::ZipHintAlternate => "zip_hint_alternate",
            Self::AddressSanitized => "address_sanitized",
            Self::Fallback => "fallback",
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome kind
// ---------------------------------------------------------------------------

/// Collapsed view of one attempt's result, as far as the ladder cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Contacts found.
    Success,
    /// Vendor said success but returned zero phones and zero emails.
    NoContacts,
    /// Structured provider error or network failure.
    Failure,
}

// ---------------------------------------------------------------------------
// Ladder state machine
// ---------------------------------------------------------------------------

/// Position in the attempt ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderState {
    /// First call against the primary provider (ZIP hint #1 already
    /// substituted when the parsed ZIP was empty).
    Primary,
    /// Nth fixed-delay retry against the primary provider.
    Retry(u32),
    /// One call with the second ZIP hint.
    ZipHintAlternate,
    /// One call with unit/suite/floor tokens stripped from the street.
    AddressSanitized,
    /// One call against the fallback provider, no retries inside it.
    Fallback,
    /// No rungs left.
    Exhausted,
}

impl LadderState {
    pub fn reason(&self) -> AttemptReason {
        match self {
            Self::Primary => AttemptReason::Primary,
            Self::Retry(_) => AttemptReason::Retry,
            Self::ZipHintAlternate => AttemptReason::ZipHintAlternate,
            Self::AddressSanitized => AttemptReason::AddressSanitized,
            Self::Fallback => AttemptReason::Fallback,
            Self::Exhausted => AttemptReason::Primary,
        }
    }
}

/// What the ladder is allowed to try for this request.
#[derive(Debug, Clone, Default)]
pub struct LadderContext {
    /// Retries after the initial attempt (primary rung only).
    pub max_retries: u32,
    /// A second, different ZIP hint exists for this address.
    pub has_second_zip_hint: bool,
    /// The street line carried unit tokens worth stripping.
    pub has_unit: bool,
    /// Fallback provider configured and enabled for this request.
    pub fallback_enabled: bool,
}

/// Compute the next rung after an unsuccessful attempt.
///
/// Rules:
/// - Primary failures retry up to `max_retries` times; variant rungs never
///   retry.
/// - The second ZIP hint is tried only when the first yielded a
///   no-contacts response (a hint cannot fix a transport failure).
/// - Exactly one address-sanitized attempt precedes fallback, and only
///   when there was a unit to strip.
pub fn next_state(current: LadderState, outcome: OutcomeKind, ctx: &LadderContext) -> LadderState {
    debug_assert_ne!(outcome, OutcomeKind::Success, "success is terminal");

    match current {
        LadderState::Primary | LadderState::Retry(_) => {
            if outcome == OutcomeKind::Failure {
                let attempt = match current {
                    LadderState::Retry(n) => n,
                    _ => 0,
                };
                if attempt < ctx.max_retries {
                    return LadderState::Retry(attempt + 1);
                }
            }
            // Retries exhausted, or a no-contacts answer (retrying the
            // same query would buy nothing).
            after_primary(outcome, ctx)
        }
        LadderState::ZipHintAlternate => sanitized_or_later(ctx),
        LadderState::AddressSanitized => fallback_or_exhausted(ctx),
        LadderState::Fallback | LadderState::Exhausted => LadderState::Exhausted,
    }
}

fn after_primary(outcome: OutcomeKind, ctx: &LadderContext) -> LadderState {
    if outcome == OutcomeKind::NoContacts && ctx.has_second_zip_hint {
        return LadderState::ZipHintAlternate;
    }
    sanitized_or_later(ctx)
}

fn sanitized_or_later(ctx: &LadderContext) -> LadderState {
    if ctx.has_unit {
        return LadderState::AddressSanitized;
    }
    fallback_or_exhausted(ctx)
}

fn fallback_or_exhausted(ctx: &LadderContext) -> LadderState {
    if ctx.fallback_enabled {
        return LadderState::Fallback;
    }
    LadderState::Exhausted
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
