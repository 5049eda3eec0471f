//! Order state machine (§4.4, §8).
//!
//! State transitions are feed-driven, never caller-driven: placement only
//! seeds `idle -> placing`; everything past that comes from the exchange
//! feed. This is a runtime transition table rather than the typestate
//! pattern — the feed can deliver any terminal state from `placing` or
//! `active` depending on race outcomes, so the state has to be a plain enum
//! the router can transition dynamically, with validity checked at the edge
//! rather than encoded in the type.
//!
//! ```text
//! idle       --place()-->  placing
//! placing    --feed:NEW--> active
//! placing    --feed------>  filled | cancelled | failed
//! active     --feed------>  cancelling | filled | cancelled | expired
//! cancelling --feed------>  cancelled | filled | expired
//! ```
//! `filled, cancelled, expired, failed` are terminal — no transitions out,
//! including into themselves (`transition(terminal, _)` always rejects).

use super::types::OrderStatus;

/// Order stuck in `placing` for longer than this is swept to `failed`.
pub const STALE_PLACING_MS: u64 = 30_000;
/// Terminal orders are unregistered this long after entering a terminal state.
pub const TERMINAL_RETENTION_MS: u64 = 5 * 60 * 1000;

fn allowed_targets(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        Idle => &[Placing],
        Placing => &[Active, Filled, Cancelled, Failed],
        Active => &[Cancelling, Filled, Cancelled, Expired],
        Cancelling => &[Cancelled, Filled, Expired],
        Filled | Cancelled | Expired | Failed => &[],
    }
}

/// Returns true iff `from -> to` is a valid edge in the transition table.
/// Does not mutate anything — callers apply the transition themselves on
/// `true`. `transition(src, src)` and any edge out of a terminal state
/// always return false (§8).
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_targets(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn idle_only_advances_to_placing() {
        assert!(is_valid_transition(Idle, Placing));
        assert!(!is_valid_transition(Idle, Active));
        assert!(!is_valid_transition(Idle, Filled));
    }

    #[test]
    fn placing_can_reach_any_of_four_states() {
        assert!(is_valid_transition(Placing, Active));
        assert!(is_valid_transition(Placing, Filled));
        assert!(is_valid_transition(Placing, Cancelled));
        assert!(is_valid_transition(Placing, Failed));
        assert!(!is_valid_transition(Placing, Expired));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [Filled, Cancelled, Expired, Failed] {
            for target in [Idle, Placing, Active, Cancelling, Filled, Cancelled, Expired, Failed] {
                assert!(!is_valid_transition(terminal, target), "{terminal:?} -> {target:?} should be rejected");
            }
        }
    }

    #[test]
    fn self_transition_always_rejected() {
        for s in [Idle, Placing, Active, Cancelling, Filled, Cancelled, Expired, Failed] {
            assert!(!is_valid_transition(s, s));
        }
    }

    #[test]
    fn placing_to_filled_handles_the_fast_fill_race() {
        // A `filled` feed event can arrive before `NEW` when the REST ack
        // races the feed (§5 ordering guarantee).
        assert!(is_valid_transition(Placing, Filled));
    }
}
