//! Trending score over windowed listen counts, likes and freshness.
//!
//! The long window (7 days) contains the short window (24 hours), so a listen
//! from the last day is weighted by both `W_SHORT` and `W_LONG`. Charts have
//! always been ranked with that overlap; removing it would reorder them.

use chrono::Duration;

use crate::Signals;

pub const W_SHORT: f64 = 5.0;
pub const W_LONG: f64 = 2.0;
pub const W_LIKE: f64 = 1.0;
pub const W_FRESH: f64 = 0.5;

/// Items at most this old (in days) receive the freshness bonus.
pub const FRESH_DAYS: f64 = 7.0;
pub const FRESH_BONUS: f64 = 100.0;

pub fn short_window() -> Duration { Duration::hours(24) }
pub fn long_window() -> Duration { Duration::days(7) }

/// Deterministic and total over non-negative inputs.
pub fn trending_score(s: &Signals) -> f64 {
    let fresh = if s.age_days <= FRESH_DAYS { FRESH_BONUS } else { 0.0 };
    s.listens_short_window as f64 * W_SHORT
        + s.listens_long_window as f64 * W_LONG
        + s.total_likes as f64 * W_LIKE
        + fresh * W_FRESH
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(short: u64, long: u64, likes: u64, age: f64) -> Signals {
        Signals { listens_short_window: short, listens_long_window: long, total_likes: likes, age_days: age }
    }

    #[test]
    fn zero_signals_old_item_scores_zero() {
        assert_eq!(trending_score(&sig(0, 0, 0, 30.0)), 0.0);
    }

    #[test]
    fn weights_apply_per_input() {
        assert_eq!(trending_score(&sig(1, 0, 0, 30.0)), 5.0);
        assert_eq!(trending_score(&sig(0, 1, 0, 30.0)), 2.0);
        assert_eq!(trending_score(&sig(0, 0, 1, 30.0)), 1.0);
        assert_eq!(trending_score(&sig(0, 0, 0, 0.0)), 50.0);
    }

    #[test]
    fn recent_listen_counts_in_both_windows() {
        // One listen an hour ago shows up in both windows.
        assert_eq!(trending_score(&sig(1, 1, 0, 30.0)), 7.0);
    }

    #[test]
    fn fresh_bonus_boundary_is_inclusive() {
        assert_eq!(trending_score(&sig(0, 0, 0, 7.0)), 50.0);
        assert_eq!(trending_score(&sig(0, 0, 0, 7.0001)), 0.0);
    }

    #[test]
    fn strictly_increasing_in_each_count() {
        let bases = [sig(0, 0, 0, 0.0), sig(3, 10, 4, 2.5), sig(100, 250, 9, 40.0)];
        for b in bases.iter() {
            let s0 = trending_score(b);
            assert!(s0 >= 0.0);
            let mut up = *b; up.listens_short_window += 1;
            assert!(trending_score(&up) > s0);
            let mut up = *b; up.listens_long_window += 1;
            assert!(trending_score(&up) > s0);
            let mut up = *b; up.total_likes += 1;
            assert!(trending_score(&up) > s0);
        }
    }

    #[test]
    fn windows() {
        assert_eq!(short_window().num_hours(), 24);
        assert_eq!(long_window().num_days(), 7);
    }
}
