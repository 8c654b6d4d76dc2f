use core::time::Duration;
use rand::Rng;

/// How many replies a worker sends per request, and how long it waits before
/// each one. Both are drawn uniformly from inclusive ranges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyPolicy {
    pub min_replies: usize,
    pub max_replies: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            min_replies: 1,
            max_replies: 1,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl ReplyPolicy {
    /// Exactly `replies` replies, each after exactly `delay`.
    pub const fn fixed(replies: usize, delay: Duration) -> Self {
        Self {
            min_replies: replies,
            max_replies: replies,
            min_delay: delay,
            max_delay: delay,
        }
    }

    /// A reversed range collapses to its lower bound.
    pub fn sample_replies<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        if self.max_replies <= self.min_replies {
            self.min_replies
        } else {
            rng.random_range(self.min_replies..=self.max_replies)
        }
    }

    /// Millisecond resolution.
    pub fn sample_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let lo = u64::try_from(self.min_delay.as_millis()).unwrap_or(u64::MAX);
        let hi = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        if hi <= lo {
            self.min_delay
        } else {
            Duration::from_millis(rng.random_range(lo..=hi))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn samples_stay_in_range() {
        let policy = ReplyPolicy {
            min_replies: 0,
            max_replies: 5,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1000),
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            assert!(policy.sample_replies(&mut rng) <= 5);
            let delay = policy.sample_delay(&mut rng);
            assert!(delay >= policy.min_delay && delay <= policy.max_delay);
        }
    }

    #[test]
    fn fixed_policy_is_deterministic() {
        let policy = ReplyPolicy::fixed(3, Duration::from_millis(5));
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(policy.sample_replies(&mut rng), 3);
        assert_eq!(policy.sample_delay(&mut rng), Duration::from_millis(5));
    }

    #[test]
    fn default_is_one_reply_within_a_second() {
        let policy = ReplyPolicy::default();
        assert_eq!((policy.min_replies, policy.max_replies), (1, 1));
        assert_eq!(policy.max_delay, Duration::from_secs(1));
    }
}
