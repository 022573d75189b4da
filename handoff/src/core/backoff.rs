//! Timeout escalation for retried steps.

/// Doubling timeout with an upper cap.
///
/// Owned by a single driver invocation and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBackoff {
    current_secs: u64,
    cap_secs: u64,
    enabled: bool,
}

impl TimeoutBackoff {
    pub fn new(initial_secs: u64, cap_secs: u64, enabled: bool) -> Self {
        Self {
            current_secs: initial_secs,
            cap_secs,
            enabled,
        }
    }

    pub fn current_secs(&self) -> u64 {
        self.current_secs
    }

    /// Next timeout to try after a timeout outcome, or `None` when retries are
    /// disabled or the cap was already reached.
    pub fn escalate(&mut self) -> Option<u64> {
        if !self.enabled || self.current_secs >= self.cap_secs {
            return None;
        }
        self.current_secs = self.current_secs.saturating_mul(2).min(self.cap_secs);
        Some(self.current_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut backoff = TimeoutBackoff::new(180, 1200, true);
        let mut attempted = vec![backoff.current_secs()];
        while let Some(next) = backoff.escalate() {
            attempted.push(next);
        }
        assert_eq!(attempted, vec![180, 360, 720, 1200]);
    }

    #[test]
    fn disabled_never_escalates() {
        let mut backoff = TimeoutBackoff::new(180, 1200, false);
        assert_eq!(backoff.escalate(), None);
        assert_eq!(backoff.current_secs(), 180);
    }

    #[test]
    fn start_above_cap_does_not_escalate() {
        let mut backoff = TimeoutBackoff::new(1500, 1200, true);
        assert_eq!(backoff.escalate(), None);
    }
}
