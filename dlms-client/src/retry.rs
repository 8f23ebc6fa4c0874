//! Bounded resend counter of one exchange

use dlms_core::{DlmsError, DlmsResult};

/// Resends allowed after the first send of a request
pub const MAX_RESENDS: u32 = 3;

/// Counter of resends left for a single request
///
/// The first send is attempt 0 and does not consume the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    used: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Use one resend
    ///
    /// # Returns
    ///
    /// The number of the resend about to happen (1-based), or
    /// `TransportTimeout` once every resend has been used.
    pub fn consume(&mut self) -> DlmsResult<u32> {
        if self.used >= self.max {
            return Err(DlmsError::TransportTimeout);
        }
        self.used += 1;
        Ok(self.used)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(MAX_RESENDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_allows_three_resends() {
        let mut budget = RetryBudget::default();
        assert_eq!(budget.consume().unwrap(), 1);
        assert_eq!(budget.consume().unwrap(), 2);
        assert_eq!(budget.consume().unwrap(), 3);
        assert!(matches!(budget.consume(), Err(DlmsError::TransportTimeout)));
        assert_eq!(budget.used(), 3);
    }

    #[test]
    fn test_zero_budget_fails_immediately() {
        let mut budget = RetryBudget::new(0);
        assert!(budget.consume().is_err());
    }
}
