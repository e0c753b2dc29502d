// 11.0: insurance fund. topped up by the host, drawn down whenever a close,
// liquidation or funding settlement leaves a loss nobody paid.

use crate::math::MathError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceFund {
    pub balance: u64,
    pub total_deposits: u128,
    pub total_payouts: u128,
}

impl InsuranceFund {
    pub fn new(initial_balance: u64) -> Self {
        Self {
            balance: initial_balance,
            total_deposits: initial_balance as u128,
            total_payouts: 0,
        }
    }

    pub fn deposit(&mut self, amount: u64) -> Result<u64, MathError> {
        self.balance = self.balance.checked_add(amount).ok_or(MathError::Overflow)?;
        self.total_deposits += amount as u128;
        Ok(self.balance)
    }

    /// Pays as much of `amount` as the balance allows and returns that part.
    pub fn cover_bad_debt(&mut self, amount: u64) -> u64 {
        let covered = amount.min(self.balance);
        self.balance -= covered;
        self.total_payouts += covered as u128;
        covered
    }
}
