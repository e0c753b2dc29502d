//! User ledger.
//!
//! One pool of free collateral per user, shared by all of the user's markets,
//! plus a count of open positions. Collateral posted to a position is moved
//! out of `free_collateral` by the engine and returned on close.

use crate::types::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub owner: UserId,
    pub free_collateral: u64,
    pub open_position_count: u8,
}

impl UserAccount {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            free_collateral: 0,
            open_position_count: 0,
        }
    }

    /// Credit a deposit that the custody vault has already received.
    pub fn deposit(&mut self, amount: u64) -> Result<u64, AccountError> {
        if amount == 0 {
            return Err(AccountError::ZeroAmount);
        }
        self.free_collateral = self
            .free_collateral
            .checked_add(amount)
            .ok_or(AccountError::BalanceOverflow)?;
        Ok(self.free_collateral)
    }

    // only from a flat account. the vault transfer itself happens outside.
    pub fn withdraw(&mut self, amount: u64) -> Result<u64, AccountError> {
        if amount == 0 {
            return Err(AccountError::ZeroAmount);
        }
        if self.open_position_count > 0 {
            return Err(AccountError::PositionsOpen(self.open_position_count));
        }
        if amount > self.free_collateral {
            return Err(AccountError::InsufficientCollateral {
                requested: amount,
                available: self.free_collateral,
            });
        }
        self.free_collateral -= amount;
        Ok(self.free_collateral)
    }

    pub fn has_open_positions(&self) -> bool {
        self.open_position_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("insufficient free collateral: requested {requested}, available {available}")]
    InsufficientCollateral { requested: u64, available: u64 },

    #[error("{0} positions still open")]
    PositionsOpen(u8),

    #[error("balance overflow")]
    BalanceOverflow,
}
