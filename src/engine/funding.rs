//! Funding settlement for a single position.

use super::core::{PositionEngine, TradeAccounts};
use super::results::{EngineError, FundingOutcome};
use crate::events::{OperationKind, TradeRecord};

impl PositionEngine {
    /// Settle a position against its market's current funding index. Trades run
    /// this themselves; hosts call it directly to realize funding without trading.
    pub fn settle_funding(&self, accounts: TradeAccounts<'_>) -> Result<FundingOutcome, EngineError> {
        let mut working = self.load(&accounts)?;
        let settlement = working.settle_funding()?;

        let record = TradeRecord {
            kind: OperationKind::FundingSettlement,
            user: working.account.owner,
            market: working.market.id,
            size_delta: 0,
            price: 0,
            margin_delta: 0,
            realized_pnl: 0,
            funding_paid: settlement.payment,
            open_interest: working.market.open_interest,
        };
        if !settlement.is_noop() {
            tracing::info!(
                user = %record.user,
                market = %record.market,
                payment = %settlement.payment,
                collateral = settlement.new_collateral,
                "funding settled"
            );
        }

        working.commit(accounts);
        Ok(FundingOutcome { record, settlement })
    }
}
