//! Position accounting: the weighted-entry and realized-P&L math behind
//! the Position Ledger. Pure functions here are exercised directly by
//! tests; `db::positions` wraps them with SQLite persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub amount: f64,
    pub price: f64,
    pub order_ref: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub amount: f64,
    pub price: f64,
    pub pnl: f64,
    pub order_ref: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub user_id: String,
    pub exchange_id: String,
    pub token: String,
    pub amount: f64,
    pub entry_price: f64,
    pub total_invested: f64,
    pub purchases: Vec<Purchase>,
    pub sales: Vec<Sale>,
    pub is_active: bool,
}

impl Position {
    pub fn empty(user_id: impl Into<String>, exchange_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            exchange_id: exchange_id.into(),
            token: token.into(),
            amount: 0.0,
            entry_price: 0.0,
            total_invested: 0.0,
            purchases: Vec::new(),
            sales: Vec::new(),
            is_active: false,
        }
    }

    /// Applies a buy: recomputes the weighted-average entry price over the
    /// old and new amounts, per the weighted-entry law.
    pub fn apply_buy(&mut self, amount: f64, price: f64, order_ref: impl Into<String>, at: DateTime<Utc>) {
        let old_amount = self.amount;
        let old_entry = self.entry_price;
        let new_amount = old_amount + amount;

        self.entry_price = if new_amount > 0.0 {
            (old_entry * old_amount + price * amount) / new_amount
        } else {
            price
        };
        self.amount = new_amount;
        self.total_invested += amount * price;
        self.is_active = true;
        self.purchases.push(Purchase {
            amount,
            price,
            order_ref: order_ref.into(),
            at,
        });
    }

    /// Applies a sell. Returns the realized P&L, or an error if the sale
    /// would oversell the position.
    pub fn apply_sell(
        &mut self,
        amount: f64,
        price: f64,
        order_ref: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<f64, crate::errors::LedgerError> {
        if amount > self.amount + 1e-9 {
            return Err(crate::errors::LedgerError::InsufficientPosition {
                available: self.amount,
                requested: amount,
            });
        }

        let pnl = (price - self.entry_price) * amount;
        self.amount = (self.amount - amount).max(0.0);
        if self.amount <= 1e-9 {
            self.amount = 0.0;
            self.is_active = false;
        }
        self.sales.push(Sale {
            amount,
            price,
            pnl,
            order_ref: order_ref.into(),
            at,
        });
        Ok(pnl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn weighted_entry_after_two_buys() {
        let mut pos = Position::empty("u1", "binance", "BTC");
        pos.apply_buy(0.3, 45000.0, "order-1", Utc::now());
        pos.apply_buy(0.2, 46000.0, "order-2", Utc::now());

        assert!((pos.entry_price - 45400.0).abs() < 1e-6);
        assert!((pos.amount - 0.5).abs() < 1e-9);
        assert!((pos.total_invested - 22700.0).abs() < 1e-6);
    }

    #[test]
    fn sell_preserves_entry_price_until_fully_closed() {
        let mut pos = Position::empty("u1", "binance", "BTC");
        pos.apply_buy(1.0, 100.0, "buy-1", Utc::now());

        let pnl = pos.apply_sell(0.4, 120.0, "sell-1", Utc::now()).unwrap();
        assert!((pnl - 8.0).abs() < 1e-9);
        assert!((pos.entry_price - 100.0).abs() < 1e-9);
        assert!(pos.is_active);

        let pnl2 = pos.apply_sell(0.6, 130.0, "sell-2", Utc::now()).unwrap();
        assert!((pnl2 - 18.0).abs() < 1e-9);
        assert_eq!(pos.amount, 0.0);
        assert!(!pos.is_active);
    }

    #[test]
    fn oversell_is_rejected() {
        let mut pos = Position::empty("u1", "binance", "BTC");
        pos.apply_buy(1.0, 100.0, "buy-1", Utc::now());
        let result = pos.apply_sell(1.5, 120.0, "sell-1", Utc::now());
        assert!(result.is_err());
    }
}
