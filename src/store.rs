//! In-memory finance records (expenses, income, debts) and wallets.
//!
//! These stand in for the document store the rest of the system would use;
//! they are keyed by user id and live for the process lifetime only.

use std::collections::HashMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub amount: f64,
    pub category: String,
    /// Unix seconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Monthly,
    Weekly,
    OneTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeSource {
    pub name: String,
    pub monthly_amount: f64,
    pub frequency: Frequency,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debt {
    pub creditor: String,
    pub monthly_payment: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Per-user expense, income and debt records.
#[derive(Debug, Default)]
pub struct RecordStore {
    expenses: HashMap<String, Vec<Expense>>,
    incomes: HashMap<String, Vec<IncomeSource>>,
    debts: HashMap<String, Vec<Debt>>,
}

impl RecordStore {
    pub fn add_expense(&mut self, user_id: &str, expense: Expense) {
        self.expenses
            .entry(user_id.to_string())
            .or_default()
            .push(expense);
    }

    pub fn expenses_of(&self, user_id: &str) -> &[Expense] {
        self.expenses
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn add_income(&mut self, user_id: &str, income: IncomeSource) {
        self.incomes
            .entry(user_id.to_string())
            .or_default()
            .push(income);
    }

    pub fn incomes_of(&self, user_id: &str) -> &[IncomeSource] {
        self.incomes.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_debt(&mut self, user_id: &str, debt: Debt) {
        self.debts
            .entry(user_id.to_string())
            .or_default()
            .push(debt);
    }

    pub fn debts_of(&self, user_id: &str) -> &[Debt] {
        self.debts.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("wallet already exists for user {0}")]
    AlreadyExists(String),

    #[error("wallet {0} not found")]
    NotFound(String),

    #[error("insufficient balance: have {available}, trying to send {requested}")]
    InsufficientBalance { available: f64, requested: f64 },

    #[error("amount must be greater than zero")]
    NonPositiveAmount,
}

/// A toy wallet. Addresses are random, balances are mock money; this is a
/// demonstration transfer system, not funds custody.
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    pub user_id: String,
    pub address: String,
    pub balance: f64,
}

/// Starting balance credited to every new wallet.
pub const INITIAL_BALANCE: f64 = 1000.0;

fn new_address() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// Wallets addressed by their hex address, one per user.
#[derive(Debug, Default)]
pub struct WalletStore {
    by_address: HashMap<String, Wallet>,
    address_of_user: HashMap<String, String>,
}

impl WalletStore {
    /// Create a wallet for `user_id` with the initial mock balance.
    pub fn create(&mut self, user_id: &str) -> Result<&Wallet, WalletError> {
        if self.address_of_user.contains_key(user_id) {
            return Err(WalletError::AlreadyExists(user_id.to_string()));
        }
        let address = new_address();
        let wallet = Wallet {
            user_id: user_id.to_string(),
            address: address.clone(),
            balance: INITIAL_BALANCE,
        };
        self.address_of_user
            .insert(user_id.to_string(), address.clone());
        self.by_address.insert(address.clone(), wallet);
        Ok(&self.by_address[&address])
    }

    pub fn get(&self, address: &str) -> Option<&Wallet> {
        self.by_address.get(address)
    }

    pub fn for_user(&self, user_id: &str) -> Option<&Wallet> {
        self.address_of_user
            .get(user_id)
            .and_then(|addr| self.by_address.get(addr))
    }

    /// Move `amount` between two existing wallets, enforcing a positive
    /// amount and a sufficient source balance. This is where value
    /// conservation is checked; the ledger itself records anything.
    /// Returns the new (from, to) balances.
    pub fn transfer(
        &mut self,
        from_address: &str,
        to_address: &str,
        amount: f64,
    ) -> Result<(f64, f64), WalletError> {
        if amount <= 0.0 {
            return Err(WalletError::NonPositiveAmount);
        }

        let available = self
            .by_address
            .get(from_address)
            .ok_or_else(|| WalletError::NotFound(from_address.to_string()))?
            .balance;
        if available < amount {
            return Err(WalletError::InsufficientBalance {
                available,
                requested: amount,
            });
        }
        if !self.by_address.contains_key(to_address) {
            return Err(WalletError::NotFound(to_address.to_string()));
        }

        let from_balance = {
            let w = self.by_address.get_mut(from_address).expect("checked above");
            w.balance -= amount;
            w.balance
        };
        let to_balance = {
            let w = self.by_address.get_mut(to_address).expect("checked above");
            w.balance += amount;
            w.balance
        };
        Ok((from_balance, to_balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_wallet_per_user() {
        let mut wallets = WalletStore::default();
        let address = wallets.create("u1").unwrap().address.clone();
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
        assert_eq!(wallets.for_user("u1").unwrap().balance, INITIAL_BALANCE);

        assert!(matches!(
            wallets.create("u1"),
            Err(WalletError::AlreadyExists(_))
        ));
    }

    #[test]
    fn transfer_moves_balance_exactly() {
        let mut wallets = WalletStore::default();
        let a = wallets.create("u1").unwrap().address.clone();
        let b = wallets.create("u2").unwrap().address.clone();

        let (from_balance, to_balance) = wallets.transfer(&a, &b, 250.0).unwrap();
        assert_eq!(from_balance, 750.0);
        assert_eq!(to_balance, 1250.0);
        assert_eq!(from_balance + to_balance, 2.0 * INITIAL_BALANCE);
    }

    #[test]
    fn transfer_rejects_bad_requests() {
        let mut wallets = WalletStore::default();
        let a = wallets.create("u1").unwrap().address.clone();
        let b = wallets.create("u2").unwrap().address.clone();

        assert!(matches!(
            wallets.transfer(&a, &b, 0.0),
            Err(WalletError::NonPositiveAmount)
        ));
        assert!(matches!(
            wallets.transfer(&a, "0xmissing", 10.0),
            Err(WalletError::NotFound(_))
        ));
        assert!(matches!(
            wallets.transfer(&a, &b, INITIAL_BALANCE + 1.0),
            Err(WalletError::InsufficientBalance { .. })
        ));
        // Failed attempts must not move money.
        assert_eq!(wallets.get(&a).unwrap().balance, INITIAL_BALANCE);
        assert_eq!(wallets.get(&b).unwrap().balance, INITIAL_BALANCE);
    }

    #[test]
    fn record_store_is_per_user() {
        let mut records = RecordStore::default();
        records.add_expense(
            "u1",
            Expense {
                amount: 12.5,
                category: "food".to_string(),
                timestamp: 1_700_000_000,
            },
        );
        assert_eq!(records.expenses_of("u1").len(), 1);
        assert!(records.expenses_of("u2").is_empty());
    }
}
