// crates/tessera-escrow/src/token.rs
//
// In-memory token ledger implementing `TokenCustody`.
//
// Balances are integer base units keyed by address. `mint_to` is the only
// way tokens enter circulation; `burn` is the only way they leave it, so
// `total_supply == sum(balances)` at all times.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tessera_core::{Address, Amount, TesseraError, TokenCustody};

/// Reference token bank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBank {
    balances: BTreeMap<Address, Amount>,
    total_supply: Amount,
    burned: Amount,
}

impl TokenBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, holder: &Address) -> Amount {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Total ever burned.
    pub fn burned(&self) -> Amount {
        self.burned
    }

    pub fn holders(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    /// Create `value` new tokens for `holder`.
    ///
    /// # Errors
    /// `Custody` if the holder is the zero address or the supply would
    /// overflow.
    pub fn mint_to(&mut self, holder: &Address, value: Amount) -> Result<(), TesseraError> {
        ensure_recipient(holder)?;
        let total_supply = self.total_supply.checked_add(value).ok_or_else(|| {
            TesseraError::Custody("Token supply overflow".to_string())
        })?;
        self.total_supply = total_supply;
        *self.balances.entry(*holder).or_insert(0) += value;
        Ok(())
    }

    fn debit(&mut self, holder: &Address, value: Amount) -> Result<(), TesseraError> {
        let balance = self.balance_of(holder);
        if balance < value {
            return Err(TesseraError::InsufficientBalance(format!(
                "{} holds {} but {} is required",
                holder.short(),
                balance,
                value
            )));
        }
        if balance == value {
            self.balances.remove(holder);
        } else {
            self.balances.insert(*holder, balance - value);
        }
        Ok(())
    }

    fn credit(&mut self, holder: &Address, value: Amount) {
        // Cannot overflow: every balance is bounded by total_supply.
        *self.balances.entry(*holder).or_insert(0) += value;
    }

    fn move_tokens(&mut self, from: &Address, to: &Address, value: Amount) -> Result<(), TesseraError> {
        if value == 0 {
            return Ok(());
        }
        ensure_recipient(to)?;
        self.debit(from, value)?;
        self.credit(to, value);
        Ok(())
    }
}

/// Tokens sent to the zero address would be unrecoverable.
fn ensure_recipient(to: &Address) -> Result<(), TesseraError> {
    if to.is_zero() {
        return Err(TesseraError::Custody(
            "Cannot credit the zero address".to_string(),
        ));
    }
    Ok(())
}

impl TokenCustody for TokenBank {
    fn transfer_from(&mut self, from: &Address, to: &Address, value: Amount) -> Result<(), TesseraError> {
        self.move_tokens(from, to, value)
    }

    fn transfer(&mut self, from: &Address, to: &Address, value: Amount) -> Result<(), TesseraError> {
        self.move_tokens(from, to, value)
    }

    fn burn(&mut self, holder: &Address, value: Amount) -> Result<(), TesseraError> {
        if value == 0 {
            return Ok(());
        }
        self.debit(holder, value)?;
        self.total_supply -= value;
        self.burned = self.burned.saturating_add(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    #[test]
    fn test_mint_and_balance() {
        let mut bank = TokenBank::new();
        bank.mint_to(&addr("alice"), 500).unwrap();
        bank.mint_to(&addr("alice"), 250).unwrap();
        assert_eq!(bank.balance_of(&addr("alice")), 750);
        assert_eq!(bank.balance_of(&addr("bob")), 0);
        assert_eq!(bank.total_supply(), 750);
    }

    #[test]
    fn test_transfer_moves_tokens() {
        let mut bank = TokenBank::new();
        bank.mint_to(&addr("alice"), 100).unwrap();
        bank.transfer_from(&addr("alice"), &addr("escrow"), 60).unwrap();
        assert_eq!(bank.balance_of(&addr("alice")), 40);
        assert_eq!(bank.balance_of(&addr("escrow")), 60);
        assert_eq!(bank.total_supply(), 100);
    }

    #[test]
    fn test_insufficient_balance_changes_nothing() {
        let mut bank = TokenBank::new();
        bank.mint_to(&addr("alice"), 10).unwrap();
        let err = bank.transfer(&addr("alice"), &addr("bob"), 11).unwrap_err();
        assert!(matches!(err, TesseraError::InsufficientBalance(_)));
        assert_eq!(bank.balance_of(&addr("alice")), 10);
        assert_eq!(bank.balance_of(&addr("bob")), 0);
    }

    #[test]
    fn test_burn_reduces_supply() {
        let mut bank = TokenBank::new();
        bank.mint_to(&addr("escrow"), 100).unwrap();
        bank.burn(&addr("escrow"), 30).unwrap();
        assert_eq!(bank.total_supply(), 70);
        assert_eq!(bank.burned(), 30);
        assert!(bank.burn(&addr("escrow"), 71).is_err());
    }

    #[test]
    fn test_supply_overflow() {
        let mut bank = TokenBank::new();
        bank.mint_to(&addr("alice"), Amount::MAX).unwrap();
        assert!(matches!(
            bank.mint_to(&addr("bob"), 1),
            Err(TesseraError::Custody(_))
        ));
    }

    #[test]
    fn test_zero_address_is_refused() {
        let mut bank = TokenBank::new();
        bank.mint_to(&addr("alice"), 10).unwrap();
        assert!(matches!(
            bank.transfer(&addr("alice"), &Address::ZERO, 5),
            Err(TesseraError::Custody(_))
        ));
        assert!(matches!(
            bank.mint_to(&Address::ZERO, 5),
            Err(TesseraError::Custody(_))
        ));
        assert_eq!(bank.balance_of(&addr("alice")), 10);
        assert_eq!(bank.total_supply(), 10);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut bank = TokenBank::new();
        bank.mint_to(&addr("alice"), 42).unwrap();
        let json = serde_json::to_string(&bank).unwrap();
        let back: TokenBank = serde_json::from_str(&json).unwrap();
        assert_eq!(bank, back);
    }
}
