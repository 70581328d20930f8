//! Order admission checks run before an order is persisted. Kept separate
//! from `Order::new`'s shape invariants (positive quantity, LIMIT/MARKET
//! price rules) so additional business rules land here without touching
//! the aggregate.

use rust_decimal::Decimal;

use super::errors::OrderError;

const MIN_QUANTITY: Decimal = Decimal::ZERO;
const MAX_SYMBOL_LEN: usize = 16;

pub fn validate_symbol(symbol: &str) -> Result<(), OrderError> {
    if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
        return Err(OrderError::Validation(format!("symbol must be 1-{MAX_SYMBOL_LEN} characters, got {symbol:?}")));
    }
    if !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        return Err(OrderError::Validation(format!("symbol contains invalid characters: {symbol:?}")));
    }
    Ok(())
}

pub fn validate_quantity(quantity: Decimal) -> Result<(), OrderError> {
    if quantity <= MIN_QUANTITY {
        return Err(OrderError::Validation(format!("quantity must be positive, got {quantity}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_empty_and_overlong_symbols() {
        assert!(validate_symbol("").is_err());
        assert!(validate_symbol(&"A".repeat(20)).is_err());
        assert!(validate_symbol("AAPL").is_ok());
        assert!(validate_symbol("BRK.B").is_ok());
    }

    #[test]
    fn rejects_non_positive_quantity() {
        assert!(validate_quantity(dec!(0)).is_err());
        assert!(validate_quantity(dec!(-1)).is_err());
        assert!(validate_quantity(dec!(1)).is_ok());
    }
}
