// Precision Entry Ladder
// Staged limit levels around the primary entry

use common::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Primary entry plus optional deeper fills
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecisionEntries {
    pub primary: Decimal,
    pub secondary: Option<Decimal>,
    pub tertiary: Option<Decimal>,
}

impl PrecisionEntries {
    /// Default ladder: 0.5% steps
    pub fn ladder(base_price: Decimal, direction: Option<Direction>) -> Self {
        Self::ladder_with_step(base_price, direction, Decimal::new(5, 3))
    }

    /// Longs step down (cheaper fills), shorts step up, no direction means primary only
    pub fn ladder_with_step(base_price: Decimal, direction: Option<Direction>, step: Decimal) -> Self {
        let two = Decimal::TWO;
        match direction {
            Some(Direction::Long) => Self {
                primary: base_price,
                secondary: Some(base_price * (Decimal::ONE - step)),
                tertiary: Some(base_price * (Decimal::ONE - two * step)),
            },
            Some(Direction::Short) => Self {
                primary: base_price,
                secondary: Some(base_price * (Decimal::ONE + step)),
                tertiary: Some(base_price * (Decimal::ONE + two * step)),
            },
            None => Self {
                primary: base_price,
                secondary: None,
                tertiary: None,
            },
        }
    }

    pub fn levels(&self) -> Vec<Decimal> {
        std::iter::once(self.primary)
            .chain(self.secondary)
            .chain(self.tertiary)
            .collect()
    }
}
