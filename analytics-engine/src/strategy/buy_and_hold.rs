use std::collections::HashSet;

use common::{Bar, Signal};

use crate::indicators::IndicatorCache;

/// Buys every symbol on its first bar and never sells
#[derive(Debug, Clone, Default)]
pub struct BuyAndHold {
    entered: HashSet<String>,
}

impl BuyAndHold {
    pub fn new() -> Self {
        Self::default()
    }
}

impl super::Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn analyze(&mut self, bar: &Bar, _history: &[Bar], _cache: &mut IndicatorCache) -> Signal {
        if self.entered.insert(bar.symbol.clone()) {
            Signal::buy(1.0).with_reason("initial entry")
        } else {
            Signal::hold()
        }
    }
}
