//! Run-scoped indicator cache
//!
//! One cache is created per backtest run and handed to the strategy by
//! reference. Each (symbol, indicator) entry keeps incremental state plus the
//! number of history bars already folded in, so a strategy asking for the same
//! indicator on every bar pays O(1) per bar instead of recomputing the window.

use std::collections::HashMap;

use common::Bar;

use super::{IndicatorKind, IndicatorState};

#[derive(Debug, Clone)]
struct Entry {
    consumed: usize,
    state: IndicatorState,
}

#[derive(Debug, Default)]
pub struct IndicatorCache {
    entries: HashMap<(String, IndicatorKind), Entry>,
    hits: usize,
    rebuilds: usize,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indicator value after folding `history` closes and then the current bar's close.
    ///
    /// `history` must be the symbol's bars before `bar`; the current bar is
    /// applied to a scratch copy so the stored state only ever contains
    /// completed history.
    pub fn value(
        &mut self,
        symbol: &str,
        kind: IndicatorKind,
        history: &[Bar],
        bar: &Bar,
    ) -> Option<f64> {
        let mut scratch = self.fold_history(symbol, kind, history).clone();
        scratch.update(bar.close);
        scratch.value()
    }

    /// Indicator value over `history` only (as of the previous bar)
    pub fn previous_value(
        &mut self,
        symbol: &str,
        kind: IndicatorKind,
        history: &[Bar],
    ) -> Option<f64> {
        self.fold_history(symbol, kind, history).value()
    }

    fn fold_history(
        &mut self,
        symbol: &str,
        kind: IndicatorKind,
        history: &[Bar],
    ) -> &IndicatorState {
        let key = (symbol.to_string(), kind);
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            consumed: 0,
            state: IndicatorState::new(kind),
        });

        if history.len() < entry.consumed {
            // History shrank: not the same run's growing prefix, start over
            entry.consumed = 0;
            entry.state = IndicatorState::new(kind);
            self.rebuilds += 1;
        } else if history.len() == entry.consumed {
            self.hits += 1;
        }

        for bar in &history[entry.consumed..] {
            entry.state.update(bar.close);
        }
        entry.consumed = history.len();
        &entry.state
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups served without folding any new bar
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }
}
