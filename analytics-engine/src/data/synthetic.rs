use chrono::{DateTime, Duration, TimeZone, Utc};
use common::Bar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Fixed origin so generated series do not depend on the wall clock
fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Generate a seeded random-walk daily series for `symbol`
pub fn generate_synthetic_bars(
    symbol: &str,
    days: usize,
    initial_price: f64,
    seed: u64,
) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::with_capacity(days);

    // Crypto-like daily parameters
    let daily_volatility = 0.03;
    let drift = 0.0005;

    let start_date = origin();
    let mut price = initial_price;

    for i in 0..days {
        let date = start_date + Duration::days(i as i64);

        let z: f64 = rng.sample(StandardNormal);
        let daily_return = drift + daily_volatility * z;
        let new_price = (price * (1.0 + daily_return)).max(0.01);

        let intraday_range = price * rng.gen_range(0.01..0.04);
        let open = price + rng.gen_range(-intraday_range / 2.0..intraday_range / 2.0);
        let close = new_price;

        let high = open.max(close) + rng.gen_range(0.0..intraday_range / 2.0);
        let low = (open.min(close) - rng.gen_range(0.0..intraday_range / 2.0)).max(0.0);

        // Higher volume on volatile days
        let base_volume = 1_000_000.0;
        let volume = base_volume * (1.0 + daily_return.abs() * 10.0) * rng.gen_range(0.8..1.2);

        bars.push(Bar::new(symbol, date, open, high, low, close, volume));
        price = new_price;
    }

    bars
}

/// Build daily bars from a close path. Open equals the previous close (the
/// first open equals the first close), high/low bracket open and close.
pub fn bars_from_closes(symbol: &str, closes: &[f64]) -> Vec<Bar> {
    let start_date = origin();
    let mut prev = closes.first().copied().unwrap_or(0.0);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar::new(
                symbol,
                start_date + Duration::days(i as i64),
                open,
                open.max(close),
                open.min(close),
                close,
                1_000_000.0,
            )
        })
        .collect()
}
