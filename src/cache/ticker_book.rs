//! 티커 캐시
//!
//! 종목당 한 줄. last/open/high/low/volume 중 하나라도 달라지면 갱신으로
//! 판정하며 트림은 없습니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cache::book::{DiffPolicy, SnapshotBook};

/// 티커 한 줄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerEntry {
    pub market: String,
    pub last: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
}

pub fn new_ticker_book() -> SnapshotBook<TickerEntry> {
    SnapshotBook::new(
        "ticker_book",
        DiffPolicy::ALL,
        Box::new(|ticker: &TickerEntry| ticker.market.clone()),
        Box::new(|a: &TickerEntry, b: &TickerEntry| {
            a.last == b.last
                && a.open == b.open
                && a.high == b.high
                && a.low == b.low
                && a.volume == b.volume
        }),
        Box::new(|_key, tickers| tickers),
    )
}
