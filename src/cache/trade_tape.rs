//! 체결 테이프 캐시
//!
//! 종목별 최근 체결 목록. 최신 500건만 남기고, 방향 태그가 없는 항목은
//! 바로 다음(더 오래된) 체결 가격과 비교해 채웁니다. 같으면 "up"입니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cache::book::{DiffPolicy, SnapshotBook};

/// 보존 건수
pub const TAPE_LIMIT: usize = 500;

/// 체결 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

/// 테이프 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapeEntry {
    pub id: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub taken_at: i64,
    pub trend: Option<Trend>,
}

pub fn new_trade_tape() -> SnapshotBook<TapeEntry> {
    SnapshotBook::new(
        "trade_tape",
        // 테이프는 추가만 의미가 있음
        DiffPolicy { add: true, remove: false, update: false },
        Box::new(|trade: &TapeEntry| trade.id.clone()),
        // 체결은 불변이므로 같은 id면 변경 없음으로 간주
        Box::new(|a: &TapeEntry, b: &TapeEntry| a.id == b.id),
        Box::new(|_key, trades| trim_tape(trades)),
    )
}

fn trim_tape(mut trades: Vec<TapeEntry>) -> Vec<TapeEntry> {
    // 최신순: 체결 시각 내림차순, 동시각이면 id 내림차순
    trades.sort_by(|a, b| b.taken_at.cmp(&a.taken_at).then(b.id.cmp(&a.id)));
    trades.truncate(TAPE_LIMIT);

    // 방향 역채움: 다음(더 오래된) 체결 대비 가격 비교, 같으면 up
    for i in 0..trades.len() {
        if trades[i].trend.is_some() {
            continue;
        }
        let trend = match trades.get(i + 1) {
            Some(older) if trades[i].price < older.price => Trend::Down,
            _ => Trend::Up,
        };
        trades[i].trend = Some(trend);
    }

    trades
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(id: &str, price: Decimal, taken_at: i64) -> TapeEntry {
        TapeEntry {
            id: id.to_string(),
            price,
            volume: dec!(0.01),
            taken_at,
            trend: None,
        }
    }

    #[test]
    fn test_trim_keeps_newest_500() {
        let mut tape = new_trade_tape();

        let trades: Vec<_> = (0..600)
            .map(|i| entry(&format!("t{:04}", i), dec!(20000), i))
            .collect();
        assert!(tape.update_all("BTC-USDT", trades));

        let snapshot = tape.snapshot("BTC-USDT");
        assert_eq!(snapshot.len(), TAPE_LIMIT);
        assert_eq!(snapshot[0].id, "t0599");
        assert_eq!(snapshot[499].id, "t0100");
    }

    #[test]
    fn test_trend_backfill() {
        let mut tape = new_trade_tape();
        tape.update_all(
            "BTC-USDT",
            vec![
                entry("t1", dec!(20000), 1),
                entry("t2", dec!(20010), 2), // 이전보다 상승 → up
                entry("t3", dec!(20005), 3), // 이전보다 하락 → down
                entry("t4", dec!(20005), 4), // 동일 가격 → up
            ],
        );

        let snapshot = tape.snapshot("BTC-USDT");
        // 최신순: t4, t3, t2, t1
        assert_eq!(snapshot[0].trend, Some(Trend::Up));
        assert_eq!(snapshot[1].trend, Some(Trend::Down));
        assert_eq!(snapshot[2].trend, Some(Trend::Up));
        // 가장 오래된 항목은 비교 대상이 없으므로 up
        assert_eq!(snapshot[3].trend, Some(Trend::Up));
    }

    #[test]
    fn test_existing_trend_not_overwritten() {
        let mut tape = new_trade_tape();
        let mut tagged = entry("t1", dec!(20000), 1);
        tagged.trend = Some(Trend::Down);
        tape.update_all("BTC-USDT", vec![tagged]);

        assert_eq!(tape.snapshot("BTC-USDT")[0].trend, Some(Trend::Down));
    }

    #[test]
    fn test_streaming_append_by_difference() {
        let mut tape = new_trade_tape();
        tape.update_all("BTC-USDT", vec![entry("t1", dec!(20000), 1)]);

        let delta = crate::cache::book::Difference {
            added: vec![entry("t2", dec!(20010), 2)],
            removed: vec![],
            updated: vec![],
        };
        assert!(tape.update_by_difference("BTC-USDT", delta));

        let snapshot = tape.snapshot("BTC-USDT");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "t2");
        assert_eq!(snapshot[0].trend, Some(Trend::Up));
    }
}
