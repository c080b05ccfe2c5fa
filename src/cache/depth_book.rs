//! 호가창 캐시
//!
//! 종목별 가격 레벨 스냅샷. 트림 시 수량을 로트 단위로 집계하고,
//! 사이드별 상위 50개 레벨만 남기며(매도 오름차순, 매수 내림차순),
//! 레벨마다 누적 수량과 전체 심도 대비 비율을 주석으로 붙입니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cache::book::{DiffPolicy, SnapshotBook};
use crate::db::models::MarketRegistry;
use crate::util::decimal::quantize_down;

/// 사이드별 보존 레벨 수
pub const DEPTH_LIMIT: usize = 50;

/// 호가 사이드
pub const SIDE_ASKS: &str = "asks";
pub const SIDE_BIDS: &str = "bids";

/// 가격 레벨 한 줄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub side: String,
    pub price: Decimal,
    pub volume: Decimal,
    /// 같은 사이드의 누적 수량 (스냅샷 빌드마다 0부터 다시 계산)
    pub cumulative: Decimal,
    /// cumulative / (매도 총량 + 매수 총량)
    pub percent: Decimal,
}

impl DepthLevel {
    pub fn new(side: &str, price: Decimal, volume: Decimal) -> Self {
        Self {
            side: side.to_string(),
            price,
            volume,
            cumulative: Decimal::ZERO,
            percent: Decimal::ZERO,
        }
    }
}

/// 호가창 캐시 생성. 로트 크기는 종목 레지스트리에서 키(심볼)로 찾습니다.
pub fn new_depth_book(markets: MarketRegistry) -> SnapshotBook<DepthLevel> {
    SnapshotBook::new(
        "depth_book",
        DiffPolicy::ALL,
        Box::new(|level: &DepthLevel| format!("{}:{}", level.side, level.price.normalize())),
        Box::new(|a: &DepthLevel, b: &DepthLevel| a.price == b.price && a.volume == b.volume),
        Box::new(move |key, levels| trim_depth(&markets, key, levels)),
    )
}

fn trim_depth(markets: &MarketRegistry, key: &str, levels: Vec<DepthLevel>) -> Vec<DepthLevel> {
    let lot_size = markets
        .get(key)
        .map(|market| market.lot_size)
        .unwrap_or(Decimal::ZERO);

    let mut asks: Vec<DepthLevel> = Vec::new();
    let mut bids: Vec<DepthLevel> = Vec::new();
    for mut level in levels {
        level.volume = quantize_down(level.volume, lot_size);
        if level.volume.is_zero() {
            continue;
        }
        if level.side == SIDE_ASKS {
            asks.push(level);
        } else {
            bids.push(level);
        }
    }

    asks.sort_by(|a, b| a.price.cmp(&b.price));
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.truncate(DEPTH_LIMIT);
    bids.truncate(DEPTH_LIMIT);

    let ask_total: Decimal = asks.iter().map(|level| level.volume).sum();
    let bid_total: Decimal = bids.iter().map(|level| level.volume).sum();
    let grand_total = ask_total + bid_total;

    annotate_side(&mut asks, grand_total);
    annotate_side(&mut bids, grand_total);

    asks.into_iter().chain(bids).collect()
}

/// 사이드별 누적 합계와 심도 비율 주석. 누적은 사이드마다 0에서 시작합니다.
fn annotate_side(levels: &mut [DepthLevel], grand_total: Decimal) {
    let mut running = Decimal::ZERO;
    for level in levels.iter_mut() {
        running += level.volume;
        level.cumulative = running;
        level.percent = if grand_total.is_zero() {
            Decimal::ZERO
        } else {
            running / grand_total
        };
    }
}
