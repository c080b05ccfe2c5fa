//! 캐시 피드 태스크
//!
//! 커넥터의 시장 데이터 이벤트와 정산 엔진의 원장 변경 통지를 받아
//! 캐시에 반영하고, 반영이 끝난 뒤 갱신 이벤트를 발행합니다.
//! 캐시 쓰기는 이 태스크 하나로 직렬화됩니다.

use std::collections::HashMap;

use log::warn;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use tokio::sync::mpsc;

use crate::cache::account_book::{account_key, AccountEntry};
use crate::cache::book::Difference;
use crate::cache::depth_book::{DepthLevel, SIDE_ASKS, SIDE_BIDS};
use crate::cache::order_book::{order_key, OrderEntry};
use crate::cache::ticker_book::TickerEntry;
use crate::cache::trade_tape::TapeEntry;
use crate::cache::SharedCaches;
use crate::db::repository::{AccountRepository, OrderRepository};
use crate::events::{EventChannels, LedgerEvent, MarketEvent, MemberEvent};
use crate::external::connector::{Candle, MarketFeedEvent, TradePrint};
use crate::util::decimal;

const MS_PER_MINUTE: i64 = 60_000;
/// 캐시 재적재 시 끌어오는 주문 수 (트림 전)
const ORDER_RELOAD_LIMIT: i64 = 400;

/// 캐시 피드
pub struct CacheFeed {
    caches: SharedCaches,
    events: EventChannels,
    pool: SqlitePool,
    /// 종목별 진행 중인 1분봉
    candles: HashMap<String, Candle>,
}

impl CacheFeed {
    pub fn new(caches: SharedCaches, events: EventChannels, pool: SqlitePool) -> Self {
        Self { caches, events, pool, candles: HashMap::new() }
    }

    /// 두 입력 채널이 모두 닫히면 종료합니다.
    pub async fn run(
        mut self,
        mut feed_rx: mpsc::UnboundedReceiver<MarketFeedEvent>,
        mut ledger_rx: mpsc::UnboundedReceiver<LedgerEvent>,
    ) {
        loop {
            tokio::select! {
                event = feed_rx.recv() => {
                    match event {
                        Some(event) => self.handle_market_event(event).await,
                        None => break,
                    }
                }
                event = ledger_rx.recv() => {
                    match event {
                        Some(event) => self.handle_ledger_event(event).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_market_event(&mut self, event: MarketFeedEvent) {
        match event {
            MarketFeedEvent::TradePrint { market, print } => {
                self.apply_trade_print(&market, &print).await;
            }
            MarketFeedEvent::BookSnapshot { market, asks, bids } => {
                let levels = build_levels(&asks, &bids);
                let ok = self.caches.write().await.depth.update_all(&market, levels);
                if ok {
                    self.events.publish_market(MarketEvent::BookUpdated { market });
                }
            }
            MarketFeedEvent::BookDelta { market, asks, bids } => {
                let delta = build_level_delta(&asks, &bids);
                let ok = self.caches.write().await.depth.update_by_difference(&market, delta);
                if ok {
                    self.events.publish_market(MarketEvent::BookUpdated { market });
                }
            }
            MarketFeedEvent::Candle { market, candle } => {
                self.candles.insert(market.clone(), candle.clone());
                self.events.publish_market(MarketEvent::CandleUpdated { market, candle });
            }
            MarketFeedEvent::Ticker { market, last, open_24h, high_24h, low_24h, vol_24h } => {
                let parsed = (|| -> Result<TickerEntry, crate::util::decimal::DecimalError> {
                    Ok(TickerEntry {
                        market: market.clone(),
                        last: decimal::parse(&last)?,
                        open: decimal::parse(&open_24h)?,
                        high: decimal::parse(&high_24h)?,
                        low: decimal::parse(&low_24h)?,
                        volume: decimal::parse(&vol_24h)?,
                    })
                })();
                match parsed {
                    Ok(entry) => self.apply_ticker(&market, entry).await,
                    Err(e) => warn!("티커 해석 실패 ({}): {}", market, e),
                }
            }
            MarketFeedEvent::Instruments { markets } => {
                self.events.publish_market(MarketEvent::InstrumentsUpdated { markets });
            }
        }
    }

    async fn apply_trade_print(&mut self, market: &str, print: &TradePrint) {
        let (price, volume) = match (decimal::parse(&print.price), decimal::parse(&print.volume)) {
            (Ok(price), Ok(volume)) => (price, volume),
            _ => {
                warn!("체결 프린트 해석 실패 ({}): {:?}", market, print);
                return;
            }
        };

        // 테이프 반영. 방향 태그는 트림 단계의 역채움에 맡긴다.
        let entry = TapeEntry {
            id: print.id.clone(),
            price,
            volume,
            taken_at: print.ts,
            trend: None,
        };
        let delta = Difference { added: vec![entry], removed: vec![], updated: vec![] };
        let tape_ok = self.caches.write().await.tape.update_by_difference(market, delta);
        if tape_ok {
            self.events.publish_market(MarketEvent::TradesUpdated { market: market.to_string() });
        }

        // 티커 반영
        let current = {
            let caches = self.caches.read().await;
            caches.ticker.snapshot(market).into_iter().next()
        };
        let next = match current {
            Some(ticker) => TickerEntry {
                market: market.to_string(),
                last: price,
                open: ticker.open,
                high: ticker.high.max(price),
                low: ticker.low.min(price),
                volume: ticker.volume + volume,
            },
            None => TickerEntry {
                market: market.to_string(),
                last: price,
                open: price,
                high: price,
                low: price,
                volume,
            },
        };
        self.apply_ticker(market, next).await;

        // 1분봉 롤업
        let minute = print.ts - print.ts % MS_PER_MINUTE;
        let candle = self
            .candles
            .entry(market.to_string())
            .and_modify(|candle| {
                if candle.ts == minute {
                    candle.high = candle.high.max(price);
                    candle.low = candle.low.min(price);
                    candle.close = price;
                    candle.volume += volume;
                } else {
                    *candle = new_candle(minute, price, volume);
                }
            })
            .or_insert_with(|| new_candle(minute, price, volume))
            .clone();
        self.events
            .publish_market(MarketEvent::CandleUpdated { market: market.to_string(), candle });
    }

    async fn apply_ticker(&self, market: &str, entry: TickerEntry) {
        let mut caches = self.caches.write().await;
        let ok = caches.ticker.update_all(market, vec![entry]);
        let changed = !caches.ticker.difference(market).is_empty();
        drop(caches);
        if ok && changed {
            self.events.publish_market(MarketEvent::TickerUpdated);
        }
    }

    /// 원장 변경 통지: DB에서 회원의 주문/잔고를 다시 읽어 캐시에 반영
    async fn handle_ledger_event(&self, event: LedgerEvent) {
        match OrderRepository::find_recent(&self.pool, event.member_id, &event.market, ORDER_RELOAD_LIMIT)
            .await
        {
            Ok(orders) => {
                let entries: Vec<OrderEntry> = orders
                    .iter()
                    .map(|order| OrderEntry {
                        id: order.id,
                        market: order.market.clone(),
                        side: order.side.clone(),
                        price: order.price.clone(),
                        volume: order.volume.clone(),
                        origin_volume: order.origin_volume.clone(),
                        state: order.state.clone(),
                        ord_type: order.ord_type.clone(),
                        created_at: order.created_at,
                    })
                    .collect();
                let key = order_key(event.member_id, &event.market);
                let ok = self.caches.write().await.orders.update_all(&key, entries);
                if ok {
                    self.events.publish_member(MemberEvent::OrderUpdated {
                        member_id: event.member_id,
                        market: event.market.clone(),
                    });
                }
            }
            Err(e) => warn!("주문 캐시 재적재 실패 (member={}): {}", event.member_id, e),
        }

        match AccountRepository::find_all_by_member(&self.pool, event.member_id).await {
            Ok(accounts) => {
                let mut entries = Vec::with_capacity(accounts.len());
                for account in &accounts {
                    match (decimal::parse(&account.balance), decimal::parse(&account.locked)) {
                        (Ok(balance), Ok(locked)) => entries.push(AccountEntry {
                            currency: account.currency.clone(),
                            balance,
                            locked,
                        }),
                        _ => warn!("잔고 해석 실패: account={}", account.id),
                    }
                }
                let key = account_key(event.member_id);
                let ok = self.caches.write().await.accounts.update_all(&key, entries);
                if ok {
                    self.events
                        .publish_member(MemberEvent::AccountUpdated { member_id: event.member_id });
                }
            }
            Err(e) => warn!("잔고 캐시 재적재 실패 (member={}): {}", event.member_id, e),
        }
    }
}

fn new_candle(ts: i64, price: Decimal, volume: Decimal) -> Candle {
    Candle { ts, open: price, high: price, low: price, close: price, volume }
}

fn build_levels(asks: &[(String, String)], bids: &[(String, String)]) -> Vec<DepthLevel> {
    let mut levels = Vec::with_capacity(asks.len() + bids.len());
    for (side, rows) in [(SIDE_ASKS, asks), (SIDE_BIDS, bids)] {
        for (price, volume) in rows {
            match (decimal::parse(price), decimal::parse(volume)) {
                (Ok(price), Ok(volume)) => levels.push(DepthLevel::new(side, price, volume)),
                _ => warn!("호가 레벨 해석 실패: {} {}", price, volume),
            }
        }
    }
    levels
}

/// 수량 "0"은 레벨 제거, 그 외는 교체로 해석
fn build_level_delta(asks: &[(String, String)], bids: &[(String, String)]) -> Difference<DepthLevel> {
    let mut delta = Difference::default();
    for (side, rows) in [(SIDE_ASKS, asks), (SIDE_BIDS, bids)] {
        for (price, volume) in rows {
            match (decimal::parse(price), decimal::parse(volume)) {
                (Ok(price), Ok(volume)) => {
                    let level = DepthLevel::new(side, price, volume);
                    if volume.is_zero() {
                        delta.removed.push(level);
                    } else {
                        delta.updated.push(level);
                    }
                }
                _ => warn!("호가 레벨 해석 실패: {} {}", price, volume),
            }
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_build_level_delta_zero_volume_removes() {
        let delta = build_level_delta(
            &[("20001".to_string(), "0".to_string())],
            &[("19999".to_string(), "2".to_string())],
        );
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.removed[0].side, SIDE_ASKS);
        assert_eq!(delta.updated[0].volume, dec!(2));
    }

    #[test]
    fn test_build_levels_skips_bad_rows() {
        let levels = build_levels(
            &[("20001".to_string(), "1".to_string()), ("bad".to_string(), "1".to_string())],
            &[],
        );
        assert_eq!(levels.len(), 1);
    }
}
