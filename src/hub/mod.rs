//! 배포 허브
//!
//! 캐시 갱신 이벤트를 받아 구독 레지스트리에 따라 연결별로 중계합니다.

pub mod subscriptions;

use std::sync::Arc;

use log::warn;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;

use crate::api::models::{DepthLevelWire, WsOutMessage};
use crate::cache::depth_book::{DepthLevel, SIDE_ASKS};
use crate::cache::SharedCaches;
use crate::events::{EventChannels, MarketEvent, MemberEvent};
use crate::util::decimal;

pub use subscriptions::{ConnectionId, SubscriptionHub};

/// 구독/해지/전송을 한 락으로 직렬화하는 공유 핸들
pub type SharedHub = Arc<Mutex<SubscriptionHub>>;

/// 캐시 레벨 → 와이어 포맷 변환: [가격, 수량, 누적, 비율]
pub fn depth_wire(levels: &[DepthLevel]) -> (Vec<DepthLevelWire>, Vec<DepthLevelWire>) {
    let mut asks = Vec::new();
    let mut bids = Vec::new();
    for level in levels {
        let wire = [
            decimal::format(level.price),
            decimal::format(level.volume),
            decimal::format(level.cumulative),
            decimal::format(level.percent),
        ];
        if level.side == SIDE_ASKS {
            asks.push(wire);
        } else {
            bids.push(wire);
        }
    }
    (asks, bids)
}

/// 브로드캐스트 루프. 이벤트 채널이 닫히면 종료합니다.
pub async fn run_broadcaster(hub: SharedHub, caches: SharedCaches, events: EventChannels) {
    let mut market_rx = events.subscribe_market();
    let mut member_rx = events.subscribe_member();

    loop {
        tokio::select! {
            event = market_rx.recv() => {
                match event {
                    Ok(event) => handle_market_event(&hub, &caches, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("시장 이벤트 {}건 유실 (브로드캐스트 지연)", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            event = member_rx.recv() => {
                match event {
                    Ok(event) => handle_member_event(&hub, &caches, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("회원 이벤트 {}건 유실 (브로드캐스트 지연)", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn handle_market_event(hub: &SharedHub, caches: &SharedCaches, event: MarketEvent) {
    match event {
        MarketEvent::TradesUpdated { market } => {
            // 배포 주기당 한 번 차분을 소비한다
            let added = caches.read().await.tape.difference(&market).added;
            if added.is_empty() {
                return;
            }
            let message = WsOutMessage::TradesUpdated { market: market.clone(), trades: added };
            hub.lock().await.broadcast_market(&market, &message);
        }
        MarketEvent::BookUpdated { market } => {
            let snapshot = caches.read().await.depth.snapshot(&market);
            let (asks, bids) = depth_wire(&snapshot);
            let message = WsOutMessage::BookUpdated { market: market.clone(), asks, bids };
            hub.lock().await.broadcast_market(&market, &message);
        }
        MarketEvent::CandleUpdated { market, candle } => {
            let message = WsOutMessage::CandleUpdated { market: market.clone(), candle };
            hub.lock().await.broadcast_market(&market, &message);
        }
        MarketEvent::TickerUpdated => {
            // 티커는 전 종목 묶음으로 전체 연결에 나간다
            let tickers = {
                let caches = caches.read().await;
                let mut all = Vec::new();
                for key in caches.ticker.keys() {
                    all.extend(caches.ticker.snapshot(&key));
                }
                all
            };
            hub.lock().await.broadcast_all(&WsOutMessage::TickerUpdated { tickers });
        }
        MarketEvent::InstrumentsUpdated { markets } => {
            hub.lock().await.broadcast_all(&WsOutMessage::InstrumentsUpdated { markets });
        }
    }
}

async fn handle_member_event(hub: &SharedHub, caches: &SharedCaches, event: MemberEvent) {
    match event {
        MemberEvent::AccountUpdated { member_id } => {
            let accounts = caches
                .read()
                .await
                .accounts
                .snapshot(&crate::cache::account_book::account_key(member_id));
            let message = WsOutMessage::AccountUpdated { accounts };
            hub.lock().await.broadcast_member(member_id, &message);
        }
        MemberEvent::OrderUpdated { member_id, market } => {
            let orders = caches
                .read()
                .await
                .orders
                .snapshot(&crate::cache::order_book::order_key(member_id, &market));
            let message = WsOutMessage::OrderUpdated { market, orders };
            hub.lock().await.broadcast_member(member_id, &message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_depth_wire_shape() {
        let mut level = DepthLevel::new(SIDE_ASKS, dec!(20000.5), dec!(1.25));
        level.cumulative = dec!(1.25);
        level.percent = dec!(0.5);

        let (asks, bids) = depth_wire(&[level]);
        assert_eq!(asks, vec![["20000.5", "1.25", "1.25", "0.5"].map(String::from)]);
        assert!(bids.is_empty());
    }
}
