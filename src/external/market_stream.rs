//! 외부 거래소 공개 시장 데이터 스트림
//!
//! 허브의 스트림 제어 신호에 따라 종목 채널을 구독/해지하고, 수신한
//! 공개 데이터를 캐시 피드 이벤트로 변환합니다. 연결이 끊기면 잠시 쉬고
//! 다시 붙습니다.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::events::StreamControl;
use crate::external::connector::{Candle, ConnectorError, MarketFeedEvent, TradePrint};
use crate::util::decimal;

const RECONNECT_DELAY_SECS: u64 = 5;

/// 시장 데이터 스트림 구동. 제어 채널이 닫히면 종료합니다.
pub async fn run_market_stream(
    ws_url: String,
    mut control_rx: mpsc::UnboundedReceiver<StreamControl>,
    feed_tx: mpsc::UnboundedSender<MarketFeedEvent>,
) {
    // 재접속 시 복구해야 하는 활성 구독 집합
    let mut active_markets: Vec<String> = Vec::new();

    loop {
        match stream_session(&ws_url, &mut control_rx, &feed_tx, &mut active_markets).await {
            Ok(()) => {
                info!("시장 데이터 스트림 종료 (제어 채널 닫힘)");
                return;
            }
            Err(e) => {
                error!("시장 데이터 스트림 오류, {}초 후 재접속: {}", RECONNECT_DELAY_SECS, e);
                sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }
        }
    }
}

async fn stream_session(
    ws_url: &str,
    control_rx: &mut mpsc::UnboundedReceiver<StreamControl>,
    feed_tx: &mpsc::UnboundedSender<MarketFeedEvent>,
    active_markets: &mut Vec<String>,
) -> Result<(), ConnectorError> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .map_err(|e| ConnectorError::Ws(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();
    info!("시장 데이터 스트림 연결: {}", ws_url);

    // 끊기기 전 구독을 복구
    for market in active_markets.iter() {
        let frame = subscribe_frame("subscribe", market);
        write
            .send(Message::Text(frame))
            .await
            .map_err(|e| ConnectorError::Ws(e.to_string()))?;
    }

    loop {
        tokio::select! {
            control = control_rx.recv() => {
                match control {
                    Some(StreamControl::StartMarket(market)) => {
                        if !active_markets.contains(&market) {
                            active_markets.push(market.clone());
                        }
                        write.send(Message::Text(subscribe_frame("subscribe", &market)))
                            .await
                            .map_err(|e| ConnectorError::Ws(e.to_string()))?;
                        info!("종목 스트리밍 시작: {}", market);
                    }
                    Some(StreamControl::StopMarket(market)) => {
                        active_markets.retain(|m| m != &market);
                        write.send(Message::Text(subscribe_frame("unsubscribe", &market)))
                            .await
                            .map_err(|e| ConnectorError::Ws(e.to_string()))?;
                        info!("종목 스트리밍 중단: {}", market);
                    }
                    // 회원 비공개 채널은 원장 통지 경로로 처리되므로 여기서는 무시
                    Some(StreamControl::StartMember(_)) | Some(StreamControl::StopMember(_)) => {}
                    None => return Ok(()),
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_frame(&text) {
                            if feed_tx.send(event).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload))
                            .await
                            .map_err(|e| ConnectorError::Ws(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(ConnectorError::Ws("서버가 연결을 닫음".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ConnectorError::Ws(e.to_string())),
                }
            }
        }
    }
}

fn subscribe_frame(op: &str, market: &str) -> String {
    serde_json::json!({
        "op": op,
        "args": [
            { "channel": "trades", "instId": market },
            { "channel": "books5", "instId": market },
            { "channel": "candle1m", "instId": market },
            { "channel": "tickers", "instId": market },
        ],
    })
    .to_string()
}

/// 수신 프레임을 피드 이벤트로 변환. 해석 불가 프레임은 버립니다.
fn parse_frame(text: &str) -> Option<MarketFeedEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let channel = value.get("arg")?.get("channel")?.as_str()?;
    let market = value.get("arg")?.get("instId")?.as_str()?.to_string();
    let data = value.get("data")?.as_array()?;

    match channel {
        "trades" => {
            let row = data.first()?;
            Some(MarketFeedEvent::TradePrint {
                market,
                print: TradePrint {
                    id: row.get("tradeId")?.as_str()?.to_string(),
                    price: row.get("px")?.as_str()?.to_string(),
                    volume: row.get("sz")?.as_str()?.to_string(),
                    side: row.get("side")?.as_str()?.to_string(),
                    ts: row.get("ts")?.as_str()?.parse().ok()?,
                },
            })
        }
        "books5" => {
            let row = data.first()?;
            Some(MarketFeedEvent::BookSnapshot {
                market,
                asks: parse_levels(row.get("asks")?),
                bids: parse_levels(row.get("bids")?),
            })
        }
        "candle1m" => {
            let row = data.first()?.as_array()?;
            let field = |i: usize| row.get(i).and_then(|v| v.as_str());
            Some(MarketFeedEvent::Candle {
                market,
                candle: Candle {
                    ts: field(0)?.parse().ok()?,
                    open: decimal::parse(field(1)?).ok()?,
                    high: decimal::parse(field(2)?).ok()?,
                    low: decimal::parse(field(3)?).ok()?,
                    close: decimal::parse(field(4)?).ok()?,
                    volume: decimal::parse(field(5)?).ok()?,
                },
            })
        }
        "tickers" => {
            let row = data.first()?;
            let field = |name: &str| row.get(name).and_then(|v| v.as_str()).map(String::from);
            Some(MarketFeedEvent::Ticker {
                market,
                last: field("last")?,
                open_24h: field("open24h")?,
                high_24h: field("high24h")?,
                low_24h: field("low24h")?,
                vol_24h: field("vol24h")?,
            })
        }
        other => {
            warn!("알 수 없는 스트림 채널: {}", other);
            None
        }
    }
}

fn parse_levels(value: &serde_json::Value) -> Vec<(String, String)> {
    value
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let level = row.as_array()?;
                    Some((level.first()?.as_str()?.to_string(), level.get(1)?.as_str()?.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trade_frame() {
        let frame = r#"{
            "arg": { "channel": "trades", "instId": "BTC-USDT" },
            "data": [ { "tradeId": "1", "px": "20000", "sz": "0.01", "side": "sell", "ts": "1700000000000" } ]
        }"#;

        match parse_frame(frame) {
            Some(MarketFeedEvent::TradePrint { market, print }) => {
                assert_eq!(market, "BTC-USDT");
                assert_eq!(print.price, "20000");
                assert_eq!(print.ts, 1_700_000_000_000);
            }
            other => panic!("예상 밖 이벤트: {:?}", other),
        }
    }

    #[test]
    fn test_parse_book_frame() {
        let frame = r#"{
            "arg": { "channel": "books5", "instId": "BTC-USDT" },
            "data": [ { "asks": [["20001", "1", "0", "1"]], "bids": [["19999", "2", "0", "1"]] } ]
        }"#;

        match parse_frame(frame) {
            Some(MarketFeedEvent::BookSnapshot { asks, bids, .. }) => {
                assert_eq!(asks, vec![("20001".to_string(), "1".to_string())]);
                assert_eq!(bids, vec![("19999".to_string(), "2".to_string())]);
            }
            other => panic!("예상 밖 이벤트: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_is_dropped() {
        assert!(parse_frame("{}").is_none());
        assert!(parse_frame("not-json").is_none());
    }
}
