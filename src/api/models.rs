//! WebSocket 와이어 프로토콜 모델

use serde::{Deserialize, Serialize};

use crate::cache::account_book::AccountEntry;
use crate::cache::order_book::OrderEntry;
use crate::cache::ticker_book::TickerEntry;
use crate::cache::trade_tape::TapeEntry;
use crate::external::connector::Candle;

/// 오류 코드 체계
pub mod error_code {
    /// 메시지 형식 오류
    pub const BAD_REQUEST: &str = "bad_request";
    /// 모르는 op
    pub const UNKNOWN_OP: &str = "unknown_op";
    /// 모르는 종목
    pub const UNKNOWN_MARKET: &str = "unknown_market";
    /// 세션 해석 실패
    pub const UNAUTHENTICATED: &str = "unauthenticated";
}

/// 클라이언트 → 서버 구독 요청
#[derive(Debug, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "camelCase")]
pub enum WsRequest {
    /// 종목 채널 구독 (기존 구독은 자동 해지)
    #[serde(rename_all = "camelCase")]
    SubscribeMarket { market: String },
    /// 회원 비공개 채널 구독
    #[serde(rename_all = "camelCase")]
    SubscribeMember { token: String },
}

/// 호가 레벨 와이어 포맷: [가격, 수량, 누적 수량, 심도 비율]
pub type DepthLevelWire = [String; 4];

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WsOutMessage {
    #[serde(rename_all = "camelCase")]
    TradesUpdated { market: String, trades: Vec<TapeEntry> },
    #[serde(rename_all = "camelCase")]
    BookUpdated { market: String, asks: Vec<DepthLevelWire>, bids: Vec<DepthLevelWire> },
    #[serde(rename_all = "camelCase")]
    CandleUpdated { market: String, candle: Candle },
    #[serde(rename_all = "camelCase")]
    TickerUpdated { tickers: Vec<TickerEntry> },
    #[serde(rename_all = "camelCase")]
    InstrumentsUpdated { markets: Vec<String> },
    #[serde(rename_all = "camelCase")]
    AccountUpdated { accounts: Vec<AccountEntry> },
    #[serde(rename_all = "camelCase")]
    OrderUpdated { market: String, orders: Vec<OrderEntry> },
    #[serde(rename_all = "camelCase")]
    Subscribed { channel: String },
    #[serde(rename_all = "camelCase")]
    Error { code: String, message: String },
}

impl WsOutMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        WsOutMessage::Error { code: code.to_string(), message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let raw = r#"{ "op": "subscribeMarket", "args": { "market": "BTC-USDT" } }"#;
        match serde_json::from_str::<WsRequest>(raw).unwrap() {
            WsRequest::SubscribeMarket { market } => assert_eq!(market, "BTC-USDT"),
            other => panic!("예상 밖 요청: {:?}", other),
        }

        let raw = r#"{ "op": "subscribeMember", "args": { "token": "abc" } }"#;
        assert!(matches!(
            serde_json::from_str::<WsRequest>(raw).unwrap(),
            WsRequest::SubscribeMember { .. }
        ));

        assert!(serde_json::from_str::<WsRequest>(r#"{ "op": "nope", "args": {} }"#).is_err());
    }

    #[test]
    fn test_out_message_tagging() {
        let message = WsOutMessage::error(error_code::UNKNOWN_OP, "지원하지 않는 op");
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""code":"unknown_op""#));
    }
}
