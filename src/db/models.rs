//! 원장 DB 모델
//!
//! 금액/수량 컬럼은 전부 TEXT로 저장된 정규화 십진수 문자열이며,
//! 파싱과 포매팅은 `util::decimal`만 거칩니다.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::util::decimal::{self, DecimalError};

/// 아우터 트레이드 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterTradeStatus {
    /// 미처리 (재시도 대상)
    Unprocessed = 0,
    /// 원장 반영 완료
    Done = 1,
    /// clOrdId 해석 불가
    ClientOrderIdError = 7,
    /// 이 시스템 소속이 아닌 체결
    OtherSystemTrade = 8,
    /// 반복 실패로 격리됨
    SystemError = 9,
}

impl OuterTradeStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Unprocessed),
            1 => Some(Self::Done),
            7 => Some(Self::ClientOrderIdError),
            8 => Some(Self::OtherSystemTrade),
            9 => Some(Self::SystemError),
            _ => None,
        }
    }
}

/// 종목 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketRecord {
    pub id: i64,
    pub symbol: String,
    pub base_unit: String,
    pub quote_unit: String,
    pub lot_size: String,
    pub tick_size: String,
    pub price_scale: i64,
    pub ask_fee_rate: String,
    pub bid_fee_rate: String,
    pub vip_fee_rate: String,
    pub hero_fee_rate: String,
}

/// 종목 도메인 모델 (기동 시 1회 로드, 이후 읽기 전용)
#[derive(Debug, Clone)]
pub struct Market {
    pub id: i64,
    pub symbol: String,
    pub base_unit: String,
    pub quote_unit: String,
    pub lot_size: Decimal,
    pub tick_size: Decimal,
    pub price_scale: u32,
    pub ask_fee_rate: Decimal,
    pub bid_fee_rate: Decimal,
    pub vip_fee_rate: Decimal,
    pub hero_fee_rate: Decimal,
}

impl MarketRecord {
    pub fn to_market(&self) -> Result<Market, DecimalError> {
        Ok(Market {
            id: self.id,
            symbol: self.symbol.clone(),
            base_unit: self.base_unit.clone(),
            quote_unit: self.quote_unit.clone(),
            lot_size: decimal::parse(&self.lot_size)?,
            tick_size: decimal::parse(&self.tick_size)?,
            price_scale: self.price_scale as u32,
            ask_fee_rate: decimal::parse(&self.ask_fee_rate)?,
            bid_fee_rate: decimal::parse(&self.bid_fee_rate)?,
            vip_fee_rate: decimal::parse(&self.vip_fee_rate)?,
            hero_fee_rate: decimal::parse(&self.hero_fee_rate)?,
        })
    }
}

/// 심볼 → 종목 레지스트리
pub type MarketRegistry = Arc<HashMap<String, Market>>;

/// 회원 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MemberRecord {
    pub id: i64,
    pub sn: String,
    pub tier: String, // "default" | "vip" | "hero"
    pub email: String,
}

/// 주문 DB 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderRecord {
    pub id: i64,
    pub member_id: i64,
    pub market: String,
    pub side: String, // "ask" | "bid"
    pub price: Option<String>,
    pub volume: String,
    pub origin_volume: String,
    pub locked: String,
    pub origin_locked: String,
    pub funds_received: String,
    pub trades_count: i64,
    pub state: String, // "wait" | "done" | "cancel"
    pub ord_type: String, // "limit" | "market"
    pub created_at: i64,
    pub updated_at: i64,
}

/// 체결 DB 모델. trade_fk의 유니크 제약이 중복 반영 방지의 핵심입니다.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub market: String,
    pub price: String,
    pub volume: String,
    pub funds: String,
    pub ask_order_id: Option<i64>,
    pub bid_order_id: Option<i64>,
    pub ask_member_id: Option<i64>,
    pub bid_member_id: Option<i64>,
    pub currency: String,
    pub trade_fk: String,
    pub created_at: i64,
}

/// 바우처 DB 모델 (주문×체결당 1건, 수수료 회계 기록)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VoucherRecord {
    pub id: Option<i64>,
    pub member_id: i64,
    pub order_id: i64,
    pub trade_id: i64,
    pub trend: String, // "ask" | "bid"
    pub price: String,
    pub volume: String,
    pub value: String,
    pub ask_fee: String,
    pub bid_fee: String,
    pub created_at: i64,
}

/// 계정 DB 모델. balance ≥ 0, locked ≥ 0 불변식은 정산 엔진이 지킵니다.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccountRecord {
    pub id: i64,
    pub member_id: i64,
    pub currency: String,
    pub balance: String,
    pub locked: String,
}

/// 계정 변경 감사 모델 (append-only, 계정 변경당 정확히 1건)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccountVersionRecord {
    pub id: Option<i64>,
    pub member_id: i64,
    pub account_id: i64,
    pub reason: String,
    pub balance_delta: String,
    pub locked_delta: String,
    pub fee: String,
    pub amount: String,
    pub modifiable_id: Option<i64>,
    pub modifiable_type: Option<String>,
    pub currency: String,
    pub fun: String,
    pub created_at: i64,
}

/// 외부 체결 스테이징 모델
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OuterTradeRecord {
    pub id: String,
    pub exchange_code: String,
    pub data: String,
    pub status: i64,
    pub traded_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// GC 전에 보존하는 외부 수수료 기록
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OuterTradeFeeRecord {
    pub outer_trade_id: String,
    pub market: String,
    pub fee: String,
    pub fee_currency: String,
    pub traded_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_trade_status_roundtrip() {
        for status in [
            OuterTradeStatus::Unprocessed,
            OuterTradeStatus::Done,
            OuterTradeStatus::ClientOrderIdError,
            OuterTradeStatus::OtherSystemTrade,
            OuterTradeStatus::SystemError,
        ] {
            assert_eq!(OuterTradeStatus::from_i64(status.as_i64()), Some(status));
        }
        assert_eq!(OuterTradeStatus::from_i64(42), None);
    }

    #[test]
    fn test_market_record_conversion() {
        let record = MarketRecord {
            id: 1,
            symbol: "BTC-USDT".to_string(),
            base_unit: "btc".to_string(),
            quote_unit: "usdt".to_string(),
            lot_size: "0.0001".to_string(),
            tick_size: "0.1".to_string(),
            price_scale: 2,
            ask_fee_rate: "0.002".to_string(),
            bid_fee_rate: "0.002".to_string(),
            vip_fee_rate: "0.001".to_string(),
            hero_fee_rate: "0".to_string(),
        };

        let market = record.to_market().unwrap();
        assert_eq!(market.symbol, "BTC-USDT");
        assert_eq!(market.price_scale, 2);
        assert!(market.vip_fee_rate < market.ask_fee_rate);
    }
}
