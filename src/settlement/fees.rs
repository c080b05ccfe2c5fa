//! 수수료율 결정
//!
//! 회원 등급이 vip/hero면 종목의 등급 요율을, 그 외에는 사이드별 기본
//! 요율을 적용합니다.

use rust_decimal::Decimal;

use crate::db::models::Market;

/// 회원 등급
pub const TIER_VIP: &str = "vip";
pub const TIER_HERO: &str = "hero";

/// 주문 사이드
pub const SIDE_ASK: &str = "ask";
pub const SIDE_BID: &str = "bid";

/// 체결에 적용할 수수료율
pub fn fee_rate(market: &Market, tier: &str, side: &str) -> Decimal {
    match tier {
        TIER_VIP => market.vip_fee_rate,
        TIER_HERO => market.hero_fee_rate,
        _ => {
            if side == SIDE_ASK {
                market.ask_fee_rate
            } else {
                market.bid_fee_rate
            }
        }
    }
}
