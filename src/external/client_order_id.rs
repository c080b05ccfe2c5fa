//! clOrdId 인코딩/디코딩
//!
//! 외부 거래소에 노출되는 주문 식별자 형식:
//! 고정 길이 브로커 id(16자) 뒤에 `m<회원id>o<주문id>`,
//! 시장가 주문은 `m<회원id>`만 붙습니다.
//! 형식 호환을 위해 포맷은 그대로 두고, 해석은 이 모듈 한 곳에서만 합니다.

use thiserror::Error;

/// 브로커 id 고정 길이
pub const BROKER_ID_LEN: usize = 16;

/// 해석된 clOrdId
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrderId {
    pub broker_id: String,
    pub member_id: i64,
    /// 시장가 주문은 주문 id가 없음
    pub order_id: Option<i64>,
}

/// clOrdId 해석 오류
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientOrderIdError {
    #[error("clOrdId가 브로커 id 길이보다 짧음: {0}")]
    TooShort(String),
    #[error("회원 태그 'm'이 없음: {0}")]
    MissingMemberTag(String),
    #[error("회원 id 해석 불가: {0}")]
    InvalidMemberId(String),
    #[error("주문 id 해석 불가: {0}")]
    InvalidOrderId(String),
}

/// clOrdId 생성
pub fn encode(broker_id: &str, member_id: i64, order_id: Option<i64>) -> String {
    match order_id {
        Some(order_id) => format!("{}m{}o{}", broker_id, member_id, order_id),
        None => format!("{}m{}", broker_id, member_id),
    }
}

/// clOrdId 해석
pub fn decode(raw: &str) -> Result<ClientOrderId, ClientOrderIdError> {
    if raw.len() <= BROKER_ID_LEN {
        return Err(ClientOrderIdError::TooShort(raw.to_string()));
    }
    let (broker_id, tail) = raw.split_at(BROKER_ID_LEN);

    let tail = tail
        .strip_prefix('m')
        .ok_or_else(|| ClientOrderIdError::MissingMemberTag(raw.to_string()))?;

    let (member_part, order_part) = match tail.split_once('o') {
        Some((member, order)) => (member, Some(order)),
        None => (tail, None),
    };

    let member_id = parse_id(member_part)
        .ok_or_else(|| ClientOrderIdError::InvalidMemberId(raw.to_string()))?;
    let order_id = match order_part {
        Some(order) => {
            Some(parse_id(order).ok_or_else(|| ClientOrderIdError::InvalidOrderId(raw.to_string()))?)
        }
        None => None,
    };

    Ok(ClientOrderId { broker_id: broker_id.to_string(), member_id, order_id })
}

fn parse_id(digits: &str) -> Option<i64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()
}
