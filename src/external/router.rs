//! 거래소 디스패치 테이블
//!
//! 거래소 코드 → 커넥터 구현의 타입 있는 라우팅. 리플렉션 없이 enum
//! 위임으로 분기합니다.

use std::collections::HashMap;

use crate::external::connector::{
    Connector, ConnectorError, ExternalOrderState, Fill, OkxConnector, OrderAck, OrderSpec,
};

/// 지원 거래소
pub enum Venue {
    Okx(OkxConnector),
}

impl Connector for Venue {
    fn exchange_code(&self) -> &str {
        match self {
            Venue::Okx(c) => c.exchange_code(),
        }
    }

    async fn fetch_fills_since(&self, begin_ms: i64) -> Result<Vec<Fill>, ConnectorError> {
        match self {
            Venue::Okx(c) => c.fetch_fills_since(begin_ms).await,
        }
    }

    async fn fetch_order_state(
        &self,
        inst_id: &str,
        ord_id: &str,
    ) -> Result<ExternalOrderState, ConnectorError> {
        match self {
            Venue::Okx(c) => c.fetch_order_state(inst_id, ord_id).await,
        }
    }

    async fn place_order(&self, spec: &OrderSpec) -> Result<OrderAck, ConnectorError> {
        match self {
            Venue::Okx(c) => c.place_order(spec).await,
        }
    }

    async fn cancel_order(&self, inst_id: &str, ord_id: &str) -> Result<OrderAck, ConnectorError> {
        match self {
            Venue::Okx(c) => c.cancel_order(inst_id, ord_id).await,
        }
    }
}

/// 거래소 코드별 커넥터 레지스트리
pub struct VenueRouter {
    venues: HashMap<String, Venue>,
}

impl VenueRouter {
    pub fn new() -> Self {
        Self { venues: HashMap::new() }
    }

    pub fn register(&mut self, venue: Venue) {
        self.venues.insert(venue.exchange_code().to_string(), venue);
    }

    pub fn get(&self, exchange_code: &str) -> Option<&Venue> {
        self.venues.get(exchange_code)
    }
}

impl Default for VenueRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_dispatch_by_code() {
        let mut router = VenueRouter::new();
        router.register(Venue::Okx(OkxConnector::new("okx", "https://example.invalid")));

        assert!(router.get("okx").is_some());
        assert_eq!(router.get("okx").unwrap().exchange_code(), "okx");
        assert!(router.get("binance").is_none());
    }
}
