//! 외부 거래소 커넥터 인터페이스
//!
//! 체결 이력 조회, 주문 상태 조회, 주문 접수/취소와 공개 시장 데이터
//! 스트림을 좁은 인터페이스로 노출합니다. 거래소별 구현은 이 트레이트
//! 하나만 충족하면 됩니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 커넥터 오류
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("HTTP 요청 실패: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket 오류: {0}")]
    Ws(String),
    #[error("거래소 응답 오류 code={code}: {message}")]
    Remote { code: String, message: String },
    #[error("응답 해석 실패: {0}")]
    Decode(String),
}

impl ConnectorError {
    /// 재시도해 볼 만한 일시 오류인지 (네트워크 계열)
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Http(_) | ConnectorError::Ws(_))
    }
}

/// 외부 체결 한 건
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    #[serde(rename = "tradeId")]
    pub trade_id: String,
    #[serde(rename = "instId")]
    pub inst_id: String,
    #[serde(rename = "ordId")]
    pub ord_id: String,
    #[serde(rename = "clOrdId")]
    pub cl_ord_id: String,
    pub side: String, // "buy" | "sell"
    #[serde(rename = "fillPx")]
    pub fill_px: String,
    #[serde(rename = "fillSz")]
    pub fill_sz: String,
    #[serde(default)]
    pub fee: String,
    #[serde(rename = "feeCcy", default)]
    pub fee_ccy: String,
    #[serde(rename = "ts", with = "ts_string")]
    pub ts: i64,
}

/// 외부 주문 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalOrderState {
    Live,
    Filled,
    Canceled,
}

/// 주문 접수 사양
#[derive(Debug, Clone, Serialize)]
pub struct OrderSpec {
    pub inst_id: String,
    pub side: String,
    pub ord_type: String,
    pub price: Option<String>,
    pub size: String,
    pub cl_ord_id: String,
}

/// 접수/취소 응답
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    #[serde(rename = "ordId")]
    pub ord_id: String,
    #[serde(rename = "clOrdId", default)]
    pub cl_ord_id: String,
}

/// 1분봉
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// 공개 스트림 체결 프린트
#[derive(Debug, Clone)]
pub struct TradePrint {
    pub id: String,
    pub price: String,
    pub volume: String,
    pub side: String,
    pub ts: i64,
}

/// 커넥터 → 캐시 피드 시장 데이터 이벤트
#[derive(Debug, Clone)]
pub enum MarketFeedEvent {
    TradePrint { market: String, print: TradePrint },
    BookSnapshot { market: String, asks: Vec<(String, String)>, bids: Vec<(String, String)> },
    /// 수량 "0"은 해당 레벨 제거를 의미
    BookDelta { market: String, asks: Vec<(String, String)>, bids: Vec<(String, String)> },
    Candle { market: String, candle: Candle },
    Ticker { market: String, last: String, open_24h: String, high_24h: String, low_24h: String, vol_24h: String },
    Instruments { markets: Vec<String> },
}

/// 거래소 커넥터 공통 인터페이스
#[allow(async_fn_in_trait)]
pub trait Connector: Send + Sync {
    /// 거래소 식별 코드 (예: "okx")
    fn exchange_code(&self) -> &str;

    /// begin_ms 이후의 체결 이력 조회
    async fn fetch_fills_since(&self, begin_ms: i64) -> Result<Vec<Fill>, ConnectorError>;

    /// 외부 주문 상태 조회
    async fn fetch_order_state(
        &self,
        inst_id: &str,
        ord_id: &str,
    ) -> Result<ExternalOrderState, ConnectorError>;

    /// 주문 접수
    async fn place_order(&self, spec: &OrderSpec) -> Result<OrderAck, ConnectorError>;

    /// 주문 취소
    async fn cancel_order(&self, inst_id: &str, ord_id: &str) -> Result<OrderAck, ConnectorError>;
}

/// OKX 스타일 REST 커넥터
pub struct OkxConnector {
    code: String,
    rest_url: String,
    client: reqwest::Client,
}

/// OKX 공통 응답 포맷
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct OkxEnvelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct OkxOrderDetail {
    state: String,
}

impl OkxConnector {
    pub fn new(code: &str, rest_url: &str) -> Self {
        Self {
            code: code.to_string(),
            rest_url: rest_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_data<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, ConnectorError> {
        let url = format!("{}{}", self.rest_url, path);
        let envelope: OkxEnvelope<T> = self.client.get(&url).send().await?.json().await?;
        if envelope.code != "0" {
            return Err(ConnectorError::Remote { code: envelope.code, message: envelope.msg });
        }
        Ok(envelope.data)
    }
}

impl Connector for OkxConnector {
    fn exchange_code(&self) -> &str {
        &self.code
    }

    async fn fetch_fills_since(&self, begin_ms: i64) -> Result<Vec<Fill>, ConnectorError> {
        self.get_data(&format!("/api/v5/trade/fills-history?instType=SPOT&begin={}", begin_ms))
            .await
    }

    async fn fetch_order_state(
        &self,
        inst_id: &str,
        ord_id: &str,
    ) -> Result<ExternalOrderState, ConnectorError> {
        let details: Vec<OkxOrderDetail> = self
            .get_data(&format!("/api/v5/trade/order?instId={}&ordId={}", inst_id, ord_id))
            .await?;
        let detail = details
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::Decode("주문 상태 응답이 비어 있음".to_string()))?;
        match detail.state.as_str() {
            "live" | "partially_filled" => Ok(ExternalOrderState::Live),
            "filled" => Ok(ExternalOrderState::Filled),
            "canceled" | "mmp_canceled" => Ok(ExternalOrderState::Canceled),
            other => Err(ConnectorError::Decode(format!("알 수 없는 주문 상태: {}", other))),
        }
    }

    async fn place_order(&self, spec: &OrderSpec) -> Result<OrderAck, ConnectorError> {
        let mut body = serde_json::json!({
            "instId": spec.inst_id,
            "tdMode": "cash",
            "side": spec.side,
            "ordType": spec.ord_type,
            "sz": spec.size,
            "clOrdId": spec.cl_ord_id,
        });
        if let Some(price) = &spec.price {
            body["px"] = serde_json::Value::String(price.clone());
        }

        let url = format!("{}/api/v5/trade/order", self.rest_url);
        let envelope: OkxEnvelope<OrderAck> =
            self.client.post(&url).json(&body).send().await?.json().await?;
        if envelope.code != "0" {
            return Err(ConnectorError::Remote { code: envelope.code, message: envelope.msg });
        }
        envelope
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::Decode("주문 접수 응답이 비어 있음".to_string()))
    }

    async fn cancel_order(&self, inst_id: &str, ord_id: &str) -> Result<OrderAck, ConnectorError> {
        let body = serde_json::json!({ "instId": inst_id, "ordId": ord_id });
        let url = format!("{}/api/v5/trade/cancel-order", self.rest_url);
        let envelope: OkxEnvelope<OrderAck> =
            self.client.post(&url).json(&body).send().await?.json().await?;
        if envelope.code != "0" {
            return Err(ConnectorError::Remote { code: envelope.code, message: envelope.msg });
        }
        envelope
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::Decode("주문 취소 응답이 비어 있음".to_string()))
    }
}

/// ts 필드가 문자열 밀리초로 오는 응답 처리
mod ts_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<i64>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_decodes_exchange_payload() {
        let raw = r#"{
            "tradeId": "998877",
            "instId": "BTC-USDT",
            "ordId": "445566",
            "clOrdId": "e847386590ce4dBCm501o77",
            "side": "sell",
            "fillPx": "20000",
            "fillSz": "0.01",
            "fee": "-0.4",
            "feeCcy": "USDT",
            "ts": "1700000000000"
        }"#;

        let fill: Fill = serde_json::from_str(raw).unwrap();
        assert_eq!(fill.trade_id, "998877");
        assert_eq!(fill.cl_ord_id, "e847386590ce4dBCm501o77");
        assert_eq!(fill.ts, 1_700_000_000_000);
    }

    #[test]
    fn test_transient_classification() {
        let remote = ConnectorError::Remote { code: "51000".into(), message: "bad".into() };
        assert!(!remote.is_transient());
        assert!(ConnectorError::Ws("연결 끊김".into()).is_transient());
    }
}
