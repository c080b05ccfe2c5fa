//! 회원 주문 캐시
//!
//! (회원, 종목) 단위로 미체결/종결 주문을 보관합니다. 트림 시 미체결
//! 최대 100건 + 종결 최대 100건, 미체결 먼저, 각각 최신순입니다.

use serde::{Deserialize, Serialize};

use crate::cache::book::{DiffPolicy, SnapshotBook};

/// 상태별 보존 건수
pub const ORDER_LIMIT: usize = 100;

/// 캐시용 주문 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub id: i64,
    pub market: String,
    pub side: String,
    pub price: Option<String>,
    pub volume: String,
    pub origin_volume: String,
    pub state: String,
    pub ord_type: String,
    pub created_at: i64,
}

impl OrderEntry {
    pub fn is_pending(&self) -> bool {
        self.state == "wait"
    }
}

/// 캐시 키: "회원ID:종목심볼"
pub fn order_key(member_id: i64, market: &str) -> String {
    format!("{}:{}", member_id, market)
}

pub fn new_order_book() -> SnapshotBook<OrderEntry> {
    SnapshotBook::new(
        "order_book",
        DiffPolicy::ALL,
        Box::new(|order: &OrderEntry| order.id.to_string()),
        Box::new(|a: &OrderEntry, b: &OrderEntry| {
            a.id == b.id && a.price == b.price && a.volume == b.volume && a.state == b.state
        }),
        Box::new(|_key, orders| trim_orders(orders)),
    )
}

fn trim_orders(orders: Vec<OrderEntry>) -> Vec<OrderEntry> {
    let (mut pending, mut closed): (Vec<OrderEntry>, Vec<OrderEntry>) =
        orders.into_iter().partition(|order| order.is_pending());

    // 최신순: 생성 시각 내림차순, 동시각이면 id 내림차순
    let newest_first =
        |a: &OrderEntry, b: &OrderEntry| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id));
    pending.sort_by(newest_first);
    closed.sort_by(newest_first);
    pending.truncate(ORDER_LIMIT);
    closed.truncate(ORDER_LIMIT);

    pending.into_iter().chain(closed).collect()
}
