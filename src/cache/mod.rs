pub mod account_book;
pub mod book;
pub mod depth_book;
pub mod feed;
pub mod order_book;
pub mod ticker_book;
pub mod trade_tape;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::db::models::MarketRegistry;

use account_book::AccountEntry;
use book::SnapshotBook;
use depth_book::DepthLevel;
use order_book::OrderEntry;
use ticker_book::TickerEntry;
use trade_tape::TapeEntry;

/// 다섯 가지 특화 캐시 묶음
///
/// 스냅샷은 캐시 엔진만 변경하고, 외부에는 복사본만 나갑니다.
pub struct MarketCaches {
    pub depth: SnapshotBook<DepthLevel>,
    pub tape: SnapshotBook<TapeEntry>,
    pub ticker: SnapshotBook<TickerEntry>,
    pub orders: SnapshotBook<OrderEntry>,
    pub accounts: SnapshotBook<AccountEntry>,
}

impl MarketCaches {
    pub fn new(markets: MarketRegistry) -> Self {
        Self {
            depth: depth_book::new_depth_book(markets),
            tape: trade_tape::new_trade_tape(),
            ticker: ticker_book::new_ticker_book(),
            orders: order_book::new_order_book(),
            accounts: account_book::new_account_book(),
        }
    }
}

/// 공유 핸들. 쓰기는 피드 태스크 하나로 직렬화됩니다.
pub type SharedCaches = Arc<RwLock<MarketCaches>>;

pub fn shared(markets: MarketRegistry) -> SharedCaches {
    Arc::new(RwLock::new(MarketCaches::new(markets)))
}
