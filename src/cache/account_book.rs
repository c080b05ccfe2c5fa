//! 회원 잔고 캐시
//!
//! 회원 키 아래 통화당 한 줄. balance/locked가 달라지면 갱신으로 판정하며
//! 트림은 없습니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cache::book::{DiffPolicy, SnapshotBook};

/// 통화별 잔고 한 줄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub currency: String,
    pub balance: Decimal,
    pub locked: Decimal,
}

/// 캐시 키: 회원 id
pub fn account_key(member_id: i64) -> String {
    member_id.to_string()
}

pub fn new_account_book() -> SnapshotBook<AccountEntry> {
    SnapshotBook::new(
        "account_book",
        DiffPolicy::ALL,
        Box::new(|account: &AccountEntry| account.currency.clone()),
        Box::new(|a: &AccountEntry, b: &AccountEntry| {
            a.currency == b.currency && a.balance == b.balance && a.locked == b.locked
        }),
        Box::new(|_key, accounts| accounts),
    )
}
