//! 세션 토큰 → 회원 id 해석
//!
//! 해석 실패는 "비인증"일 뿐이며 치명 오류가 아닙니다.

use log::warn;
use sqlx::sqlite::SqlitePool;

/// 세션 해석 인터페이스
#[allow(async_fn_in_trait)]
pub trait SessionResolver: Send + Sync {
    /// 토큰을 회원 id로 해석. 실패/만료는 None.
    async fn resolve_member_id(&self, token: &str) -> Option<i64>;
}

/// 회원 일련번호(sn)를 토큰으로 쓰는 해석기
pub struct SnSessionResolver {
    pool: SqlitePool,
}

impl SnSessionResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl SessionResolver for SnSessionResolver {
    async fn resolve_member_id(&self, token: &str) -> Option<i64> {
        match crate::db::repository::MemberRepository::find_by_sn(&self.pool, token).await {
            Ok(Some(member)) => Some(member.id),
            Ok(None) => None,
            Err(e) => {
                warn!("세션 해석 실패 (비인증으로 처리): {}", e);
                None
            }
        }
    }
}
