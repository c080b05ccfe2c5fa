//! 스냅샷/차분 캐시 공통 컨테이너
//!
//! 키(종목 또는 회원)별로 현재 스냅샷과 마지막 갱신의 차분을 함께 보관합니다.
//! 서브타입별 동작(동일성 판정, 트림, 차분 종류)은 생성 시점에 전략으로
//! 주입되며, 갱신 중 오류가 나면 이전 스냅샷을 그대로 유지하고 false를
//! 반환합니다.

use std::collections::HashMap;

use log::error;

/// 서브타입이 계산하는 차분 종류 선택
#[derive(Debug, Clone, Copy)]
pub struct DiffPolicy {
    pub add: bool,
    pub remove: bool,
    pub update: bool,
}

impl DiffPolicy {
    pub const ALL: DiffPolicy = DiffPolicy { add: true, remove: true, update: true };
}

/// 직전 스냅샷 대비 차분
#[derive(Debug, Clone)]
pub struct Difference<T: Clone> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub updated: Vec<T>,
}

impl<T: Clone> Default for Difference<T> {
    fn default() -> Self {
        Self { added: Vec::new(), removed: Vec::new(), updated: Vec::new() }
    }
}

impl<T: Clone> Difference<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

type IdentFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;
type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;
type TrimFn<T> = Box<dyn Fn(&str, Vec<T>) -> Vec<T> + Send + Sync>;

struct Entry<T: Clone> {
    snapshot: Vec<T>,
    difference: Difference<T>,
}

impl<T: Clone> Default for Entry<T> {
    fn default() -> Self {
        Self { snapshot: Vec::new(), difference: Difference::default() }
    }
}

/// 키별 스냅샷/차분 캐시
pub struct SnapshotBook<T: Clone> {
    name: &'static str,
    policy: DiffPolicy,
    ident: IdentFn<T>,
    equals: EqualsFn<T>,
    trim: TrimFn<T>,
    entries: HashMap<String, Entry<T>>,
}

impl<T: Clone> SnapshotBook<T> {
    pub fn new(
        name: &'static str,
        policy: DiffPolicy,
        ident: IdentFn<T>,
        equals: EqualsFn<T>,
        trim: TrimFn<T>,
    ) -> Self {
        Self { name, policy, ident, equals, trim, entries: HashMap::new() }
    }

    /// 스냅샷 전체 교체. 직전 스냅샷 대비 차분을 계산해 저장합니다.
    pub fn update_all(&mut self, key: &str, new_data: Vec<T>) -> bool {
        let working = (self.trim)(key, new_data);
        if let Err(dup) = self.check_identities(&working) {
            error!("[{}] 캐시 갱신 실패: 식별자 중복 {} (key={})", self.name, dup, key);
            return false;
        }

        let prior = self.entries.get(key).map(|e| e.snapshot.as_slice()).unwrap_or(&[]);
        let difference = self.diff(prior, &working);

        self.entries.insert(key.to_string(), Entry { snapshot: working, difference });
        true
    }

    /// 증분 차분을 스냅샷에 직접 반영. 사전 스냅샷이 없으면 새로 만듭니다.
    pub fn update_by_difference(&mut self, key: &str, delta: Difference<T>) -> bool {
        let prior = self.entries.get(key).map(|e| e.snapshot.clone()).unwrap_or_default();
        let mut working = prior;

        if self.policy.remove {
            for item in &delta.removed {
                let id = (self.ident)(item);
                working.retain(|existing| (self.ident)(existing) != id);
            }
        }
        if self.policy.update {
            for item in &delta.updated {
                let id = (self.ident)(item);
                match working.iter_mut().find(|existing| (self.ident)(existing) == id) {
                    Some(slot) => *slot = item.clone(),
                    None => working.push(item.clone()),
                }
            }
        }
        if self.policy.add {
            for item in &delta.added {
                let id = (self.ident)(item);
                match working.iter_mut().find(|existing| (self.ident)(existing) == id) {
                    Some(slot) => *slot = item.clone(),
                    None => working.push(item.clone()),
                }
            }
        }

        let working = (self.trim)(key, working);
        if let Err(dup) = self.check_identities(&working) {
            error!("[{}] 증분 갱신 실패: 식별자 중복 {} (key={})", self.name, dup, key);
            return false;
        }

        let difference = self.filter_by_policy(delta);
        self.entries.insert(key.to_string(), Entry { snapshot: working, difference });
        true
    }

    /// 현재 스냅샷 복사본 조회 (캐시 상태는 변경되지 않음)
    pub fn snapshot(&self, key: &str) -> Vec<T> {
        self.entries.get(key).map(|e| e.snapshot.clone()).unwrap_or_default()
    }

    /// 마지막 갱신의 차분 복사본 조회. 반복 호출해도 같은 차분을 돌려줍니다.
    pub fn difference(&self, key: &str) -> Difference<T> {
        self.entries.get(key).map(|e| e.difference.clone()).unwrap_or_default()
    }

    /// 보유 중인 키 목록
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn diff(&self, prior: &[T], current: &[T]) -> Difference<T> {
        let mut difference = Difference::default();

        let prior_index: HashMap<String, &T> =
            prior.iter().map(|item| ((self.ident)(item), item)).collect();
        let current_index: HashMap<String, &T> =
            current.iter().map(|item| ((self.ident)(item), item)).collect();

        if self.policy.add || self.policy.update {
            for item in current {
                match prior_index.get(&(self.ident)(item)) {
                    None => {
                        if self.policy.add {
                            difference.added.push(item.clone());
                        }
                    }
                    Some(old) => {
                        if self.policy.update && !(self.equals)(old, item) {
                            difference.updated.push(item.clone());
                        }
                    }
                }
            }
        }
        if self.policy.remove {
            for item in prior {
                if !current_index.contains_key(&(self.ident)(item)) {
                    difference.removed.push(item.clone());
                }
            }
        }

        difference
    }

    fn filter_by_policy(&self, mut delta: Difference<T>) -> Difference<T> {
        if !self.policy.add {
            delta.added.clear();
        }
        if !self.policy.remove {
            delta.removed.clear();
        }
        if !self.policy.update {
            delta.updated.clear();
        }
        delta
    }

    fn check_identities(&self, items: &[T]) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for item in items {
            let id = (self.ident)(item);
            if !seen.insert(id.clone()) {
                return Err(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
        value: i64,
    }

    fn test_book(policy: DiffPolicy) -> SnapshotBook<Row> {
        SnapshotBook::new(
            "test",
            policy,
            Box::new(|row: &Row| row.id.to_string()),
            Box::new(|a: &Row, b: &Row| a.value == b.value),
            Box::new(|_key, rows| rows),
        )
    }

    #[test]
    fn test_update_all_computes_full_difference() {
        let mut book = test_book(DiffPolicy::ALL);

        assert!(book.update_all("btcusdt", vec![Row { id: 1, value: 10 }, Row { id: 2, value: 20 }]));
        let diff = book.difference("btcusdt");
        assert_eq!(diff.added.len(), 2);
        assert!(diff.removed.is_empty());
        assert!(diff.updated.is_empty());

        assert!(book.update_all("btcusdt", vec![Row { id: 2, value: 25 }, Row { id: 3, value: 30 }]));
        let diff = book.difference("btcusdt");
        assert_eq!(diff.added, vec![Row { id: 3, value: 30 }]);
        assert_eq!(diff.removed, vec![Row { id: 1, value: 10 }]);
        assert_eq!(diff.updated, vec![Row { id: 2, value: 25 }]);
    }

    #[test]
    fn test_policy_masks_difference_kinds() {
        let mut book = test_book(DiffPolicy { add: true, remove: false, update: true });

        book.update_all("k", vec![Row { id: 1, value: 1 }]);
        book.update_all("k", vec![Row { id: 2, value: 2 }]);
        let diff = book.difference("k");
        assert_eq!(diff.added.len(), 1);
        assert!(diff.removed.is_empty(), "remove 정책이 꺼져 있으면 removed는 비어야 함");
    }

    #[test]
    fn test_update_by_difference_lazy_init() {
        let mut book = test_book(DiffPolicy::ALL);

        // 사전 스냅샷 없이 증분 반영
        let delta = Difference {
            added: vec![Row { id: 7, value: 70 }],
            removed: vec![],
            updated: vec![],
        };
        assert!(book.update_by_difference("fresh", delta));
        assert_eq!(book.snapshot("fresh"), vec![Row { id: 7, value: 70 }]);
    }

    #[test]
    fn test_update_by_difference_applies_all_kinds() {
        let mut book = test_book(DiffPolicy::ALL);
        book.update_all("k", vec![Row { id: 1, value: 1 }, Row { id: 2, value: 2 }]);

        let delta = Difference {
            added: vec![Row { id: 3, value: 3 }],
            removed: vec![Row { id: 1, value: 1 }],
            updated: vec![Row { id: 2, value: 22 }],
        };
        assert!(book.update_by_difference("k", delta));

        let snapshot = book.snapshot("k");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&Row { id: 2, value: 22 }));
        assert!(snapshot.contains(&Row { id: 3, value: 3 }));
    }

    #[test]
    fn test_failed_update_leaves_prior_state() {
        let mut book = test_book(DiffPolicy::ALL);
        book.update_all("k", vec![Row { id: 1, value: 1 }]);

        // 식별자 중복은 내부 오류로 처리되고 이전 상태가 유지됨
        let ok = book.update_all("k", vec![Row { id: 9, value: 1 }, Row { id: 9, value: 2 }]);
        assert!(!ok);
        assert_eq!(book.snapshot("k"), vec![Row { id: 1, value: 1 }]);
    }

    #[test]
    fn test_difference_is_stable_across_reads() {
        let mut book = test_book(DiffPolicy::ALL);
        book.update_all("k", vec![Row { id: 1, value: 1 }]);

        let first = book.difference("k");
        let second = book.difference("k");
        assert_eq!(first.added.len(), second.added.len());
        assert_eq!(book.snapshot("k").len(), 1);
    }

    #[test]
    fn test_trim_applied_on_update() {
        let mut book = SnapshotBook::new(
            "trimmed",
            DiffPolicy::ALL,
            Box::new(|row: &Row| row.id.to_string()),
            Box::new(|a: &Row, b: &Row| a.value == b.value),
            Box::new(|_key, mut rows: Vec<Row>| {
                rows.sort_by(|a, b| b.value.cmp(&a.value));
                rows.truncate(2);
                rows
            }),
        );

        book.update_all("k", (1..=5).map(|i| Row { id: i, value: i as i64 }).collect());
        let snapshot = book.snapshot("k");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].value, 5);
        assert_eq!(snapshot[1].value, 4);
    }
}
