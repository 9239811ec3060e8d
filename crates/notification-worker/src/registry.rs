//! 订阅注册表
//!
//! 内存中维护 接收方 → 订阅分类集合 的映射，用于把带分类的通知展开为接收方集合。
//! 读操作共享读锁，写操作独占写锁；展开结果是调用时刻的快照。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use notifier_shared::observability::metrics;

use crate::model::{Category, RecipientId};

/// 订阅统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    pub total_recipients: usize,
    pub total_subscriptions: usize,
    pub by_category: BTreeMap<Category, usize>,
}

/// 单个接收方的订阅
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub recipient: RecipientId,
    pub categories: BTreeSet<Category>,
}

/// 订阅注册表
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<RecipientId, BTreeSet<Category>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅分类，返回是否为新增订阅
    pub fn subscribe(&self, recipient: RecipientId, category: Category) -> bool {
        let mut entries = self.entries.write();
        let added = entries.entry(recipient.clone()).or_default().insert(category);
        if added {
            metrics::set_subscriptions(count_subscriptions(&entries));
            info!(recipient = %recipient, category = %category, "新增订阅");
        }
        added
    }

    /// 取消订阅，返回是否确实移除了订阅；分类清空后移除该接收方
    pub fn unsubscribe(&self, recipient: &RecipientId, category: Category) -> bool {
        let mut entries = self.entries.write();
        let Some(categories) = entries.get_mut(recipient) else {
            return false;
        };
        let removed = categories.remove(&category);
        if categories.is_empty() {
            entries.remove(recipient);
        }
        if removed {
            metrics::set_subscriptions(count_subscriptions(&entries));
            info!(recipient = %recipient, category = %category, "取消订阅");
        }
        removed
    }

    /// 接收方当前订阅的分类
    pub fn list_subscriptions(&self, recipient: &RecipientId) -> BTreeSet<Category> {
        self.entries
            .read()
            .get(recipient)
            .cloned()
            .unwrap_or_default()
    }

    /// 订阅了某分类的全部接收方（调用时刻快照）
    pub fn recipients_for(&self, category: Category) -> BTreeSet<RecipientId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, categories)| categories.contains(&category))
            .map(|(recipient, _)| recipient.clone())
            .collect()
    }

    pub fn is_subscribed(&self, recipient: &RecipientId, category: Category) -> bool {
        self.entries
            .read()
            .get(recipient)
            .is_some_and(|categories| categories.contains(&category))
    }

    /// 移除接收方的全部订阅
    pub fn remove_recipient(&self, recipient: &RecipientId) -> bool {
        let mut entries = self.entries.write();
        let removed = entries.remove(recipient).is_some();
        if removed {
            metrics::set_subscriptions(count_subscriptions(&entries));
        }
        removed
    }

    /// 全部订阅，按接收方排序
    pub fn all_subscriptions(&self) -> Vec<Subscription> {
        let entries = self.entries.read();
        let mut all: Vec<_> = entries
            .iter()
            .map(|(recipient, categories)| Subscription {
                recipient: recipient.clone(),
                categories: categories.clone(),
            })
            .collect();
        all.sort_by(|a, b| a.recipient.cmp(&b.recipient));
        all
    }

    pub fn stats(&self) -> SubscriptionStats {
        let entries = self.entries.read();
        let mut by_category: BTreeMap<Category, usize> =
            Category::ALL.iter().map(|c| (*c, 0)).collect();
        for categories in entries.values() {
            for category in categories {
                *by_category.entry(*category).or_default() += 1;
            }
        }
        SubscriptionStats {
            total_recipients: entries.len(),
            total_subscriptions: count_subscriptions(&entries),
            by_category,
        }
    }
}

fn count_subscriptions(entries: &HashMap<RecipientId, BTreeSet<Category>>) -> usize {
    entries.values().map(BTreeSet::len).sum()
}
