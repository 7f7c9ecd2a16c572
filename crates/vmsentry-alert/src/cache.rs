use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use vmsentry_common::types::{AlertCondition, AlertRule};

use crate::error::{AlertError, Result};
use crate::RuleRepository;

/// A rule together with its conditions, ordered by `sort_order`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRule {
    pub rule: AlertRule,
    pub conditions: Vec<AlertCondition>,
}

/// Immutable view of the enabled rules handed to one evaluation pass.
pub type RuleSnapshot = Arc<Vec<Arc<CachedRule>>>;

#[derive(Default)]
struct CacheState {
    rules: RuleSnapshot,
    loaded_at: Option<DateTime<Utc>>,
}

/// In-memory copy of the enabled rules.
///
/// Readers take an `Arc` of the current snapshot and never see a partially
/// rebuilt cache. A reload builds the next snapshot off to the side and
/// swaps it in only if every repository call succeeded.
pub struct RuleCache {
    repo: Arc<dyn RuleRepository>,
    state: RwLock<CacheState>,
}

impl RuleCache {
    pub fn new(repo: Arc<dyn RuleRepository>) -> Self {
        Self {
            repo,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Rebuilds the cache from the repository and returns the number of
    /// rules now cached. On failure the previous snapshot stays in place.
    pub async fn reload(&self) -> Result<usize> {
        let next = match self.load().await {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload alert rules, keeping previous snapshot");
                return Err(e);
            }
        };

        let count = next.len();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.rules = Arc::new(next);
            state.loaded_at = Some(Utc::now());
        }
        tracing::info!(count, "Alert rules loaded");
        Ok(count)
    }

    async fn load(&self) -> Result<Vec<Arc<CachedRule>>> {
        let rules = self
            .repo
            .list_enabled_rules()
            .await
            .map_err(AlertError::Repository)?;

        let mut loaded = Vec::with_capacity(rules.len());
        for rule in rules.into_iter().filter(|r| r.enabled) {
            if let Err(reason) = rule.validate() {
                tracing::warn!(rule_id = %rule.id, reason = %reason, "Skipping misconfigured alert rule");
                continue;
            }
            let mut conditions = self
                .repo
                .list_conditions(&rule.id)
                .await
                .map_err(AlertError::Repository)?;
            conditions.sort_by_key(|c| c.sort_order);
            loaded.push(Arc::new(CachedRule { rule, conditions }));
        }
        Ok(loaded)
    }

    /// The current snapshot. Cheap: clones one `Arc`.
    pub fn snapshot(&self) -> RuleSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state.rules)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the current snapshot was built, `None` before the first reload.
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .loaded_at
    }
}
