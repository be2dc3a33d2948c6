//! Cache-aside administrator lookup.
//!
//! Every inbound event in a group may need an "is this user an admin?" check.
//! Answers are cached in the [`KvStore`] under `admin:{chat}:{user}` as `"1"`
//! or `"0"` for a short TTL so repeat checks cost no network round trip.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::bot::Bot;
use crate::store::KvStore;

/// Default lifetime of a cached answer.
pub const DEFAULT_ADMIN_TTL: Duration = Duration::from_secs(120);

const ADMIN_VALUE: &str = "1";
const MEMBER_VALUE: &str = "0";

fn cache_key(chat_id: i64, user_id: i64) -> String {
    format!("admin:{chat_id}:{user_id}")
}

/// Administrator check backed by the store and `getChatMember`.
#[derive(Clone)]
pub struct PermissionCache {
    store: Arc<dyn KvStore>,
    bot: Bot,
    ttl: Duration,
}

impl PermissionCache {
    pub fn new(store: Arc<dyn KvStore>, bot: Bot) -> Self {
        Self {
            store,
            bot,
            ttl: DEFAULT_ADMIN_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `user_id` administers `chat_id`.
    ///
    /// Fails closed: if the platform cannot be asked, the answer is `false`
    /// and nothing is cached, so the next call asks again. An unreadable
    /// cache counts as a miss.
    pub async fn is_admin(&self, chat_id: i64, user_id: i64) -> bool {
        let key = cache_key(chat_id, user_id);

        match self.store.get(&key).await {
            Ok(Some(value)) => return value == ADMIN_VALUE,
            Ok(None) => {}
            Err(error) => warn!(%key, %error, "Permission cache read failed, querying platform"),
        }

        let member = match self.bot.get_chat_member(chat_id, user_id).await {
            Ok(member) => member,
            Err(error) => {
                warn!(chat_id, user_id, %error, "getChatMember failed, denying");
                return false;
            }
        };

        let is_admin = member.is_admin();
        let value = if is_admin { ADMIN_VALUE } else { MEMBER_VALUE };
        if let Err(error) = self.store.set_ex(&key, value, self.ttl).await {
            warn!(%key, %error, "Permission cache write failed");
        }

        debug!(chat_id, user_id, is_admin, status = %member.status, "Resolved admin status");
        is_admin
    }

    /// Forgets the cached answer, e.g. right after a promote or demote.
    pub async fn invalidate(&self, chat_id: i64, user_id: i64) {
        let key = cache_key(chat_id, user_id);
        if let Err(error) = self.store.delete(&key).await {
            warn!(%key, %error, "Permission cache invalidation failed");
        }
    }
}

impl std::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockCaller;
    use crate::error::ApiError;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(status: &'static str) -> (PermissionCache, MockCaller, Arc<MemoryStore>) {
        let caller = MockCaller::new();
        caller.respond(
            "getChatMember",
            Ok(json!({"user": {"id": 2, "first_name": "Ann"}, "status": status})),
        );
        let store = Arc::new(MemoryStore::new());
        let cache = PermissionCache::new(store.clone(), Bot::new(Arc::new(caller.clone())));
        (cache, caller, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_within_ttl_then_refetch() {
        let (cache, caller, _) = setup("administrator");

        assert!(cache.is_admin(1, 2).await);
        assert_eq!(caller.count("getChatMember"), 1);

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(cache.is_admin(1, 2).await);
        assert_eq!(caller.count("getChatMember"), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.is_admin(1, 2).await);
        assert_eq!(caller.count("getChatMember"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() {
        let (cache, caller, _) = setup("member");

        assert!(!cache.is_admin(1, 2).await);
        cache.invalidate(1, 2).await;

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.is_admin(1, 2).await);
        assert_eq!(caller.count("getChatMember"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demotion_seen_right_after_invalidate() {
        let (cache, caller, _) = setup("administrator");
        let cache = cache.with_ttl(Duration::from_secs(120));

        assert!(cache.is_admin(-100, 2).await);
        assert_eq!(caller.count("getChatMember"), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        caller.respond(
            "getChatMember",
            Ok(json!({"user": {"id": 2, "first_name": "Ann"}, "status": "member"})),
        );
        cache.invalidate(-100, 2).await;

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.is_admin(-100, 2).await);
        assert_eq!(caller.count("getChatMember"), 2);
    }

    #[tokio::test]
    async fn test_creator_counts_as_admin() {
        let (cache, _, store) = setup("creator");
        assert!(cache.is_admin(-100, 2).await);
        assert_eq!(store.get("admin:-100:2").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_remote_failure_denies_without_caching() {
        let caller = MockCaller::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        caller.on("getChatMember", move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::Timeout)
            } else {
                Ok(json!({"status": "administrator"}))
            }
        });
        let store = Arc::new(MemoryStore::new());
        let cache = PermissionCache::new(store.clone(), Bot::new(Arc::new(caller)));

        assert!(!cache.is_admin(1, 2).await);
        assert!(store.is_empty());
        assert!(cache.is_admin(1, 2).await);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
