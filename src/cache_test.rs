use super::*;
use crate::net::types::{AccountType, Role};
use crate::storage::MemoryStorage;
use std::sync::Mutex;

// =========================================================================
// MockAuthority
// =========================================================================

enum Reply {
    Found(Identity),
    NotFound,
    Fail,
}

struct MockAuthority {
    reply: Reply,
    calls: Mutex<Vec<String>>,
}

impl MockAuthority {
    fn new(reply: Reply) -> Self {
        Self { reply, calls: Mutex::new(Vec::new()) }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Authority<Identity> for MockAuthority {
    async fn fetch(&self, id: &str) -> Result<Option<Identity>, ApiError> {
        self.calls.lock().unwrap().push(id.to_owned());
        match &self.reply {
            Reply::Found(identity) => Ok(Some(identity.clone())),
            Reply::NotFound => Ok(None),
            Reply::Fail => Err(ApiError::Request("connection refused".into())),
        }
    }
}

fn identity(id: &str, name: &str) -> Identity {
    Identity {
        id: id.to_owned(),
        display_name: name.to_owned(),
        account_type: AccountType::Guest,
        role: Role::Member,
        created_at: "2026-01-01T00:00:00Z".to_owned(),
        avatar_url: None,
        bio: None,
    }
}

fn cache_with(storage: &Arc<MemoryStorage>, value: Option<Identity>) -> ReconciledCache<Identity> {
    let mut cache = ReconciledCache::new(storage.clone(), "identity").with_dependents(["presence"]);
    if let Some(value) = value {
        cache.save(value).unwrap();
    }
    cache
}

// =========================================================================
// load / save / clear
// =========================================================================

#[test]
fn save_persists_envelope_layout() {
    let storage = Arc::new(MemoryStorage::new());
    cache_with(&storage, Some(identity("u1", "Alice")));
    let raw: Value = serde_json::from_str(&storage.read("identity").unwrap().unwrap()).unwrap();
    assert_eq!(raw["identity"]["id"], "u1");
    assert_eq!(raw["identity"]["displayName"], "Alice");
}

#[test]
fn load_reads_value_saved_by_previous_instance() {
    let storage = Arc::new(MemoryStorage::new());
    cache_with(&storage, Some(identity("u1", "Alice")));

    let mut reloaded: ReconciledCache<Identity> = ReconciledCache::new(storage.clone(), "identity");
    assert!(reloaded.get().is_none());
    assert_eq!(reloaded.load().map(|i| i.id), Some("u1".to_owned()));
    assert_eq!(reloaded.get().map(|i| i.display_name.as_str()), Some("Alice"));
}

#[test]
fn load_corrupt_document_is_empty() {
    let storage = Arc::new(MemoryStorage::new());
    storage.write("identity", "{\"identity\": 42}").unwrap();
    let mut cache: ReconciledCache<Identity> = ReconciledCache::new(storage.clone(), "identity");
    assert!(cache.load().is_none());
}

#[test]
fn load_null_envelope_is_empty() {
    let storage = Arc::new(MemoryStorage::new());
    storage.write("identity", "{\"identity\": null}").unwrap();
    let mut cache: ReconciledCache<Identity> = ReconciledCache::new(storage.clone(), "identity");
    assert!(cache.load().is_none());
}

#[test]
fn clear_removes_value_and_document() {
    let storage = Arc::new(MemoryStorage::new());
    let mut cache = cache_with(&storage, Some(identity("u1", "Alice")));
    cache.clear().unwrap();
    assert!(cache.get().is_none());
    assert!(storage.read("identity").unwrap().is_none());
}

// =========================================================================
// reconcile: the three outcomes
// =========================================================================

#[tokio::test]
async fn reconcile_not_found_clears_cache() {
    let storage = Arc::new(MemoryStorage::new());
    let mut cache = cache_with(&storage, Some(identity("u1", "Alice")));
    let authority = MockAuthority::new(Reply::NotFound);

    let outcome = cache.reconcile(&authority, "u1").await;

    assert_eq!(outcome, ReconcileOutcome::Cleared);
    assert!(cache.get().is_none());
    assert!(cache.load().is_none());
    assert_eq!(authority.calls(), vec!["u1".to_owned()]);
}

#[tokio::test]
async fn reconcile_not_found_clears_dependents() {
    let storage = Arc::new(MemoryStorage::new());
    storage.write("presence", "{\"pois\":[],\"currentUserPOI\":\"p1\"}").unwrap();
    let mut cache = cache_with(&storage, Some(identity("u1", "Alice")));

    cache.reconcile(&MockAuthority::new(Reply::NotFound), "u1").await;

    assert!(storage.read("presence").unwrap().is_none());
}

#[tokio::test]
async fn reconcile_error_keeps_cache_untouched() {
    let storage = Arc::new(MemoryStorage::new());
    storage.write("presence", "{}").unwrap();
    let mut cache = cache_with(&storage, Some(identity("u1", "Alice")));

    let outcome = cache.reconcile(&MockAuthority::new(Reply::Fail), "u1").await;

    assert!(matches!(outcome, ReconcileOutcome::Kept { .. }));
    assert_eq!(cache.get(), Some(&identity("u1", "Alice")));
    assert_eq!(cache.load(), Some(identity("u1", "Alice")));
    assert!(storage.read("presence").unwrap().is_some());
}

#[tokio::test]
async fn reconcile_found_replaces_with_authoritative_fields() {
    let storage = Arc::new(MemoryStorage::new());
    let mut cache = cache_with(&storage, Some(identity("u1", "Alice")));
    let mut fresh = identity("u1", "Alice Cooper");
    fresh.role = Role::Host;

    let outcome = cache.reconcile(&MockAuthority::new(Reply::Found(fresh.clone())), "u1").await;

    assert_eq!(outcome, ReconcileOutcome::Confirmed(fresh.clone()));
    assert_eq!(cache.get(), Some(&fresh));
    assert_eq!(cache.load(), Some(fresh));
}

#[tokio::test]
async fn reconcile_mismatched_id_keeps_cache() {
    let storage = Arc::new(MemoryStorage::new());
    let mut cache = cache_with(&storage, Some(identity("u1", "Alice")));

    let outcome = cache.reconcile(&MockAuthority::new(Reply::Found(identity("u2", "Mallory"))), "u1").await;

    assert!(matches!(outcome, ReconcileOutcome::Kept { .. }));
    assert_eq!(cache.get().map(|i| i.id.as_str()), Some("u1"));
}

// =========================================================================
// reconcile_with
// =========================================================================

#[tokio::test]
async fn reconcile_with_classifies_each_reply() {
    let found: Reconciliation<Identity> =
        reconcile_with(&MockAuthority::new(Reply::Found(identity("u1", "A"))), "u1").await;
    assert!(matches!(found, Reconciliation::Confirmed(_)));

    let absent: Reconciliation<Identity> = reconcile_with(&MockAuthority::new(Reply::NotFound), "u1").await;
    assert_eq!(absent, Reconciliation::Absent);

    let failed: Reconciliation<Identity> = reconcile_with(&MockAuthority::new(Reply::Fail), "u1").await;
    let Reconciliation::Unavailable { reason } = failed else {
        panic!("expected unavailable");
    };
    assert!(reason.contains("E_API_REQUEST"));
}

#[tokio::test]
async fn reconcile_with_accepts_trait_objects() {
    let authority: Arc<dyn Authority<Identity>> = Arc::new(MockAuthority::new(Reply::NotFound));
    let result: Reconciliation<Identity> = reconcile_with(authority.as_ref(), "u1").await;
    assert_eq!(result, Reconciliation::Absent);
}
