use super::{RegistrySchema, RegistryTransport, SchemaVersion, SubjectSchema};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Snapshot of the requests an [`InMemoryRegistry`] has served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub schema_by_id: usize,
    pub subject_version: usize,
    pub register: usize,
    pub lookup_schema: usize,
    pub check_compatibility: usize,
}

impl RequestCounts {
    pub fn total(&self) -> usize {
        self.schema_by_id
            + self.subject_version
            + self.register
            + self.lookup_schema
            + self.check_compatibility
    }
}

#[derive(Default)]
struct Counters {
    schema_by_id: AtomicUsize,
    subject_version: AtomicUsize,
    register: AtomicUsize,
    lookup_schema: AtomicUsize,
    check_compatibility: AtomicUsize,
}

#[derive(Default)]
struct State {
    next_id: u32,
    schemas: HashMap<u32, RegistrySchema>,
    ids_by_fingerprint: HashMap<String, u32>,
    /// Schema ids per subject; version `n` is at index `n - 1`
    subjects: HashMap<String, Vec<u32>>,
    lookups_by_id: HashMap<u32, usize>,
}

/// A schema registry held in process memory
///
/// Follows the registry's id and version rules: identical schemas share one
/// id across subjects, registering a schema a subject already has returns
/// the existing id, and versions count from 1. Used for `mock://` urls and
/// in tests, where its request counters and artificial latency help check
/// caching and cancellation.
pub struct InMemoryRegistry {
    state: Mutex<State>,
    counters: Counters,
    latency_ms: AtomicU64,
    compatible: AtomicBool,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRegistry")
            .field("requests", &self.requests())
            .finish()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..Default::default()
            }),
            counters: Counters::default(),
            latency_ms: AtomicU64::new(0),
            compatible: AtomicBool::new(true),
        }
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Answer of every subsequent compatibility check.
    pub fn set_compatible(&self, compatible: bool) {
        self.compatible.store(compatible, Ordering::SeqCst);
    }

    pub fn requests(&self) -> RequestCounts {
        RequestCounts {
            schema_by_id: self.counters.schema_by_id.load(Ordering::SeqCst),
            subject_version: self.counters.subject_version.load(Ordering::SeqCst),
            register: self.counters.register.load(Ordering::SeqCst),
            lookup_schema: self.counters.lookup_schema.load(Ordering::SeqCst),
            check_compatibility: self.counters.check_compatibility.load(Ordering::SeqCst),
        }
    }

    /// Number of `GET /schemas/ids/{id}` requests served for `id`.
    pub fn lookups_for_id(&self, id: u32) -> usize {
        self.lock()
            .map(|state| state.lookups_by_id.get(&id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of versions registered under `subject`.
    pub fn versions(&self, subject: &str) -> usize {
        self.lock()
            .map(|state| state.subjects.get(subject).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Store `schema` under `subject` with a caller-chosen id, as if it had
    /// been registered by another client. Returns the new version.
    pub fn insert_with_id(&self, subject: &str, id: u32, schema: RegistrySchema) -> Result<i32> {
        let mut state = self.lock()?;
        let fingerprint = schema.fingerprint();
        if let Some(existing) = state.ids_by_fingerprint.get(&fingerprint) {
            if *existing != id {
                return Err(registry_error(
                    409,
                    format!("schema already registered with id {existing}"),
                ));
            }
        }
        if state.schemas.get(&id).is_some_and(|s| s.fingerprint() != fingerprint) {
            return Err(registry_error(409, format!("id {id} is taken")));
        }
        state.schemas.insert(id, schema);
        state.ids_by_fingerprint.insert(fingerprint, id);
        state.next_id = state.next_id.max(id + 1);
        let versions = state.subjects.entry(subject.to_string()).or_default();
        versions.push(id);
        Ok(versions.len() as i32)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| registry_error(500, "registry state poisoned".to_string()))
    }

    async fn delay(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn subject_schema(state: &State, subject: &str, index: usize) -> Option<SubjectSchema> {
        let id = *state.subjects.get(subject)?.get(index)?;
        Some(SubjectSchema {
            subject: subject.to_string(),
            id,
            version: index as i32 + 1,
            schema: state.schemas.get(&id)?.clone(),
        })
    }

    fn check_references(state: &State, schema: &RegistrySchema) -> Result<()> {
        for reference in &schema.references {
            let exists = state
                .subjects
                .get(&reference.subject)
                .is_some_and(|versions| {
                    reference.version >= 1 && versions.len() >= reference.version as usize
                });
            if !exists {
                return Err(Error::Registry {
                    status: 422,
                    error_code: Some(42201),
                    message: format!(
                        "Invalid schema: reference {} to {} version {} does not exist",
                        reference.name, reference.subject, reference.version
                    ),
                });
            }
        }
        Ok(())
    }
}

fn registry_error(status: u16, message: String) -> Error {
    Error::Registry {
        status,
        error_code: Some(status as u32),
        message,
    }
}

fn subject_not_found(subject: &str) -> Error {
    Error::SchemaNotFound {
        what: format!("subject {subject}"),
        error_code: Some(40401),
    }
}

#[async_trait]
impl RegistryTransport for InMemoryRegistry {
    async fn schema_by_id(&self, id: u32) -> Result<RegistrySchema> {
        self.counters.schema_by_id.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut state = self.lock()?;
        *state.lookups_by_id.entry(id).or_default() += 1;
        state
            .schemas
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::SchemaNotFound {
                what: format!("schema id {id}"),
                error_code: Some(40403),
            })
    }

    async fn subject_version(&self, subject: &str, version: SchemaVersion) -> Result<SubjectSchema> {
        self.counters.subject_version.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let state = self.lock()?;
        let versions = state
            .subjects
            .get(subject)
            .ok_or_else(|| subject_not_found(subject))?;
        let index = match version {
            SchemaVersion::Latest => versions.len().checked_sub(1),
            SchemaVersion::Number(v) if v >= 1 => Some(v as usize - 1),
            SchemaVersion::Number(_) => None,
        };
        index
            .and_then(|index| Self::subject_schema(&state, subject, index))
            .ok_or_else(|| Error::SchemaNotFound {
                what: format!("subject {subject} version {version}"),
                error_code: Some(40402),
            })
    }

    async fn register(&self, subject: &str, schema: &RegistrySchema, _normalize: bool) -> Result<u32> {
        self.counters.register.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut state = self.lock()?;
        Self::check_references(&state, schema)?;

        let fingerprint = schema.fingerprint();
        let id = match state.ids_by_fingerprint.get(&fingerprint) {
            Some(id) => *id,
            None => {
                let id = state.next_id;
                state.next_id += 1;
                state.schemas.insert(id, schema.clone());
                state.ids_by_fingerprint.insert(fingerprint, id);
                id
            }
        };

        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
            debug!(
                "In-memory registry: {subject} version {} is schema id {id}",
                versions.len()
            );
        }
        Ok(id)
    }

    async fn lookup_schema(
        &self,
        subject: &str,
        schema: &RegistrySchema,
        _normalize: bool,
    ) -> Result<SubjectSchema> {
        self.counters.lookup_schema.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let state = self.lock()?;
        let versions = state
            .subjects
            .get(subject)
            .ok_or_else(|| subject_not_found(subject))?;
        let fingerprint = schema.fingerprint();
        versions
            .iter()
            .position(|id| state.ids_by_fingerprint.get(&fingerprint) == Some(id))
            .and_then(|index| Self::subject_schema(&state, subject, index))
            .ok_or_else(|| Error::SchemaNotFound {
                what: format!("schema under subject {subject}"),
                error_code: Some(40403),
            })
    }

    async fn check_compatibility(&self, subject: &str, _schema: &RegistrySchema) -> Result<bool> {
        self.counters.check_compatibility.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let state = self.lock()?;
        if !state.subjects.contains_key(subject) {
            return Err(subject_not_found(subject));
        }
        Ok(self.compatible.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaReference;

    fn schema(text: &str) -> RegistrySchema {
        RegistrySchema::protobuf(text, vec![])
    }

    #[tokio::test]
    async fn test_register_assigns_ids_and_versions() {
        let registry = InMemoryRegistry::new();
        let a = registry.register("users-value", &schema("a"), false).await.unwrap();
        let b = registry.register("users-value", &schema("b"), false).await.unwrap();
        assert_eq!((a, b), (1, 2));

        // Same schema again: same id, no new version
        assert_eq!(registry.register("users-value", &schema("a"), false).await.unwrap(), 1);
        let latest = registry
            .subject_version("users-value", SchemaVersion::Latest)
            .await
            .unwrap();
        assert_eq!((latest.id, latest.version), (2, 2));

        // Same schema in another subject shares the id
        assert_eq!(registry.register("orders-value", &schema("a"), false).await.unwrap(), 1);
        let first = registry
            .subject_version("orders-value", SchemaVersion::Number(1))
            .await
            .unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(registry.requests().register, 4);
    }

    #[tokio::test]
    async fn test_not_found_codes() {
        let registry = InMemoryRegistry::new();
        let err = registry.schema_by_id(7).await.unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { error_code: Some(40403), .. }));

        let err = registry
            .subject_version("missing", SchemaVersion::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { error_code: Some(40401), .. }));

        registry.register("users-value", &schema("a"), false).await.unwrap();
        let err = registry
            .subject_version("users-value", SchemaVersion::Number(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { error_code: Some(40402), .. }));

        let err = registry
            .lookup_schema("users-value", &schema("b"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { error_code: Some(40403), .. }));
    }

    #[tokio::test]
    async fn test_lookup_schema_returns_version() {
        let registry = InMemoryRegistry::new();
        registry.register("users-value", &schema("a"), false).await.unwrap();
        registry.register("users-value", &schema("b"), false).await.unwrap();
        let found = registry
            .lookup_schema("users-value", &schema("a"), false)
            .await
            .unwrap();
        assert_eq!((found.id, found.version), (1, 1));
    }

    #[tokio::test]
    async fn test_missing_reference_is_rejected() {
        let registry = InMemoryRegistry::new();
        let with_ref = RegistrySchema::protobuf(
            "import \"dep.proto\";",
            vec![SchemaReference {
                name: "dep.proto".to_string(),
                subject: "dep.proto".to_string(),
                version: 1,
            }],
        );
        let err = registry.register("users-value", &with_ref, false).await.unwrap_err();
        assert!(matches!(err, Error::Registry { status: 422, .. }));

        registry.register("dep.proto", &schema("dep"), false).await.unwrap();
        assert!(registry.register("users-value", &with_ref, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_with_id_and_counters() {
        let registry = InMemoryRegistry::new();
        assert_eq!(registry.insert_with_id("users-value", 7, schema("a")).unwrap(), 1);
        registry.schema_by_id(7).await.unwrap();
        registry.schema_by_id(7).await.unwrap();
        assert_eq!(registry.lookups_for_id(7), 2);
        assert_eq!(registry.lookups_for_id(8), 0);

        // New registrations continue after the inserted id
        assert_eq!(registry.register("users-value", &schema("b"), false).await.unwrap(), 8);
        assert_eq!(registry.requests().total(), 3);
    }

    #[tokio::test]
    async fn test_compatibility_switch() {
        let registry = InMemoryRegistry::new();
        assert!(registry
            .check_compatibility("users-value", &schema("a"))
            .await
            .is_err());
        registry.register("users-value", &schema("a"), false).await.unwrap();
        assert!(registry
            .check_compatibility("users-value", &schema("b"))
            .await
            .unwrap());
        registry.set_compatible(false);
        assert!(!registry
            .check_compatibility("users-value", &schema("b"))
            .await
            .unwrap());
    }
}
