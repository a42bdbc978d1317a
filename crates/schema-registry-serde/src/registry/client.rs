use super::{
    HttpTransport, InMemoryRegistry, RegistrySchema, RegistryTransport, SchemaDescriptor,
    SchemaVersion,
};
use crate::cache::SchemaCache;
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::proto::parser::DEFAULT_FILE_NAME;
use crate::proto::{is_well_known_import, ProtoParser};
use futures::future::BoxFuture;
use schema_registry_types::{ProtoDependency, ProtoSchema};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Deepest chain of schema references followed before giving up.
const MAX_REFERENCE_DEPTH: usize = 32;

/// File name of a root schema whose references already use `schema.proto`.
const FALLBACK_ROOT_FILE_NAME: &str = "root_schema.proto";

type LookupGates = Mutex<HashMap<u32, Arc<tokio::sync::Mutex<()>>>>;

struct Inner {
    transport: Arc<dyn RegistryTransport>,
    cache: SchemaCache,
    in_flight: LookupGates,
}

/// Cache-first schema registry client
///
/// Every operation except [`check_compatibility`](Self::check_compatibility)
/// consults the [`SchemaCache`] first and populates it from successful
/// responses. Cloning is cheap and clones share the cache.
#[derive(Clone)]
pub struct SchemaRegistryClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SchemaRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistryClient")
            .field("cache", &self.inner.cache)
            .field("pending_lookups", &self.pending_lookups())
            .finish()
    }
}

/// Per-id gate held while a lookup for that id is in flight.
///
/// Dropping the slot, including when the lookup future is abandoned, removes
/// the gate once nobody else is waiting on it.
struct InFlightSlot<'a> {
    gates: &'a LookupGates,
    id: u32,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let Ok(mut gates) = self.gates.lock() else {
            return;
        };
        // Clones are only made under this lock: two references means the map
        // entry and this slot.
        let last = gates
            .get(&self.id)
            .is_some_and(|gate| Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2);
        if last {
            gates.remove(&self.id);
        }
    }
}

impl SchemaRegistryClient {
    /// Client for the registry at `config.url`.
    ///
    /// A `mock://` url gets a fresh in-memory registry of its own.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let cache = SchemaCache::new(config.cache_capacity);
        let transport: Arc<dyn RegistryTransport> = if config.is_mock() {
            debug!("Using in-memory schema registry for {}", config.url);
            Arc::new(InMemoryRegistry::new())
        } else {
            Arc::new(HttpTransport::new(&config)?)
        };
        Ok(Self::with_transport(transport, cache))
    }

    pub fn with_transport(transport: Arc<dyn RegistryTransport>, cache: SchemaCache) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                cache,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.inner.cache
    }

    /// Number of schema ids with a lookup in flight.
    pub fn pending_lookups(&self) -> usize {
        self.inner.in_flight.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Register `schema` under `subject`, returning its id.
    ///
    /// An already registered schema returns its existing id. `normalize` asks
    /// the registry to normalize the schema first.
    pub async fn register(
        &self,
        subject: &str,
        schema: &RegistrySchema,
        normalize: bool,
    ) -> Result<u32> {
        let fingerprint = schema.fingerprint();
        if let Some(id) = self.inner.cache.get_id_by_schema(subject, &fingerprint) {
            debug!("Schema for {subject} already registered as id {id}");
            return Ok(id);
        }

        let id = self.inner.transport.register(subject, schema, normalize).await?;
        info!("Registered schema under {subject} with id {id}");
        Ok(self.inner.cache.put_id_by_schema(subject, &fingerprint, id))
    }

    /// Resolve a schema id, fetching and parsing it on a cache miss.
    ///
    /// Concurrent misses for the same id share one registry request.
    pub async fn lookup(&self, id: u32) -> Result<Arc<SchemaDescriptor>> {
        if let Some(descriptor) = self.inner.cache.get(id) {
            return Ok(descriptor);
        }

        let slot = self.in_flight_slot(id);
        let _permit = slot.gate.lock().await;

        // Another caller may have filled the cache while we waited.
        if let Some(descriptor) = self.inner.cache.get(id) {
            return Ok(descriptor);
        }

        let schema = self.inner.transport.schema_by_id(id).await?;
        let parsed = self.parse_schema(&schema, 0).await?;
        let descriptor = Arc::new(SchemaDescriptor {
            id,
            subject: None,
            version: None,
            fingerprint: schema.fingerprint(),
            schema,
            parsed,
        });
        Ok(self.inner.cache.put(descriptor))
    }

    pub async fn lookup_by_subject_version(
        &self,
        subject: &str,
        version: i32,
    ) -> Result<Arc<SchemaDescriptor>> {
        self.fetch_subject_version(subject, SchemaVersion::Number(version), 0)
            .await
    }

    /// Latest version of `subject`. Always asks the registry, since "latest"
    /// moves.
    pub async fn latest(&self, subject: &str) -> Result<Arc<SchemaDescriptor>> {
        self.fetch_subject_version(subject, SchemaVersion::Latest, 0)
            .await
    }

    /// Find the id and version `schema` has under `subject`, without
    /// registering it.
    pub async fn lookup_id(
        &self,
        subject: &str,
        schema: &RegistrySchema,
        normalize: bool,
    ) -> Result<Arc<SchemaDescriptor>> {
        let fingerprint = schema.fingerprint();
        if let Some(descriptor) = self.inner.cache.get_by_subject_schema(subject, &fingerprint) {
            return Ok(descriptor);
        }

        let found = self
            .inner
            .transport
            .lookup_schema(subject, schema, normalize)
            .await?;
        let parsed = match self.inner.cache.get(found.id) {
            Some(cached) => cached.parsed.clone(),
            None => self.parse_schema(&found.schema, 0).await?,
        };
        let descriptor = Arc::new(SchemaDescriptor {
            id: found.id,
            subject: Some(found.subject),
            version: Some(found.version),
            fingerprint: found.schema.fingerprint(),
            schema: found.schema,
            parsed,
        });
        Ok(self
            .inner
            .cache
            .put_by_subject_schema(subject, &fingerprint, descriptor))
    }

    /// Whether `schema` is compatible with the latest version of `subject`.
    pub async fn check_compatibility(&self, subject: &str, schema: &RegistrySchema) -> Result<bool> {
        let compatible = self
            .inner
            .transport
            .check_compatibility(subject, schema)
            .await?;
        debug!("Compatibility of schema with {subject}: {compatible}");
        Ok(compatible)
    }

    fn in_flight_slot(&self, id: u32) -> InFlightSlot<'_> {
        let gate = match self.inner.in_flight.lock() {
            Ok(mut gates) => gates.entry(id).or_default().clone(),
            Err(_) => {
                warn!("Lookup gate map poisoned, looking up schema id {id} without deduplication");
                Arc::default()
            }
        };
        InFlightSlot {
            gates: &self.inner.in_flight,
            id,
            gate,
        }
    }

    fn fetch_subject_version<'a>(
        &'a self,
        subject: &'a str,
        version: SchemaVersion,
        depth: usize,
    ) -> BoxFuture<'a, Result<Arc<SchemaDescriptor>>> {
        Box::pin(async move {
            if depth > MAX_REFERENCE_DEPTH {
                return Err(Error::SchemaParse(format!(
                    "Schema references nested deeper than {MAX_REFERENCE_DEPTH} at {subject}"
                )));
            }
            if let SchemaVersion::Number(number) = version {
                if let Some(cached) = self.inner.cache.get_by_subject_version(subject, number) {
                    return Ok(cached);
                }
            }

            let found = self.inner.transport.subject_version(subject, version).await?;
            if let Some(cached) = self
                .inner
                .cache
                .get_by_subject_version(&found.subject, found.version)
            {
                return Ok(cached);
            }

            let parsed = match self.inner.cache.get(found.id) {
                Some(cached) => cached.parsed.clone(),
                None => self.parse_schema(&found.schema, depth).await?,
            };
            let descriptor = Arc::new(SchemaDescriptor {
                id: found.id,
                subject: Some(found.subject),
                version: Some(found.version),
                fingerprint: found.schema.fingerprint(),
                schema: found.schema,
                parsed,
            });
            Ok(self.inner.cache.put(descriptor))
        })
    }

    /// Parse registry schema text, fetching its references first.
    fn parse_schema<'a>(
        &'a self,
        schema: &'a RegistrySchema,
        depth: usize,
    ) -> BoxFuture<'a, Result<Arc<ProtoSchema>>> {
        Box::pin(async move {
            if !schema.is_protobuf() {
                return Err(Error::SchemaParse(format!(
                    "Unsupported schema type {}",
                    schema.schema_type.as_deref().unwrap_or("AVRO")
                )));
            }

            let mut dependencies: Vec<ProtoDependency> = Vec::new();
            for reference in &schema.references {
                if is_well_known_import(&reference.name) {
                    continue;
                }
                let referenced = self
                    .fetch_subject_version(
                        &reference.subject,
                        SchemaVersion::Number(reference.version),
                        depth + 1,
                    )
                    .await?;
                let direct = ProtoDependency {
                    name: reference.name.clone(),
                    source: referenced.schema.schema.clone(),
                };
                for dependency in std::iter::once(direct)
                    .chain(referenced.parsed.dependencies.iter().cloned())
                {
                    if !dependencies.iter().any(|d| d.name == dependency.name) {
                        dependencies.push(dependency);
                    }
                }
            }

            let file_name = if dependencies.iter().any(|d| d.name == DEFAULT_FILE_NAME) {
                FALLBACK_ROOT_FILE_NAME
            } else {
                DEFAULT_FILE_NAME
            };
            let parsed = ProtoParser::parse_file_set(file_name, &schema.schema, &dependencies)?;
            debug!(
                "Parsed schema {file_name} with {} references and {} message types",
                dependencies.len(),
                parsed.messages.len()
            );
            Ok(Arc::new(parsed))
        })
    }
}
