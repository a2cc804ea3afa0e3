// src/jwks/store.rs

use super::model::PersistedKeySet;
use crate::error::NilaGatewayError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Durable side-cache for fetched key sets.
///
/// It is consulted before the network on cold start and written after every
/// successful network fetch. Failures are logged by the caller and never fail
/// a request.
#[async_trait]
pub trait KeySetStore: Send + Sync {
    /// Returns the key set persisted for `uri`, if any.
    async fn get(&self, uri: &str) -> Result<Option<PersistedKeySet>, NilaGatewayError>;

    /// Replaces the key set persisted for `uri`.
    async fn set(&self, uri: &str, entry: &PersistedKeySet) -> Result<(), NilaGatewayError>;
}

/// Stores one JSON file per key set URI in a directory.
///
/// Files are written to a temporary file in the same directory and renamed
/// over the target, so readers only ever see a complete document.
#[derive(Debug, Clone)]
pub struct FileKeySetStore {
    directory: PathBuf,
}

impl FileKeySetStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, uri: &str) -> PathBuf {
        let digest = Sha256::digest(uri.as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.directory.join(format!("jwks-{name}.json"))
    }
}

fn store_error(context: &str, e: impl std::fmt::Display) -> NilaGatewayError {
    NilaGatewayError::Internal(format!("{context}: {e}"))
}

#[async_trait]
impl KeySetStore for FileKeySetStore {
    async fn get(&self, uri: &str) -> Result<Option<PersistedKeySet>, NilaGatewayError> {
        let path = self.path_for(uri);
        let contents = match tokio::task::spawn_blocking(move || std::fs::read(path)).await {
            Ok(Ok(contents)) => contents,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Ok(Err(e)) => return Err(store_error("reading persisted JWKS", e)),
            Err(e) => return Err(store_error("reading persisted JWKS", e)),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|e| store_error("decoding persisted JWKS", e))
    }

    async fn set(&self, uri: &str, entry: &PersistedKeySet) -> Result<(), NilaGatewayError> {
        let contents = serde_json::to_vec(entry).map_err(|e| store_error("encoding JWKS", e))?;
        let directory = self.directory.clone();
        let path = self.path_for(uri);
        debug!("Persisting JWKS for {} to {:?}", uri, path);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&directory)?;
            let mut file = tempfile::NamedTempFile::new_in(&directory)?;
            file.write_all(&contents)?;
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| store_error("persisting JWKS", e))?
        .map_err(|e| store_error("persisting JWKS", e))
    }
}

#[cfg(feature = "redis-cache")]
pub use self::redis_store::RedisKeySetStore;

#[cfg(feature = "redis-cache")]
mod redis_store {
    use super::{store_error, KeySetStore};
    use crate::error::NilaGatewayError;
    use crate::jwks::model::PersistedKeySet;
    use async_trait::async_trait;
    use redis::AsyncCommands;

    /// Stores key sets in Redis under `<prefix><uri>`, expiring with the key set TTL.
    #[derive(Clone)]
    pub struct RedisKeySetStore {
        connection: redis::aio::MultiplexedConnection,
        prefix: String,
    }

    impl RedisKeySetStore {
        /// Connects to the Redis server at `redis_url`.
        pub async fn connect(redis_url: &str) -> Result<Self, NilaGatewayError> {
            let client = redis::Client::open(redis_url)
                .map_err(|e| NilaGatewayError::InvalidConfiguration(format!("redis url: {e}")))?;
            let connection = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| NilaGatewayError::InvalidConfiguration(format!("redis connection: {e}")))?;
            Ok(Self {
                connection,
                prefix: "nila-oidc-gateway:jwks:".to_string(),
            })
        }

        fn key(&self, uri: &str) -> String {
            format!("{}{}", self.prefix, uri)
        }
    }

    #[async_trait]
    impl KeySetStore for RedisKeySetStore {
        async fn get(&self, uri: &str) -> Result<Option<PersistedKeySet>, NilaGatewayError> {
            let mut connection = self.connection.clone();
            let raw: Option<String> = connection
                .get(self.key(uri))
                .await
                .map_err(|e| store_error("reading JWKS from redis", e))?;
            raw.map(|raw| serde_json::from_str(&raw).map_err(|e| store_error("decoding JWKS from redis", e)))
                .transpose()
        }

        async fn set(&self, uri: &str, entry: &PersistedKeySet) -> Result<(), NilaGatewayError> {
            let raw = serde_json::to_string(entry).map_err(|e| store_error("encoding JWKS", e))?;
            let mut connection = self.connection.clone();
            let _: () = connection
                .set_ex(self.key(uri), raw, entry.ttl_secs.max(1))
                .await
                .map_err(|e| store_error("writing JWKS to redis", e))?;
            Ok(())
        }
    }
}
