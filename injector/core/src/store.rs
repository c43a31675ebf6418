use crate::Error;
use anyhow::Result;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};

/// The narrow slice of the cluster API that pod mutation depends on.
///
/// Lookups return `Ok(None)` when the object does not exist; every other
/// failure is an error.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Creates a namespaced ConfigMap. Losing a creation race to another
    /// writer is reported as [`Created::AlreadyExists`].
    async fn create_config_map(&self, config_map: ConfigMap) -> Result<Created>;
}

/// Fetches the Qpoint root CA from the registration API.
#[async_trait::async_trait]
pub trait Registration: Send + Sync {
    async fn root_ca(&self, token: &str) -> Result<String>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Created {
    Created,
    AlreadyExists,
}

pub(crate) const TOKEN_SECRET: &str = "token";
const TOKEN_KEY: &str = "token";

/// Loads the operator's bearer token from the `token` secret.
pub(crate) async fn fetch_token(store: &dyn ObjectStore, namespace: &str) -> Result<String, Error> {
    let secret = store
        .secret(namespace, TOKEN_SECRET)
        .await
        .map_err(|source| Error::Api {
            action: "fetching",
            kind: "secret",
            namespace: namespace.to_string(),
            name: TOKEN_SECRET.to_string(),
            source,
        })?
        .ok_or_else(|| Error::NotFound {
            kind: "secret",
            namespace: namespace.to_string(),
            name: TOKEN_SECRET.to_string(),
        })?;

    let token = secret
        .data
        .as_ref()
        .and_then(|data| data.get(TOKEN_KEY))
        .ok_or_else(|| Error::MissingKey {
            namespace: namespace.to_string(),
            name: TOKEN_SECRET.to_string(),
            key: TOKEN_KEY,
        })?;
    Ok(String::from_utf8_lossy(&token.0).into_owned())
}
