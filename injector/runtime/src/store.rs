use anyhow::{anyhow, Result};
use kube::api::{Api, PostParams};
use qtap_injector_core::{ConfigMap, Created, Namespace, ObjectStore, Secret};
use tracing::trace;

/// An [`ObjectStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api = Api::<Namespace>::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(&self, config_map: ConfigMap) -> Result<Created> {
        let namespace = config_map
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| anyhow!("configmap must be namespaced"))?;
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), &config_map).await {
            Ok(created) => {
                trace!(?created.metadata.uid, "Created configmap");
                Ok(Created::Created)
            }
            Err(kube::Error::Api(error)) if error.code == 409 => Ok(Created::AlreadyExists),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const CONFIG_MAPS: &str = "/api/v1/namespaces/ns1/configmaps";

    fn mk_store(server: &MockServer) -> KubeStore {
        let config = kube::Config::new(server.uri().parse().expect("mock server uri must parse"));
        KubeStore::new(kube::Client::try_from(config).expect("client must build"))
    }

    fn mk_config_map() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("qtap-ca-bundle.crt".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn status(code: u16, reason: &str) -> ResponseTemplate {
        ResponseTemplate::new(code).set_body_json(serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("configmaps \"qtap-ca-bundle.crt\" {reason}"),
            "reason": reason,
            "code": code,
        }))
    }

    #[tokio::test]
    async fn creates_config_maps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CONFIG_MAPS))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": "qtap-ca-bundle.crt", "namespace": "ns1" },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = mk_store(&server)
            .create_config_map(mk_config_map())
            .await
            .unwrap();
        assert_eq!(created, Created::Created);
    }

    #[tokio::test]
    async fn conflicts_are_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CONFIG_MAPS))
            .respond_with(status(409, "AlreadyExists"))
            .expect(1)
            .mount(&server)
            .await;

        let created = mk_store(&server)
            .create_config_map(mk_config_map())
            .await
            .unwrap();
        assert_eq!(created, Created::AlreadyExists);
    }

    #[tokio::test]
    async fn other_failures_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CONFIG_MAPS))
            .respond_with(status(403, "Forbidden"))
            .mount(&server)
            .await;

        mk_store(&server)
            .create_config_map(mk_config_map())
            .await
            .expect_err("forbidden must not be treated as created");
    }

    #[tokio::test]
    async fn missing_objects_are_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{CONFIG_MAPS}/qtap-ca-bundle.crt")))
            .respond_with(status(404, "NotFound"))
            .mount(&server)
            .await;

        let config_map = mk_store(&server)
            .config_map("ns1", "qtap-ca-bundle.crt")
            .await
            .unwrap();
        assert!(config_map.is_none());
    }
}
