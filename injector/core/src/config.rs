use crate::{Annotation, Annotations, EgressType, Error, ObjectStore};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// ConfigMap in the operator namespace holding default annotations for pods
/// that egress through a gateway service.
pub const SERVICE_DEFAULTS_CONFIG_MAP: &str = "qtap-operator-service-pod-annotations-configmap";

/// ConfigMap in the operator namespace holding default annotations for pods
/// that receive a gateway sidecar.
pub const INJECT_DEFAULTS_CONFIG_MAP: &str = "qtap-operator-inject-pod-annotations-configmap";

/// The data key of a defaults ConfigMap. Its value is a flat YAML mapping of
/// annotation keys to string values.
pub const DEFAULTS_KEY: &str = "annotations.yaml";

/// The resolved policy for a single admission request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub egress: EgressType,
    pub inject_ca: bool,

    /// The namespace of the pod under admission.
    pub namespace: String,

    /// The namespace the operator runs in, where its defaults, token, and root
    /// CA live.
    pub operator_namespace: String,

    /// The pod's annotations with defaults merged in. Builders read all of
    /// their configuration from here.
    pub annotations: Annotations,
}

// === impl Config ===

impl Config {
    /// Resolves the egress policy for `pod` from its namespace's labels and its
    /// own metadata, then merges the defaults for the winning mode.
    #[instrument(skip(store, pod), fields(%namespace))]
    pub async fn resolve(
        store: &dyn ObjectStore,
        operator_namespace: &str,
        namespace: &str,
        pod: &Pod,
    ) -> Result<Self, Error> {
        let ns = store
            .namespace(namespace)
            .await
            .map_err(|source| Error::Api {
                action: "fetching",
                kind: "namespace",
                namespace: namespace.to_string(),
                name: namespace.to_string(),
                source,
            })?
            .ok_or_else(|| Error::NotFound {
                kind: "namespace",
                namespace: namespace.to_string(),
                name: namespace.to_string(),
            })?;

        let ns_egress = EgressType::from_namespace_labels(ns.metadata.labels.as_ref());
        let pod_egress = EgressType::from_pod_metadata(
            pod.metadata.labels.as_ref(),
            pod.metadata.annotations.as_ref(),
        );
        let egress = ns_egress.overridden_by(pod_egress);
        debug!(%ns_egress, %pod_egress, %egress, "Resolved egress");

        let defaults = match egress {
            EgressType::Undefined | EgressType::Disabled => {
                return Ok(Self {
                    egress,
                    inject_ca: false,
                    namespace: namespace.to_string(),
                    operator_namespace: operator_namespace.to_string(),
                    annotations: Annotations::from(
                        pod.metadata.annotations.clone().unwrap_or_default(),
                    ),
                });
            }
            EgressType::Service => SERVICE_DEFAULTS_CONFIG_MAP,
            EgressType::Inject => INJECT_DEFAULTS_CONFIG_MAP,
        };

        let defaults = load_defaults(store, operator_namespace, defaults).await?;
        let annotations = Annotations::merge(pod.metadata.annotations.as_ref(), defaults);
        let inject_ca = annotations.get(Annotation::InjectCa) == Some("true");

        Ok(Self {
            egress,
            inject_ca,
            namespace: namespace.to_string(),
            operator_namespace: operator_namespace.to_string(),
            annotations,
        })
    }
}

async fn load_defaults(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<BTreeMap<String, String>, Error> {
    let config_map = store
        .config_map(namespace, name)
        .await
        .map_err(|source| Error::Api {
            action: "fetching",
            kind: "configmap",
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?
        .ok_or_else(|| Error::NotFound {
            kind: "configmap",
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

    let text = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(DEFAULTS_KEY))
        .ok_or_else(|| Error::InvalidDefaults {
            name: name.to_string(),
            reason: format!("missing '{DEFAULTS_KEY}' key"),
        })?;
    parse_defaults(text).map_err(|e| Error::InvalidDefaults {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn parse_defaults(text: &str) -> Result<BTreeMap<String, String>, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yaml::from_str(text)
}
