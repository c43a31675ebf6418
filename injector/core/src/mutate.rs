use crate::{
    bundle::{self, BaseBundles},
    init, sidecar,
    store::fetch_token,
    Config, EgressType, MutateError, ObjectStore, Registration, Stage,
};
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Container image repositories. Tags are chosen per pod by annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Images {
    pub init: String,
    pub gateway: String,
}

/// Process-wide settings that apply to every admission request.
#[derive(Clone, Debug)]
pub struct Settings {
    pub operator_namespace: String,
    pub images: Images,
    pub base_bundles: BaseBundles,
}

/// Applies the resolved egress policy to pods under admission.
#[derive(Clone)]
pub struct Mutator {
    store: Arc<dyn ObjectStore>,
    registration: Arc<dyn Registration>,
    settings: Arc<Settings>,
}

/// The outcome of a successful mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub egress: EgressType,
    pub pod: Pod,
}

// === impl Images ===

impl Default for Images {
    fn default() -> Self {
        Self {
            init: init::DEFAULT_INIT_IMAGE.to_string(),
            gateway: sidecar::DEFAULT_GATEWAY_IMAGE.to_string(),
        }
    }
}

// === impl Mutator ===

impl Mutator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registration: Arc<dyn Registration>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            registration,
            settings: Arc::new(settings),
        }
    }

    /// Mutates `pod`, which is being created in `namespace`.
    ///
    /// Pods without a routed egress policy are returned unchanged. Any failure
    /// aborts the mutation; the partially mutated pod is discarded.
    #[instrument(skip(self, pod), fields(name = ?pod.metadata.name))]
    pub async fn mutate(&self, namespace: &str, mut pod: Pod) -> Result<Mutation, MutateError> {
        let config = Config::resolve(
            &*self.store,
            &self.settings.operator_namespace,
            namespace,
            &pod,
        )
        .await
        .map_err(Stage::Resolve.wrap(None))?;

        let egress = config.egress;
        if !egress.is_routed() {
            debug!(%egress, "Egress not enabled; ignoring");
            return Ok(Mutation { egress, pod });
        }
        info!(%egress, inject_ca = config.inject_ca, "Mutating pod");

        // The effective annotations are recorded on the pod.
        if pod.metadata.annotations.is_some() || !config.annotations.as_map().is_empty() {
            pod.metadata.annotations = Some(config.annotations.as_map().clone());
        }

        if init::is_present(&pod) {
            debug!("Init container already present");
        } else {
            let container = init::build(&self.settings.images.init, &config.annotations)
                .map_err(Stage::EgressInit.wrap(Some(egress)))?;
            init::prepend(&mut pod, container);
        }

        if egress == EgressType::Inject {
            if sidecar::is_present(&pod) {
                debug!("Sidecar already present");
            } else {
                let token = fetch_token(&*self.store, &config.operator_namespace)
                    .await
                    .map_err(Stage::Sidecar.wrap(Some(egress)))?;
                let container =
                    sidecar::build(&self.settings.images.gateway, &token, &config, &pod)
                        .map_err(Stage::Sidecar.wrap(Some(egress)))?;
                sidecar::prepend(&mut pod, container);
            }
        }

        if config.inject_ca {
            bundle::ensure(
                &*self.store,
                &*self.registration,
                &self.settings.base_bundles,
                &config,
            )
            .await
            .map_err(Stage::TrustBundle.wrap(Some(egress)))?;
            bundle::mount(&mut pod);
        }

        Ok(Mutation { egress, pod })
    }
}
