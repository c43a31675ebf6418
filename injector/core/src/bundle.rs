use crate::{
    store::{fetch_token, Created, ObjectStore, Registration},
    Config, Error,
};
use anyhow::anyhow;
use k8s_openapi::{
    api::core::v1::{ConfigMap, ConfigMapVolumeSource, Pod, Volume, VolumeMount},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// The per-namespace ConfigMap holding the trust bundles.
pub const BUNDLE_CONFIG_MAP: &str = "qtap-ca-bundle.crt";

/// The ConfigMap in the operator namespace holding the Qpoint root CA.
pub const ROOT_CA_CONFIG_MAP: &str = "qpoint-qtap-ca.crt";
const ROOT_CA_KEY: &str = "ca.crt";

pub const BUNDLE_VOLUME: &str = "qtap-ca-bundle-volume";

/// The operating-system CA bundles that each trust bundle extends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BaseBundles {
    pub alpine: String,
    pub fedora: String,
    pub ubuntu: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Distro {
    Alpine,
    Fedora,
    Ubuntu,
}

// === impl Distro ===

impl Distro {
    const ALL: [Self; 3] = [Self::Alpine, Self::Fedora, Self::Ubuntu];

    /// The bundle's key in the ConfigMap, also used as the mount's sub-path.
    fn key(&self) -> &'static str {
        match self {
            Self::Alpine => "alpine-cert.pem",
            Self::Fedora => "fedora-ca-bundle.crt",
            Self::Ubuntu => "ubuntu-ca-certificates.crt",
        }
    }

    fn mount_path(&self) -> &'static str {
        match self {
            Self::Alpine => "/etc/ssl/cert.pem",
            Self::Fedora => "/etc/pki/tls/certs/ca-bundle.crt",
            Self::Ubuntu => "/etc/ssl/certs/ca-certificates.crt",
        }
    }
}

// === impl BaseBundles ===

impl BaseBundles {
    pub const KEYS: [&'static str; 3] = [
        "alpine-cert.pem",
        "fedora-ca-bundle.crt",
        "ubuntu-ca-certificates.crt",
    ];

    /// Builds the trust bundle entries by appending the root CA to each base
    /// bundle.
    pub fn render(&self, root_ca: &str) -> BTreeMap<String, String> {
        Distro::ALL
            .iter()
            .map(|distro| {
                let base = match distro {
                    Distro::Alpine => &self.alpine,
                    Distro::Fedora => &self.fedora,
                    Distro::Ubuntu => &self.ubuntu,
                };
                (distro.key().to_string(), format!("{base}{root_ca}\n"))
            })
            .collect()
    }
}

/// Ensures that the trust bundle ConfigMap exists in the pod's namespace.
///
/// An existing bundle is never updated. When it is missing, the root CA is read
/// from the operator namespace, or fetched from the registration API if the
/// operator namespace does not hold it either.
#[instrument(skip_all, fields(ns = %config.namespace))]
pub async fn ensure(
    store: &dyn ObjectStore,
    registration: &dyn Registration,
    bases: &BaseBundles,
    config: &Config,
) -> Result<(), Error> {
    let namespace = &config.namespace;
    let existing = store
        .config_map(namespace, BUNDLE_CONFIG_MAP)
        .await
        .map_err(|source| Error::Api {
            action: "fetching",
            kind: "configmap",
            namespace: namespace.clone(),
            name: BUNDLE_CONFIG_MAP.to_string(),
            source,
        })?;
    if existing.is_some() {
        debug!("Trust bundle already exists");
        return Ok(());
    }

    let root_ca = root_ca(store, registration, &config.operator_namespace).await?;

    let bundle = ConfigMap {
        metadata: ObjectMeta {
            name: Some(BUNDLE_CONFIG_MAP.to_string()),
            namespace: Some(namespace.clone()),
            ..Default::default()
        },
        data: Some(bases.render(&root_ca)),
        ..Default::default()
    };
    let created = store
        .create_config_map(bundle)
        .await
        .map_err(|source| Error::Api {
            action: "creating",
            kind: "configmap",
            namespace: namespace.clone(),
            name: BUNDLE_CONFIG_MAP.to_string(),
            source,
        })?;
    match created {
        Created::Created => info!("Created trust bundle"),
        Created::AlreadyExists => debug!("Trust bundle was created concurrently"),
    }
    Ok(())
}

async fn root_ca(
    store: &dyn ObjectStore,
    registration: &dyn Registration,
    operator_namespace: &str,
) -> Result<String, Error> {
    let config_map = store
        .config_map(operator_namespace, ROOT_CA_CONFIG_MAP)
        .await
        .map_err(|source| Error::Api {
            action: "fetching",
            kind: "configmap",
            namespace: operator_namespace.to_string(),
            name: ROOT_CA_CONFIG_MAP.to_string(),
            source,
        })?;

    if let Some(config_map) = config_map {
        return config_map
            .data
            .and_then(|mut data| data.remove(ROOT_CA_KEY))
            .ok_or_else(|| {
                Error::RootCa(anyhow!(
                    "configmap '{ROOT_CA_CONFIG_MAP}' has no '{ROOT_CA_KEY}' key"
                ))
            });
    }

    debug!("Root CA configmap not found; fetching the registration");
    let token = fetch_token(store, operator_namespace).await?;
    registration.root_ca(&token).await.map_err(Error::RootCa)
}

/// Mounts the trust bundle over each distribution's CA file in every
/// container and init container of the pod.
///
/// This must run after all containers have been added to the pod.
pub fn mount(pod: &mut Pod) {
    let spec = pod.spec.get_or_insert_with(Default::default);
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if volumes.iter().any(|v| v.name == BUNDLE_VOLUME) {
        return;
    }
    volumes.push(Volume {
        name: BUNDLE_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: BUNDLE_CONFIG_MAP.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    });

    let mounts = Distro::ALL
        .iter()
        .map(|distro| VolumeMount {
            name: BUNDLE_VOLUME.to_string(),
            mount_path: distro.mount_path().to_string(),
            sub_path: Some(distro.key().to_string()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let containers = spec
        .init_containers
        .iter_mut()
        .flatten()
        .chain(spec.containers.iter_mut());
    for container in containers {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(mounts.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn bases() -> BaseBundles {
        BaseBundles {
            alpine: "ALPINE\n".to_string(),
            fedora: "FEDORA\n".to_string(),
            ubuntu: "UBUNTU\n".to_string(),
        }
    }

    #[test]
    fn render_is_deterministic() {
        let first = bases().render("ROOTCA_PEM");
        let second = bases().render("ROOTCA_PEM");
        assert_eq!(first, second);

        assert_eq!(
            first.keys().map(String::as_str).collect::<Vec<_>>(),
            BaseBundles::KEYS.to_vec()
        );
        for entry in first.values() {
            assert!(entry.ends_with("ROOTCA_PEM\n"), "{entry:?}");
        }
        assert_eq!(first["alpine-cert.pem"], "ALPINE\nROOTCA_PEM\n");
        assert_eq!(first["fedora-ca-bundle.crt"], "FEDORA\nROOTCA_PEM\n");
        assert_eq!(first["ubuntu-ca-certificates.crt"], "UBUNTU\nROOTCA_PEM\n");
    }

    #[test]
    fn mounts_every_container() {
        let container = |name: &str| Container {
            name: name.to_string(),
            ..Default::default()
        };
        let mut pod = Pod {
            spec: Some(PodSpec {
                init_containers: Some(vec![container("qtap-init")]),
                containers: vec![container("qtap"), container("app")],
                ..Default::default()
            }),
            ..Default::default()
        };

        mount(&mut pod);
        // Mounting twice must not duplicate the volume or its mounts.
        mount(&mut pod);

        let spec = pod.spec.unwrap();
        let volumes = spec.volumes.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "qtap-ca-bundle-volume");
        assert_eq!(
            volumes[0].config_map.as_ref().map(|cm| cm.name.as_str()),
            Some("qtap-ca-bundle.crt")
        );

        for c in spec.init_containers.unwrap().iter().chain(&spec.containers) {
            let mounts = c
                .volume_mounts
                .iter()
                .flatten()
                .map(|m| (m.mount_path.as_str(), m.sub_path.as_deref()))
                .collect::<Vec<_>>();
            assert_eq!(
                mounts,
                vec![
                    ("/etc/ssl/cert.pem", Some("alpine-cert.pem")),
                    ("/etc/pki/tls/certs/ca-bundle.crt", Some("fedora-ca-bundle.crt")),
                    (
                        "/etc/ssl/certs/ca-certificates.crt",
                        Some("ubuntu-ca-certificates.crt")
                    ),
                ],
                "{}",
                c.name
            );
        }
    }
}
