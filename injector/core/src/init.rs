use crate::{env_var, Annotation, Annotations, Error};
use k8s_openapi::api::core::v1::{Capabilities, Container, EnvVar, Pod, SecurityContext};

pub const INIT_CONTAINER_NAME: &str = "qtap-init";
pub const DEFAULT_INIT_IMAGE: &str = "us-docker.pkg.dev/qpoint-edge/public/kubernetes-qtap-init";

/// Environment variables passed to the init container, in emission order.
const ENV: [(&str, Annotation); 5] = [
    ("TO_ADDR", Annotation::InitToAddr),
    ("TO_DOMAIN", Annotation::InitToDomain),
    ("PORT_MAPPING", Annotation::InitPortMapping),
    ("ACCEPT_UIDS", Annotation::InitAcceptUids),
    ("ACCEPT_GIDS", Annotation::InitAcceptGids),
];

/// Builds the init container that installs the pod's egress redirection.
///
/// The container always holds `NET_ADMIN`. It usually has to run as root, and
/// some clusters also require it to be privileged; the `qtap-init-run-as-*`
/// annotations control this.
pub fn build(image: &str, annotations: &Annotations) -> Result<Container, Error> {
    let tag = annotations.get(Annotation::InitTag).unwrap_or_default();

    let security_context = SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(vec!["NET_ADMIN".to_string()]),
            drop: None,
        }),
        run_as_user: annotations.get_i64(Annotation::InitRunAsUser)?,
        run_as_group: annotations.get_i64(Annotation::InitRunAsGroup)?,
        run_as_non_root: annotations.get_bool(Annotation::InitRunAsNonRoot)?,
        privileged: annotations.get_bool(Annotation::InitPrivileged)?,
        ..Default::default()
    };

    let env = ENV
        .iter()
        .filter_map(|(name, annotation)| annotations.get(*annotation).map(|v| env_var(name, v)))
        .collect::<Vec<EnvVar>>();

    Ok(Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(format!("{image}:{tag}")),
        env: Some(env),
        security_context: Some(security_context),
        ..Default::default()
    })
}

/// Places the container ahead of every existing init container, since those
/// may depend on the redirection it installs.
pub fn prepend(pod: &mut Pod, container: Container) {
    let spec = pod.spec.get_or_insert_with(Default::default);
    spec.init_containers
        .get_or_insert_with(Vec::new)
        .insert(0, container);
}

/// Indicates whether the pod was already given an init container.
pub fn is_present(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.init_containers.as_ref())
        .is_some_and(|cs| cs.iter().any(|c| c.name == INIT_CONTAINER_NAME))
}
