use crate::{env_var, Annotation, Annotations, Config, Error};
use k8s_openapi::{
    api::core::v1::{Container, HTTPGetAction, Pod, Probe, SecurityContext},
    apimachinery::pkg::util::intstr::IntOrString,
};
use regex::Regex;
use std::collections::BTreeMap;

pub const SIDECAR_CONTAINER_NAME: &str = "qtap";
pub const DEFAULT_GATEWAY_IMAGE: &str = "us-docker.pkg.dev/qpoint-edge/public/qtap";

const DEFAULT_STATUS_PORT: i32 = 10001;

/// Optional environment variables passed to the gateway, in emission order.
/// `TOKEN` always comes first and `TAGS` always comes last.
const ENV: [(&str, Annotation); 10] = [
    ("LOG_LEVEL", Annotation::LogLevel),
    ("LOG_ENCODING", Annotation::LogEncoding),
    ("LOG_CALLER", Annotation::LogCaller),
    ("EGRESS_HTTP_LISTEN", Annotation::HttpListen),
    ("EGRESS_HTTPS_LISTEN", Annotation::HttpsListen),
    ("STATUS_LISTEN", Annotation::StatusListen),
    ("BLOCK_UNKNOWN", Annotation::BlockUnknown),
    ("ENVOY_LOG_LEVEL", Annotation::EnvoyLogLevel),
    ("DNS_LOOKUP_FAMILY", Annotation::DnsLookupFamily),
    ("ENDPOINT", Annotation::ApiEndpoint),
];

/// Builds the gateway sidecar container for `pod`.
///
/// Every annotation is validated before the container is assembled, so a
/// malformed annotation never yields a partial container.
pub fn build(image: &str, token: &str, config: &Config, pod: &Pod) -> Result<Container, Error> {
    let annotations = &config.annotations;
    let tag = annotations.get(Annotation::Tag).unwrap_or_default();
    let security_context = security_context(annotations)?;
    let status_port = status_port(annotations)?;
    let tags = tags(
        &config.namespace,
        pod.metadata.labels.as_ref(),
        annotations.get(Annotation::LabelsTagsFilter),
    )?;

    let mut env = vec![env_var("TOKEN", token)];
    env.extend(
        ENV.iter()
            .filter_map(|(name, annotation)| annotations.get(*annotation).map(|v| env_var(name, v))),
    );
    env.push(env_var("TAGS", &tags));

    Ok(Container {
        name: SIDECAR_CONTAINER_NAME.to_string(),
        image: Some(format!("{image}:{tag}")),
        args: Some(vec!["gateway".to_string()]),
        env: Some(env),
        security_context,
        startup_probe: Some(http_probe("/readyz", status_port, 5, 20)),
        readiness_probe: Some(http_probe("/readyz", status_port, 5, 1)),
        liveness_probe: Some(http_probe("/healthz", status_port, 10, 3)),
        ..Default::default()
    })
}

/// Places the sidecar ahead of the workload's own containers.
pub fn prepend(pod: &mut Pod, container: Container) {
    pod.spec
        .get_or_insert_with(Default::default)
        .containers
        .insert(0, container);
}

/// Indicates whether the pod was already given a sidecar.
pub fn is_present(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .is_some_and(|spec| spec.containers.iter().any(|c| c.name == SIDECAR_CONTAINER_NAME))
}

/// A security context is only set when a UID or GID is configured; otherwise
/// the pod-level settings apply. Zero is a valid UID and GID.
fn security_context(annotations: &Annotations) -> Result<Option<SecurityContext>, Error> {
    let uid = annotations.get_i64(Annotation::Uid)?;
    let gid = annotations.get_i64(Annotation::Gid)?;
    if uid.is_none() && gid.is_none() {
        return Ok(None);
    }

    Ok(Some(SecurityContext {
        run_as_user: uid,
        run_as_group: gid,
        ..Default::default()
    }))
}

/// The probe port is taken from the status listen address when it has the
/// form `host:port`.
fn status_port(annotations: &Annotations) -> Result<i32, Error> {
    let Some(listen) = annotations.get(Annotation::StatusListen) else {
        return Ok(DEFAULT_STATUS_PORT);
    };
    let Some((_, port)) = split_host_port(listen) else {
        return Ok(DEFAULT_STATUS_PORT);
    };
    let invalid = |reason: String| Error::InvalidAnnotation {
        annotation: Annotation::StatusListen,
        value: listen.to_string(),
        reason,
    };
    match port.parse::<u16>() {
        Ok(0) => Err(invalid("port must not be zero".to_string())),
        Ok(port) => Ok(i32::from(port)),
        Err(e) => Err(invalid(format!("invalid port: {e}"))),
    }
}

fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once("]:");
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

/// Builds the `TAGS` value: the pod's namespace, followed by a `key:value` tag
/// for every label whose key matches a filter expression. A label matching
/// several expressions is tagged once per match.
fn tags(
    namespace: &str,
    labels: Option<&BTreeMap<String, String>>,
    filters: Option<&str>,
) -> Result<String, Error> {
    let mut tags = vec![format!("namespace:{namespace}")];

    if let Some(filters) = filters {
        let filters = filters
            .split(',')
            .map(|filter| {
                Regex::new(filter).map_err(|source| Error::InvalidTagsFilter {
                    filter: filter.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (key, value) in labels.into_iter().flatten() {
            for filter in &filters {
                if filter.is_match(key) {
                    tags.push(format!("{key}:{value}"));
                }
            }
        }
    }

    Ok(tags.join(","))
}

fn http_probe(path: &str, port: i32, period_seconds: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(3),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(2),
        success_threshold: Some(1),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}
