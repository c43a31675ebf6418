use anyhow::{anyhow, Error, Result};
use std::collections::BTreeMap;

/// Describes whether, and how, a pod's outbound traffic is routed through a
/// Qtap gateway.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum EgressType {
    /// Neither the namespace nor the pod expresses a policy. The pod passes
    /// through untouched.
    #[default]
    Undefined,

    /// Routing is explicitly suppressed.
    Disabled,

    /// Egress is redirected to a gateway service running outside of the pod.
    Service,

    /// A gateway sidecar is injected into the pod and egress is redirected to
    /// it.
    Inject,
}

// === impl EgressType ===

impl EgressType {
    /// The namespace label that sets the default policy for all of its pods.
    pub const NAMESPACE_LABEL: &'static str = "qpoint-egress";

    /// The pod label (or annotation) that overrides the namespace policy.
    pub const POD_LABEL: &'static str = "qpoint.io/egress";

    /// Reads the namespace-level policy. Unknown values are treated as unset.
    pub fn from_namespace_labels(labels: Option<&BTreeMap<String, String>>) -> Self {
        Self::lookup(labels, Self::NAMESPACE_LABEL)
    }

    /// Reads the pod-level policy. The label takes precedence over an
    /// annotation of the same name.
    pub fn from_pod_metadata(
        labels: Option<&BTreeMap<String, String>>,
        annotations: Option<&BTreeMap<String, String>>,
    ) -> Self {
        match Self::lookup(labels, Self::POD_LABEL) {
            Self::Undefined => Self::lookup(annotations, Self::POD_LABEL),
            egress => egress,
        }
    }

    /// Applies the pod-level signal on top of the namespace-level signal. A pod
    /// signal always wins; an unset pod signal inherits the namespace.
    pub fn overridden_by(self, pod: Self) -> Self {
        match pod {
            Self::Undefined => self,
            pod => pod,
        }
    }

    /// Indicates whether pods with this policy are mutated at all.
    pub fn is_routed(&self) -> bool {
        matches!(self, Self::Service | Self::Inject)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Disabled => "disabled",
            Self::Service => "service",
            Self::Inject => "inject",
        }
    }

    fn lookup(map: Option<&BTreeMap<String, String>>, key: &str) -> Self {
        let Some(value) = map.and_then(|m| m.get(key)) else {
            return Self::Undefined;
        };
        match value.parse() {
            Ok(egress) => egress,
            Err(error) => {
                tracing::warn!(%error, %key, "Ignoring egress value");
                Self::Undefined
            }
        }
    }
}

impl std::str::FromStr for EgressType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "disabled" => Ok(Self::Disabled),
            "service" => Ok(Self::Service),
            "inject" => Ok(Self::Inject),
            s => Err(anyhow!("invalid egress type: {:?}", s)),
        }
    }
}

impl std::fmt::Display for EgressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    const ALL: [EgressType; 4] = [
        EgressType::Undefined,
        EgressType::Disabled,
        EgressType::Service,
        EgressType::Inject,
    ];

    #[test]
    fn pod_signal_overrides_namespace() {
        for ns in ALL {
            for pod in ALL {
                let resolved = ns.overridden_by(pod);
                if pod == EgressType::Undefined {
                    assert_eq!(resolved, ns);
                } else {
                    assert_eq!(resolved, pod);
                }
            }
        }
    }

    #[test]
    fn unknown_values_are_unset() {
        let labels = btreemap! {
            "qpoint-egress".to_string() => "enabled".to_string(),
        };
        assert_eq!(
            EgressType::from_namespace_labels(Some(&labels)),
            EgressType::Undefined
        );
        assert_eq!(EgressType::from_namespace_labels(None), EgressType::Undefined);
    }

    #[test]
    fn pod_label_wins_over_annotation() {
        let labels = btreemap! {
            "qpoint.io/egress".to_string() => "disabled".to_string(),
        };
        let annotations = btreemap! {
            "qpoint.io/egress".to_string() => "inject".to_string(),
        };
        assert_eq!(
            EgressType::from_pod_metadata(Some(&labels), Some(&annotations)),
            EgressType::Disabled
        );
        assert_eq!(
            EgressType::from_pod_metadata(None, Some(&annotations)),
            EgressType::Inject
        );
    }

    #[test]
    fn display_roundtrips() {
        for egress in [EgressType::Disabled, EgressType::Service, EgressType::Inject] {
            assert_eq!(egress.to_string().parse::<EgressType>().unwrap(), egress);
        }
        assert!("undefined".parse::<EgressType>().is_err());
    }
}
