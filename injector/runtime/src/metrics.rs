use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use qtap_injector_core::EgressType;

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    requests: Family<Labels, Counter>,
}

/// The decision made for a single admission request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    Mutated,
    Denied,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct Labels {
    egress: &'static str,
    result: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<Labels, Counter>::default();
        reg.register(
            "requests",
            "Total number of pod admission requests by egress policy and decision",
            requests.clone(),
        );
        Self { requests }
    }

    /// Records a decision. The egress policy is unknown when the request was
    /// denied before it could be resolved.
    pub fn record(&self, egress: Option<EgressType>, outcome: Outcome) {
        let labels = Labels {
            egress: egress.map_or("unknown", |e| e.as_str()),
            result: outcome.as_str(),
        };
        self.requests.get_or_create(&labels).inc();
    }
}

// === impl Outcome ===

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Mutated => "mutated",
            Self::Denied => "denied",
        }
    }
}
