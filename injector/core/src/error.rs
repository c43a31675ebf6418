use crate::{Annotation, EgressType};
use thiserror::Error;

/// Failures that abort the mutation of a single pod.
#[derive(Debug, Error)]
pub enum Error {
    /// The cluster API could not be read or written.
    #[error("{action} {kind} '{name}' in namespace '{namespace}': {source:#}")]
    Api {
        action: &'static str,
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A resource that must be provisioned by the operator does not exist.
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("secret '{name}' in namespace '{namespace}' has no '{key}' key")]
    MissingKey {
        namespace: String,
        name: String,
        key: &'static str,
    },

    #[error("missing configuration for the Qpoint root CA: {0:#}")]
    RootCa(#[source] anyhow::Error),

    #[error("invalid default annotations in configmap '{name}': {reason}")]
    InvalidDefaults { name: String, reason: String },

    #[error("invalid value {value:?} for annotation {annotation}: {reason}")]
    InvalidAnnotation {
        annotation: Annotation,
        value: String,
        reason: String,
    },

    #[error("invalid regular expression {filter:?} in tags filter: {source}")]
    InvalidTagsFilter {
        filter: String,
        #[source]
        source: regex::Error,
    },
}

/// The mutation step that failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    EgressInit,
    Sidecar,
    TrustBundle,
}

/// A failed mutation, tagged with the step that failed.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct MutateError {
    pub stage: Stage,

    /// The resolved policy, unless resolution itself failed.
    pub egress: Option<EgressType>,

    #[source]
    pub source: Error,
}

// === impl Stage ===

impl Stage {
    pub(crate) fn wrap(self, egress: Option<EgressType>) -> impl FnOnce(Error) -> MutateError {
        move |source| MutateError {
            stage: self,
            egress,
            source,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve => "policy resolution".fmt(f),
            Self::EgressInit => "egress init".fmt(f),
            Self::Sidecar => "gateway sidecar".fmt(f),
            Self::TrustBundle => "trust bundle".fmt(f),
        }
    }
}
