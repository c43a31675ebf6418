#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod bundle;
pub mod config;
mod egress;
mod error;
pub mod init;
mod mutate;
pub mod sidecar;
mod store;


pub use self::{
    annotations::{Annotation, Annotations},
    bundle::BaseBundles,
    config::Config,
    egress::EgressType,
    error::{Error, MutateError, Stage},
    mutate::{Images, Mutation, Mutator, Settings},
    store::{Created, ObjectStore, Registration},
};
pub use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret};

use k8s_openapi::api::core::v1::EnvVar;

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}
