#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod admission;
mod args;
mod metrics;
mod registration;
mod store;

pub use self::{
    admission::Admission, args::Args, metrics::AdmissionMetrics,
    registration::RegistrationClient, store::KubeStore,
};
