use crate::{
    admission::Admission, metrics::AdmissionMetrics, registration::RegistrationClient,
    store::KubeStore,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use qtap_injector_core::{
    init::DEFAULT_INIT_IMAGE, sidecar::DEFAULT_GATEWAY_IMAGE, BaseBundles, Images, Mutator,
    Settings,
};
use std::{path::Path, path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "qtap-injector",
    about = "Routes pod egress through Qtap gateways at admission"
)]
pub struct Args {
    #[clap(long, default_value = "qtap=info,warn", env = "QTAP_INJECTOR_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The namespace holding the operator's defaults, token, and root CA.
    ///
    /// Defaults to the client's namespace.
    #[clap(long, env = "POD_NAMESPACE")]
    operator_namespace: Option<String>,

    /// The Qpoint API, used to fetch the root CA when the operator namespace
    /// does not hold it.
    #[clap(long, env = "ENDPOINT", default_value = "https://api.qpoint.io")]
    registration_endpoint: String,

    /// A directory holding the base CA bundle of each supported distribution.
    #[clap(long, default_value = "/etc/qtap/ca-assets")]
    ca_assets_dir: PathBuf,

    #[clap(long, default_value = DEFAULT_INIT_IMAGE)]
    init_image: String,

    #[clap(long, default_value = DEFAULT_GATEWAY_IMAGE)]
    gateway_image: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            operator_namespace,
            registration_endpoint,
            ca_assets_dir,
            init_image,
            gateway_image,
        } = self;

        let mut prom = <Registry>::default();
        let metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("qtap_injector_admission"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(Some(server))
            .build()
            .await?;

        let client = runtime.client();
        let operator_namespace =
            operator_namespace.unwrap_or_else(|| client.default_namespace().to_string());
        let base_bundles = load_base_bundles(&ca_assets_dir).await?;
        let registration = RegistrationClient::new(registration_endpoint)?;
        info!(%operator_namespace, assets = %ca_assets_dir.display(), "Starting");

        let mutator = Mutator::new(
            Arc::new(KubeStore::new(client)),
            Arc::new(registration),
            Settings {
                operator_namespace,
                images: Images {
                    init: init_image,
                    gateway: gateway_image,
                },
                base_bundles,
            },
        );
        let admission = Admission::new(mutator, metrics);
        let runtime = runtime.spawn_server(move || admission.clone());

        // Serve admission requests until shutdown is signaled.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn load_base_bundles(dir: &Path) -> Result<BaseBundles> {
    let [alpine, fedora, ubuntu] = BaseBundles::KEYS;
    Ok(BaseBundles {
        alpine: read_asset(dir, alpine).await?,
        fedora: read_asset(dir, fedora).await?,
        ubuntu: read_asset(dir, ubuntu).await?,
    })
}

async fn read_asset(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read CA bundle {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_missing_assets() {
        let error = load_base_bundles(Path::new("/nonexistent/qtap/ca-assets"))
            .await
            .expect_err("assets must exist");
        assert_eq!(
            error.to_string(),
            "failed to read CA bundle /nonexistent/qtap/ca-assets/alpine-cert.pem"
        );
    }
}
