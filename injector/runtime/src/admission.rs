use crate::metrics::{AdmissionMetrics, Outcome};
use anyhow::Result;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{core::admission::Operation, Resource};
use qtap_injector_core::{Mutation, Mutator, Pod};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Clone)]
pub struct Admission {
    mutator: Mutator,
    metrics: AdmissionMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<Pod>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<Pod>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<kube::core::DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => admission.admit(req).await,
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(allowed = rsp.allowed, patched = rsp.patch.is_some());
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(mutator: Mutator, metrics: AdmissionMetrics) -> Self {
        Self { mutator, metrics }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        if req.operation != Operation::Create || !is_pod(&req) {
            debug!(operation = ?req.operation, kind = %req.kind.kind, "Ignoring");
            return rsp;
        }

        let Some(pod) = req.object else {
            self.metrics.record(None, Outcome::Denied);
            return rsp.deny("admission request missing 'object'");
        };
        let namespace = req
            .namespace
            .or_else(|| pod.metadata.namespace.clone())
            .unwrap_or_default();
        let name = pod
            .metadata
            .name
            .clone()
            .or_else(|| pod.metadata.generate_name.clone())
            .unwrap_or_default();

        let Mutation { egress, pod: mutated } =
            match self.mutator.mutate(&namespace, pod.clone()).await {
                Ok(mutation) => mutation,
                Err(error) => {
                    warn!(%error, %namespace, %name, "Denied");
                    self.metrics.record(error.egress, Outcome::Denied);
                    return rsp.deny(error);
                }
            };

        if mutated == pod {
            self.metrics.record(Some(egress), Outcome::Allowed);
            return rsp;
        }

        match patch(&pod, &mutated).and_then(|patch| Ok(rsp.clone().with_patch(patch)?)) {
            Ok(rsp) => {
                info!(%namespace, %name, %egress, "Mutated");
                self.metrics.record(Some(egress), Outcome::Mutated);
                rsp
            }
            Err(error) => {
                warn!(%error, %namespace, %name, "Failed to build patch");
                self.metrics.record(Some(egress), Outcome::Denied);
                rsp.deny(error)
            }
        }
    }
}

fn is_pod(req: &AdmissionRequest) -> bool {
    req.kind.group.eq_ignore_ascii_case(&Pod::group(&()))
        && req.kind.kind.eq_ignore_ascii_case(&Pod::kind(&()))
}

fn patch(original: &Pod, mutated: &Pod) -> Result<json_patch::Patch> {
    let original = serde_json::to_value(original)?;
    let mutated = serde_json::to_value(mutated)?;
    Ok(json_patch::diff(&original, &mutated))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
