use crate::Error;
use std::collections::BTreeMap;

/// Every `qpoint.io/` annotation that configures pod mutation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Annotation {
    InjectCa,

    InitTag,
    InitRunAsUser,
    InitRunAsGroup,
    InitRunAsNonRoot,
    InitPrivileged,
    InitToAddr,
    InitToDomain,
    InitPortMapping,
    InitAcceptUids,
    InitAcceptGids,

    Tag,
    Uid,
    Gid,
    StatusListen,
    LogLevel,
    LogEncoding,
    LogCaller,
    HttpListen,
    HttpsListen,
    BlockUnknown,
    EnvoyLogLevel,
    DnsLookupFamily,
    ApiEndpoint,
    LabelsTagsFilter,
}

/// A read-only view of a pod's annotations after defaults have been merged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Annotations(BTreeMap<String, String>);

// === impl Annotation ===

impl Annotation {
    pub const fn key(&self) -> &'static str {
        match self {
            Self::InjectCa => "qpoint.io/inject-ca",
            Self::InitTag => "qpoint.io/qtap-init-tag",
            Self::InitRunAsUser => "qpoint.io/qtap-init-run-as-user",
            Self::InitRunAsGroup => "qpoint.io/qtap-init-run-as-group",
            Self::InitRunAsNonRoot => "qpoint.io/qtap-init-run-as-non-root",
            Self::InitPrivileged => "qpoint.io/qtap-init-run-as-privileged",
            Self::InitToAddr => "qpoint.io/qtap-init-egress-to-addr",
            Self::InitToDomain => "qpoint.io/qtap-init-egress-to-domain",
            Self::InitPortMapping => "qpoint.io/qtap-init-egress-port-mapping",
            Self::InitAcceptUids => "qpoint.io/qtap-init-egress-accept-uids",
            Self::InitAcceptGids => "qpoint.io/qtap-init-egress-accept-gids",
            Self::Tag => "qpoint.io/qtap-tag",
            Self::Uid => "qpoint.io/qtap-uid",
            Self::Gid => "qpoint.io/qtap-gid",
            Self::StatusListen => "qpoint.io/qtap-status-listen",
            Self::LogLevel => "qpoint.io/qtap-log-level",
            Self::LogEncoding => "qpoint.io/qtap-log-encoding",
            Self::LogCaller => "qpoint.io/qtap-log-caller",
            Self::HttpListen => "qpoint.io/qtap-egress-http-listen",
            Self::HttpsListen => "qpoint.io/qtap-egress-https-listen",
            Self::BlockUnknown => "qpoint.io/qtap-block-unknown",
            Self::EnvoyLogLevel => "qpoint.io/qtap-envoy-log-level",
            Self::DnsLookupFamily => "qpoint.io/qtap-dns-lookup-family",
            Self::ApiEndpoint => "qpoint.io/qtap-api-endpoint",
            Self::LabelsTagsFilter => "qpoint.io/qtap-labels-tags-filter",
        }
    }
}

impl std::fmt::Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.key().fmt(f)
    }
}

// === impl Annotations ===

impl Annotations {
    /// Fills in every default that the pod does not already declare. Values set
    /// on the pod always win.
    pub fn merge(
        pod: Option<&BTreeMap<String, String>>,
        defaults: BTreeMap<String, String>,
    ) -> Self {
        let mut merged = pod.cloned().unwrap_or_default();
        for (key, value) in defaults {
            merged.entry(key).or_insert(value);
        }
        Self(merged)
    }

    /// Returns the annotation's value, if it is set to a non-empty string.
    pub fn get(&self, annotation: Annotation) -> Option<&str> {
        self.0
            .get(annotation.key())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Parses a base-10 integer annotation. An unset annotation is `None`; a
    /// value that does not parse is an error.
    pub fn get_i64(&self, annotation: Annotation) -> Result<Option<i64>, Error> {
        self.get(annotation)
            .map(|v| {
                v.parse::<i64>().map_err(|e| Error::InvalidAnnotation {
                    annotation,
                    value: v.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Parses a boolean annotation. Accepts `1`, `t`, `true` and `0`, `f`,
    /// `false` in lower, upper, or title case.
    pub fn get_bool(&self, annotation: Annotation) -> Result<Option<bool>, Error> {
        self.get(annotation)
            .map(|v| match v {
                "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
                "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
                v => Err(Error::InvalidAnnotation {
                    annotation,
                    value: v.to_string(),
                    reason: "expected a boolean".to_string(),
                }),
            })
            .transpose()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for Annotations {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}
