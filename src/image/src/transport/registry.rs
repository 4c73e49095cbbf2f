//! Registry transport.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, Quay, private registries). Manifest lists are returned
//! unresolved; platform selection happens in [`crate::resolve`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use skiff_core::error::{Result, SkiffError};

use super::{ImageSource, SourceContext};
use crate::digest::Digest;
use crate::manifest::{ManifestBundle, ACCEPTED_MANIFEST_TYPES};
use crate::reference::{ImageReference, Locator};

/// One repository at a registry.
pub struct RegistrySource {
    reference: ImageReference,
    registry: String,
    oci_ref: Reference,
    client: Client,
    auth: OciRegistryAuth,
    timeout: Option<Duration>,
}

impl RegistrySource {
    /// Prepare a client for a fully-qualified registry reference.
    pub fn new(reference: &ImageReference, ctx: &SourceContext) -> Result<Self> {
        let registry = reference.authority.clone().ok_or_else(|| {
            SkiffError::malformed(
                reference.to_string(),
                "registry pulls need a fully-qualified reference",
            )
        })?;

        let protocol = if ctx.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(ctx.insecure_registries.clone())
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        let timeout = match (ctx.connect_timeout, ctx.read_timeout) {
            (Some(c), Some(r)) => Some(c + r),
            (c, r) => c.or(r),
        };

        Ok(Self {
            oci_ref: to_oci_reference(reference)?,
            auth: ctx.auth.for_registry(&registry).to_oci_auth(),
            reference: reference.clone(),
            registry,
            client,
            timeout,
        })
    }

    /// Run a registry call under the configured deadline and classify its error.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, OciDistributionError>>,
    {
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                SkiffError::TransientNetwork {
                    registry: self.registry.clone(),
                    message: format!("request timed out after {}s", limit.as_secs()),
                }
            })?,
            None => fut.await,
        };
        outcome.map_err(|e| classify(e, &self.reference.full_reference(), &self.registry))
    }

    async fn pull_manifest(&self, oci_ref: &Reference, expected: Option<&Digest>) -> Result<ManifestBundle> {
        let attempt = || async {
            self.bounded(
                self.client
                    .pull_manifest_raw(oci_ref, &self.auth, ACCEPTED_MANIFEST_TYPES),
            )
            .await
        };

        // Manifest GETs are re-read once on a transient failure.
        let (bytes, _) = match attempt().await {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    reference = %oci_ref,
                    error = %e,
                    "Transient error fetching manifest, retrying once"
                );
                attempt().await?
            }
            other => other?,
        };

        let bundle = ManifestBundle::new(bytes);
        if let Some(expected) = expected {
            if &bundle.digest != expected {
                return Err(SkiffError::DigestMismatch {
                    reference: self.reference.full_reference(),
                    expected: expected.to_string(),
                    actual: bundle.digest.to_string(),
                });
            }
        }
        Ok(bundle)
    }
}

#[async_trait]
impl ImageSource for RegistrySource {
    fn reference(&self) -> &ImageReference {
        &self.reference
    }

    async fn fetch_manifest(&self) -> Result<ManifestBundle> {
        tracing::debug!(reference = %self.reference, "Fetching manifest");
        self.pull_manifest(&self.oci_ref, self.reference.digest()).await
    }

    async fn fetch_manifest_by_digest(&self, digest: &Digest) -> Result<ManifestBundle> {
        let by_digest = to_oci_reference(&ImageReference {
            locator: Some(Locator::Digest(digest.clone())),
            ..self.reference.clone()
        })?;
        self.pull_manifest(&by_digest, Some(digest)).await
    }

    async fn fetch_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let descriptor: OciDescriptor = serde_json::from_value(serde_json::json!({
            "mediaType": "application/octet-stream",
            "digest": digest.to_string(),
            "size": 0,
        }))?;

        tracing::debug!(digest = %digest, "Pulling blob");
        let mut data: Vec<u8> = Vec::new();
        self.bounded(self.client.pull_blob(&self.oci_ref, &descriptor, &mut data))
            .await?;
        digest.verify(&self.reference.full_reference(), &data)?;
        Ok(data)
    }

    fn default_names(&self) -> Vec<String> {
        match self.reference.locator {
            Some(Locator::Tag(_)) => vec![self.reference.full_reference()],
            _ => Vec::new(),
        }
    }

    async fn list_tags(&self) -> Result<Vec<String>> {
        let response = self
            .bounded(self.client.list_tags(&self.oci_ref, &self.auth, None, None))
            .await?;
        Ok(response.tags)
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        SkiffError::malformed(ref_str.clone(), format!("invalid registry reference: {}", e))
    })
}

/// Map a distribution-client error onto the engine's error kinds.
fn classify(err: OciDistributionError, reference: &str, registry: &str) -> SkiffError {
    let auth_failure = |message: String| SkiffError::AuthenticationFailure {
        registry: registry.to_string(),
        message,
    };
    let unknown = |message: String| SkiffError::ManifestUnknown {
        reference: reference.to_string(),
        message,
    };

    match err {
        OciDistributionError::AuthenticationFailure(msg) => auth_failure(msg),
        OciDistributionError::UnauthorizedError { url } => {
            auth_failure(format!("unauthorized: {}", url))
        }
        OciDistributionError::ImageManifestNotFoundError(msg) => unknown(msg),
        OciDistributionError::ManifestParsingError(msg) => SkiffError::MalformedManifest {
            reference: reference.to_string(),
            message: msg,
        },
        OciDistributionError::ServerError { code, url, message } => match code {
            404 => unknown(format!("{}: {}", url, message)),
            401 | 403 => auth_failure(format!("{}: {}", url, message)),
            500..=599 => SkiffError::TransientNetwork {
                registry: registry.to_string(),
                message: format!("server error {}: {}", code, message),
            },
            _ => SkiffError::Registry {
                registry: registry.to_string(),
                message: format!("unexpected status {} from {}: {}", code, url, message),
            },
        },
        OciDistributionError::RegistryError { envelope, url } => {
            let codes: Vec<String> = envelope
                .errors
                .iter()
                .map(|e| format!("{:?}: {}", e.code, e.message))
                .collect();
            let summary = format!("{}: {}", url, codes.join(", "));
            if codes
                .iter()
                .any(|c| c.starts_with("ManifestUnknown") || c.starts_with("NameUnknown"))
            {
                unknown(summary)
            } else if codes
                .iter()
                .any(|c| c.starts_with("Unauthorized") || c.starts_with("Denied"))
            {
                auth_failure(summary)
            } else {
                SkiffError::Registry {
                    registry: registry.to_string(),
                    message: summary,
                }
            }
        }
        OciDistributionError::RequestError(e) if e.is_connect() || e.is_timeout() => {
            SkiffError::TransientNetwork {
                registry: registry.to_string(),
                message: e.to_string(),
            }
        }
        other => SkiffError::Registry {
            registry: registry.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthResolver;

    fn ctx() -> SourceContext {
        SourceContext {
            auth: AuthResolver::default(),
            insecure_registries: vec!["localhost:5000".to_string()],
            connect_timeout: Some(Duration::from_secs(1)),
            read_timeout: Some(Duration::from_secs(2)),
        }
    }

    #[test]
    fn test_to_oci_reference_with_tag() {
        let r = ImageReference::parse("quay.io/libpod/alpine:3.10.2").unwrap();
        let oci = to_oci_reference(&r).unwrap();
        assert_eq!(oci.registry(), "quay.io");
        assert_eq!(oci.repository(), "libpod/alpine");
        assert_eq!(oci.tag(), Some("3.10.2"));
    }

    #[test]
    fn test_to_oci_reference_with_digest() {
        let d = Digest::of_bytes(b"manifest");
        let r = ImageReference::parse(&format!("quay.io/libpod/alpine@{}", d)).unwrap();
        let oci = to_oci_reference(&r).unwrap();
        assert_eq!(oci.digest(), Some(d.as_str()));
    }

    #[test]
    fn test_new_requires_authority() {
        let r = ImageReference::parse("alpine").unwrap();
        assert!(matches!(
            RegistrySource::new(&r, &ctx()),
            Err(SkiffError::MalformedReference { .. })
        ));
    }

    #[test]
    fn test_default_names() {
        let tagged = ImageReference::parse("quay.io/libpod/alpine:latest").unwrap();
        let source = RegistrySource::new(&tagged, &ctx()).unwrap();
        assert_eq!(source.default_names(), vec!["quay.io/libpod/alpine:latest"]);
        assert_eq!(source.timeout, Some(Duration::from_secs(3)));

        let d = Digest::of_bytes(b"x");
        let pinned = ImageReference::parse(&format!("quay.io/libpod/alpine@{}", d)).unwrap();
        let source = RegistrySource::new(&pinned, &ctx()).unwrap();
        assert!(source.default_names().is_empty());
    }

    #[test]
    fn test_classify_errors() {
        let r = "quay.io/x:1";
        assert!(matches!(
            classify(OciDistributionError::AuthenticationFailure("bad".into()), r, "quay.io"),
            SkiffError::AuthenticationFailure { .. }
        ));
        assert!(matches!(
            classify(OciDistributionError::ImageManifestNotFoundError("gone".into()), r, "quay.io"),
            SkiffError::ManifestUnknown { .. }
        ));
        assert!(matches!(
            classify(
                OciDistributionError::ServerError {
                    code: 404,
                    url: "https://quay.io/v2/x/manifests/1".into(),
                    message: "not found".into()
                },
                r,
                "quay.io"
            ),
            SkiffError::ManifestUnknown { .. }
        ));
        let transient = classify(
            OciDistributionError::ServerError {
                code: 503,
                url: "https://quay.io/v2/".into(),
                message: "unavailable".into(),
            },
            r,
            "quay.io",
        );
        assert!(transient.is_transient());
    }
}
