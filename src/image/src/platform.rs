//! Target platform for manifest-list resolution.

use std::fmt;

use skiff_core::error::{Result, SkiffError};

/// `os/architecture[/variant]` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Linux on the host CPU, with Rust arch names mapped to OCI ones.
    pub fn host() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64le",
            other => other,
        };
        Self::new("linux", architecture)
    }

    /// Parse `os/arch[/variant]`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let invalid = || SkiffError::Config(format!("invalid platform '{}': expected os/arch[/variant]", s));
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Self::new(*os, *arch)),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Self::new(*os, *arch).with_variant(*variant))
            }
            _ => Err(invalid()),
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Apply per-field overrides on top of this platform. Overriding the
    /// architecture drops a variant that was not also overridden.
    pub fn with_overrides(
        mut self,
        os: Option<&str>,
        architecture: Option<&str>,
        variant: Option<&str>,
    ) -> Self {
        if let Some(os) = os {
            self.os = os.to_string();
        }
        if let Some(arch) = architecture {
            if arch != self.architecture {
                self.variant = None;
            }
            self.architecture = arch.to_string();
        }
        if let Some(v) = variant {
            self.variant = Some(v.to_string());
        }
        self
    }

    /// Whether a manifest-list entry's platform satisfies this one. An unset
    /// variant accepts any; `arm64` treats a missing variant as `v8`.
    pub fn matches(&self, os: &str, architecture: &str, variant: Option<&str>) -> bool {
        if self.os != os || self.architecture != architecture {
            return false;
        }
        match (&self.variant, variant) {
            (None, _) => true,
            (Some(want), Some(have)) => want == have,
            (Some(want), None) => architecture == "arm64" && want == "v8",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(v) = &self.variant {
            write!(f, "/{}", v)?;
        }
        Ok(())
    }
}
