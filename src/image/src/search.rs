//! Short-name expansion against the configured search registries.

use skiff_core::config::EngineConfig;
use skiff_core::error::{Result, SkiffError};

use crate::reference::{normalize_authority, ImageReference, LOCALHOST};

/// Ordered unqualified-search registries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRegistries {
    registries: Vec<String>,
}

impl SearchRegistries {
    pub fn new<I, S>(registries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = Vec::new();
        for r in registries {
            let r = normalize_authority(r.as_ref());
            if !r.is_empty() && !seen.contains(&r) {
                seen.push(r);
            }
        }
        Self { registries: seen }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.search_registries)
    }

    pub fn registries(&self) -> &[String] {
        &self.registries
    }

    /// Remote pull candidates: the reference itself when qualified, one per
    /// search registry (in order) for short names.
    pub fn candidates(&self, reference: &ImageReference) -> Result<Vec<ImageReference>> {
        if !reference.is_short_name() {
            return Ok(vec![reference.clone()]);
        }
        if self.registries.is_empty() {
            return Err(SkiffError::NoSearchRegistriesConfigured(
                reference.full_reference(),
            ));
        }
        Ok(self
            .registries
            .iter()
            .map(|r| reference.with_authority(r))
            .collect())
    }

    /// Local lookup candidates: same order as [`candidates`](Self::candidates)
    /// with `localhost` last, so locally built or tagged images resolve by
    /// short name too.
    pub fn local_candidates(&self, reference: &ImageReference) -> Vec<ImageReference> {
        if !reference.is_short_name() {
            return vec![reference.clone()];
        }
        let mut out: Vec<ImageReference> = self
            .registries
            .iter()
            .filter(|r| r.as_str() != LOCALHOST)
            .map(|r| reference.with_authority(r))
            .collect();
        out.push(reference.with_authority(LOCALHOST));
        out
    }
}
