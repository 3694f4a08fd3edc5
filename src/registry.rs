use std::collections::BTreeMap;

use crate::config::ResolvedConfig;
use crate::domain::SourceKind;
use crate::error::AfDataError;
use crate::source::Source;

/// Name to source mapping, built once per invocation and read-only after.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Source>,
}

impl SourceRegistry {
    /// The default set: everything AlphaFold needs that has a pinned,
    /// version-addressable archive. The PDB mirror is opt-in.
    pub fn pinned() -> Result<Self, AfDataError> {
        Self::from_config(&ResolvedConfig::default())
    }

    pub fn from_config(config: &ResolvedConfig) -> Result<Self, AfDataError> {
        let sources = config
            .sources
            .iter()
            .map(|request| Source::new(request.kind, &request.version))
            .collect::<Result<Vec<_>, AfDataError>>()?;
        Ok(Self::from_sources(sources))
    }

    pub fn from_sources(sources: impl IntoIterator<Item = Source>) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.name().to_string(), source))
            .collect();
        Self { sources }
    }

    /// Keeps only the given kinds; an empty filter keeps everything. Asking
    /// for a kind that is not configured is an error, not an empty batch.
    pub fn restricted_to(self, kinds: &[SourceKind]) -> Result<Self, AfDataError> {
        if kinds.is_empty() {
            return Ok(self);
        }
        if let Some(missing) = kinds
            .iter()
            .find(|kind| !self.sources.values().any(|source| source.kind() == **kind))
        {
            return Err(AfDataError::NotConfigured(*missing));
        }
        let sources = self
            .sources
            .into_iter()
            .filter(|(_, source)| kinds.contains(&source.kind()))
            .collect();
        Ok(Self { sources })
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_registry_is_keyed_by_flag() {
        let registry = SourceRegistry::pinned().unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("params").unwrap().kind(), SourceKind::Params);
        assert_eq!(registry.get("mgnify").unwrap().version(), "2022_05");
        assert!(registry.get("pdb_mmcif").is_none());
    }

    #[test]
    fn restriction_filters_by_kind() {
        let registry = SourceRegistry::pinned()
            .unwrap()
            .restricted_to(&[SourceKind::Bfd])
            .unwrap();
        let names = registry.iter().map(Source::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["bfd"]);
    }

    #[test]
    fn restricting_to_an_unconfigured_kind_fails() {
        let err = SourceRegistry::pinned()
            .unwrap()
            .restricted_to(&[SourceKind::Params, SourceKind::PdbMmcif])
            .unwrap_err();
        assert!(matches!(err, AfDataError::NotConfigured(SourceKind::PdbMmcif)));
    }
}
