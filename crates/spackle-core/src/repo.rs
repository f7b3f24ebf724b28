//! Immutable package repository snapshots.

use crate::error::{Error, Result};
use crate::hash::{ContentHash, ContentHasher};
use crate::package::PackageDef;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// An immutable snapshot of package definitions plus a provider index.
///
/// Snapshots are cheap to share behind an [`Arc`]. Editing a definition means
/// building a new snapshot, which changes [`content_version`](Self::content_version).
#[derive(Debug, Clone)]
pub struct PackageRepository {
    packages: BTreeMap<String, Arc<PackageDef>>,
    /// Virtual name to provider package names, sorted.
    providers: BTreeMap<String, Vec<String>>,
    content_version: ContentHash,
}

impl PackageRepository {
    /// Build a snapshot from definitions.
    ///
    /// # Errors
    /// Fails when a definition is invalid, a name is declared twice, or a
    /// package name collides with a provided virtual.
    pub fn new(packages: impl IntoIterator<Item = PackageDef>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for mut def in packages {
            def.validate()?;
            def.lower_capabilities();
            let name = def.name.clone();
            if by_name.insert(name.clone(), Arc::new(def)).is_some() {
                return Err(Error::InvalidPackage {
                    name,
                    message: "defined twice".into(),
                });
            }
        }

        let mut providers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for def in by_name.values() {
            for provided in &def.provides {
                let list = providers.entry(provided.virtual_name.clone()).or_default();
                if !list.contains(&def.name) {
                    list.push(def.name.clone());
                }
            }
        }
        for (virtual_name, list) in &mut providers {
            if by_name.contains_key(virtual_name) {
                return Err(Error::InvalidPackage {
                    name: virtual_name.clone(),
                    message: "name is both a package and a provided virtual".into(),
                });
            }
            list.sort();
        }

        let mut hasher = ContentHasher::new();
        for def in by_name.values() {
            hasher.field(&sonic_rs::to_string(def.as_ref())?);
        }
        let content_version = hasher.finalize();

        debug!(
            packages = by_name.len(),
            virtuals = providers.len(),
            version = %content_version.short(),
            "repository snapshot built"
        );

        Ok(Self {
            packages: by_name,
            providers,
            content_version,
        })
    }

    /// Load a snapshot from a JSON array of package definitions.
    ///
    /// # Errors
    /// Fails on malformed JSON or invalid definitions.
    pub fn from_json(json: &str) -> Result<Self> {
        let defs: Vec<PackageDef> = sonic_rs::from_str(json)?;
        Self::new(defs)
    }

    /// A new snapshot with `def` added or replaced.
    ///
    /// # Errors
    /// Same as [`new`](Self::new).
    pub fn with_package(&self, def: PackageDef) -> Result<Self> {
        let mut defs: Vec<PackageDef> = self
            .packages
            .values()
            .filter(|existing| existing.name != def.name)
            .map(|existing| existing.as_ref().clone())
            .collect();
        defs.push(def);
        Self::new(defs)
    }

    /// Look up a package.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<PackageDef>> {
        self.packages.get(name)
    }

    /// Whether `name` is a virtual with at least one provider.
    #[must_use]
    pub fn is_virtual(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Whether `name` is a package or a virtual.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name) || self.providers.contains_key(name)
    }

    /// Packages providing `virtual_name`, sorted by name.
    #[must_use]
    pub fn providers_of(&self, virtual_name: &str) -> &[String] {
        self.providers
            .get(virtual_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All packages in name order.
    pub fn packages(&self) -> impl Iterator<Item = &Arc<PackageDef>> {
        self.packages.values()
    }

    /// Number of packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Hash over every definition; changes on any add or edit.
    #[must_use]
    pub const fn content_version(&self) -> ContentHash {
        self.content_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mpi_repo() -> PackageRepository {
        PackageRepository::new([
            PackageDef::builder("openmpi")
                .version("4.1.5")
                .provides("mpi@:3.1")
                .build()
                .unwrap(),
            PackageDef::builder("mpich")
                .version("4.1")
                .provides("mpi@:4.0")
                .build()
                .unwrap(),
            PackageDef::builder("hdf5")
                .version("1.14.0")
                .depends_on("mpi")
                .build()
                .unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn provider_index_is_sorted() {
        let repo = mpi_repo();
        assert_eq!(repo.providers_of("mpi"), ["mpich", "openmpi"]);
        assert!(repo.is_virtual("mpi"));
        assert!(!repo.is_virtual("hdf5"));
        assert!(repo.contains("mpi") && repo.contains("hdf5"));
        assert!(repo.providers_of("blas").is_empty());
    }

    #[test]
    fn content_version_tracks_edits() {
        let repo = mpi_repo();
        let same = mpi_repo();
        assert_eq!(repo.content_version(), same.content_version());

        let edited = repo
            .with_package(
                PackageDef::builder("hdf5")
                    .version("1.14.0")
                    .version("1.14.1")
                    .depends_on("mpi")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert_ne!(repo.content_version(), edited.content_version());
        assert_eq!(edited.len(), 3);
    }

    #[test]
    fn rejects_name_collisions() {
        let err = PackageRepository::new([
            PackageDef::builder("mpi").version("1.0").build().unwrap(),
            PackageDef::builder("openmpi")
                .version("4.1")
                .provides("mpi")
                .build()
                .unwrap(),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPackage { name, .. } if name == "mpi"));

        let dup = PackageDef::builder("a").version("1.0").build().unwrap();
        assert!(PackageRepository::new([dup.clone(), dup]).is_err());
    }

    #[test]
    fn loads_json_fixtures() {
        let repo = PackageRepository::from_json(
            r#"[
                {"name": "a", "versions": [{"version": "1.0"}],
                 "dependencies": [{"target": "b", "constraint": "@:1.0"}]},
                {"name": "b", "versions": [{"version": "0.9"}, {"version": "1.1", "deprecated": true}]}
            ]"#,
        )
        .unwrap();
        let a = repo.get("a").unwrap();
        assert_eq!(a.dependencies[0].types.to_string(), "build,link");
        assert!(repo.get("b").unwrap().versions[1].deprecated);
    }
}
