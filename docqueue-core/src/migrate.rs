//! Lazy, read-time schema migrations.
//!
//! Each collection may register a [`MigrationChain`]: an ordered list of [`Migration`]s,
//! one per schema version. Whenever a worker reads a raw document it runs it through
//! [`MigrationRegistry::migrate`], which walks the chain from the document's current
//! `version` until the version stops changing:
//!
//! 1. Find the chain entry whose version equals the document's version (a missing version
//!    is `""`). No entry means the document is already past the chain, so stop.
//! 2. Call the entry's `transform` with the version of the following entry, or with the
//!    entry's own version when it is the last one.
//! 3. Run the entry's `dependency` step with the document `_id`.
//! 4. Stop if `version` did not change, otherwise continue from step 1.
//!
//! Transforms are responsible for writing the new `version` themselves. A transform may
//! only move a document forward along its chain; moving it back to an earlier entry is
//! reported as [`DocQueueError::MalformedMigrationChain`], which also bounds the walk to
//! one pass over the chain.
//!
//! Migrated documents are never written back: the walk is repeated on every read until
//! the stored documents are rewritten by other means.
//!
//! # Example
//!
//! ```ignore
//! use docqueue::migrate::{FnMigration, MigrationRegistry, set_version};
//!
//! let registry = MigrationRegistry::builder()
//!     .register("users", vec![
//!         Box::new(FnMigration::new("", |doc, next| {
//!             doc.insert("tags", bson::Bson::Array(vec![]));
//!             set_version(doc, next);
//!         })),
//!         Box::new(FnMigration::new("v1", |_, _| {})),
//!     ])
//!     .build()?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug},
};
use tracing::{error, trace};

use crate::{
    connection::Connection,
    document::{VERSION_FIELD, document_id, document_version},
    error::{DocQueueError, DocQueueResult},
};

/// What to do when a migration's dependency step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyFailure {
    /// Log the failure, stop migrating that document and let the read succeed with the
    /// partially migrated document.
    #[default]
    Log,
    /// Fail the read that triggered the migration with
    /// [`DocQueueError::MigrationDependency`].
    Propagate,
}

/// A single step in a collection's schema chain.
#[async_trait]
pub trait Migration: Send + Sync {
    /// The schema version this step upgrades from.
    fn version(&self) -> &str;

    /// Upgrades the document in place, including its `version` field.
    ///
    /// `next` is the version of the following chain entry, or this step's own version when
    /// it is the last one. Leaving `version` untouched ends the walk.
    fn transform(&self, document: &mut Document, next: &str);

    /// Side effect keyed by the migrated document's `_id`, run after `transform`.
    ///
    /// `connection` is the connection of the worker running the read.
    async fn dependency(&self, _id: &Bson, _connection: &dyn Connection) -> DocQueueResult<()> {
        Ok(())
    }
}

pub type MigrationRef = Box<dyn Migration>;

type TransformFn = dyn Fn(&mut Document, &str) + Send + Sync;
type DependencyFn = dyn Fn(&Bson) -> DocQueueResult<()> + Send + Sync;

/// A [`Migration`] assembled from closures.
pub struct FnMigration {
    version: String,
    transform: Box<TransformFn>,
    dependency: Option<Box<DependencyFn>>,
}

impl FnMigration {
    pub fn new(
        version: impl Into<String>,
        transform: impl Fn(&mut Document, &str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            version: version.into(),
            transform: Box::new(transform),
            dependency: None,
        }
    }

    pub fn with_dependency(
        mut self,
        dependency: impl Fn(&Bson) -> DocQueueResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.dependency = Some(Box::new(dependency));
        self
    }
}

#[async_trait]
impl Migration for FnMigration {
    fn version(&self) -> &str {
        &self.version
    }

    fn transform(&self, document: &mut Document, next: &str) {
        (self.transform)(document, next)
    }

    async fn dependency(&self, id: &Bson, _connection: &dyn Connection) -> DocQueueResult<()> {
        match &self.dependency {
            Some(dependency) => dependency(id),
            None => Ok(()),
        }
    }
}

/// Writes `version` into the document's version field.
pub fn set_version(document: &mut Document, version: &str) {
    document.insert(VERSION_FIELD, version);
}

/// The ordered migrations of one collection. Immutable once built.
pub struct MigrationChain {
    migrations: Vec<MigrationRef>,
}

impl MigrationChain {
    /// Builds a chain, ordered as given.
    ///
    /// # Errors
    ///
    /// Returns [`DocQueueError::MalformedMigrationChain`] if two entries share a version.
    pub fn new(migrations: Vec<MigrationRef>) -> DocQueueResult<Self> {
        let mut seen = HashSet::new();

        for migration in &migrations {
            if !seen.insert(migration.version()) {
                return Err(DocQueueError::MalformedMigrationChain(format!(
                    "version '{}' appears more than once",
                    migration.version()
                )));
            }
        }

        Ok(Self { migrations })
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.migrations.iter().map(|migration| migration.version())
    }

    fn position(&self, version: &str) -> Option<usize> {
        self.migrations
            .iter()
            .position(|migration| migration.version() == version)
    }

    fn next_version(&self, index: usize) -> &str {
        self.migrations
            .get(index + 1)
            .unwrap_or(&self.migrations[index])
            .version()
    }
}

impl Debug for MigrationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.versions()).finish()
    }
}

/// How a [`MigrationRegistry::migrate`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The collection has no chain; the document was not touched.
    Untracked,
    /// The document's version matches no chain entry; the document was not touched.
    Unrecognized(String),
    /// The walk finished normally after `steps` transforms.
    Settled { version: String, steps: usize },
    /// A dependency step failed and was logged; the document stopped at `version`.
    Aborted { version: String, steps: usize },
}

/// Migration chains keyed by collection name.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    chains: HashMap<String, MigrationChain>,
    dependency_failure: DependencyFailure,
}

impl MigrationRegistry {
    /// An empty registry: every collection is untracked.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MigrationRegistryBuilder {
        MigrationRegistryBuilder::default()
    }

    pub fn with_dependency_failure(mut self, policy: DependencyFailure) -> Self {
        self.dependency_failure = policy;
        self
    }

    pub fn dependency_failure(&self) -> DependencyFailure {
        self.dependency_failure
    }

    pub fn chain(&self, collection: &str) -> Option<&MigrationChain> {
        self.chains.get(collection)
    }

    /// Upgrades `document` in place along the chain registered for `collection`.
    ///
    /// # Errors
    ///
    /// - [`DocQueueError::MalformedMigrationChain`] if a transform moves the document back
    ///   to an earlier chain entry
    /// - [`DocQueueError::MigrationDependency`] if a dependency step fails and the policy
    ///   is [`DependencyFailure::Propagate`]
    pub async fn migrate(
        &self,
        collection: &str,
        document: &mut Document,
        connection: &dyn Connection,
    ) -> DocQueueResult<MigrationOutcome> {
        let Some(chain) = self.chains.get(collection) else {
            return Ok(MigrationOutcome::Untracked);
        };

        let Some(mut current) = document_version(document) else {
            return Ok(MigrationOutcome::Unrecognized(raw_version(document)));
        };
        let mut applied: Option<usize> = None;
        let mut steps = 0;

        loop {
            let Some(index) = chain.position(&current) else {
                return Ok(match steps {
                    0 => MigrationOutcome::Unrecognized(current),
                    _ => MigrationOutcome::Settled { version: current, steps },
                });
            };

            if let Some(previous) = applied.filter(|previous| index <= *previous) {
                return Err(DocQueueError::MalformedMigrationChain(format!(
                    "migration '{}' of collection {} moved a document back to version '{}'",
                    chain.migrations[previous].version(),
                    collection,
                    current,
                )));
            }

            let migration = &chain.migrations[index];
            migration.transform(document, chain.next_version(index));
            steps += 1;

            let updated = document_version(document);
            let reached = updated.clone().unwrap_or_else(|| raw_version(document));
            trace!(collection, from = %current, to = %reached, "applied migration");

            let id = document_id(document);
            if let Err(err) = migration.dependency(&id, connection).await {
                match self.dependency_failure {
                    DependencyFailure::Log => {
                        error!(
                            collection,
                            id = %id,
                            version = %reached,
                            error = %err,
                            "migration dependency failed, leaving document at its current version"
                        );

                        return Ok(MigrationOutcome::Aborted { version: reached, steps });
                    }
                    DependencyFailure::Propagate => {
                        return Err(DocQueueError::MigrationDependency {
                            collection: collection.to_string(),
                            id: id.to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }

            let Some(updated) = updated else {
                return Ok(MigrationOutcome::Settled { version: reached, steps });
            };

            if updated == current {
                return Ok(MigrationOutcome::Settled { version: updated, steps });
            }

            applied = Some(index);
            current = updated;
        }
    }
}

fn raw_version(document: &Document) -> String {
    document
        .get(VERSION_FIELD)
        .map(ToString::to_string)
        .unwrap_or_default()
}

#[derive(Default)]
pub struct MigrationRegistryBuilder {
    chains: Vec<(String, Vec<MigrationRef>)>,
}

impl MigrationRegistryBuilder {
    /// Registers the chain for `collection`, ordered as given.
    pub fn register(mut self, collection: impl Into<String>, migrations: Vec<MigrationRef>) -> Self {
        self.chains.push((collection.into(), migrations));
        self
    }

    /// # Errors
    ///
    /// Returns [`DocQueueError::MalformedMigrationChain`] if a collection is registered
    /// twice or a chain repeats a version.
    pub fn build(self) -> DocQueueResult<MigrationRegistry> {
        let mut chains = HashMap::with_capacity(self.chains.len());

        for (collection, migrations) in self.chains {
            if chains.contains_key(&collection) {
                return Err(DocQueueError::MalformedMigrationChain(format!(
                    "collection {collection} registered more than once"
                )));
            }

            chains.insert(collection, MigrationChain::new(migrations)?);
        }

        Ok(MigrationRegistry {
            chains,
            dependency_failure: DependencyFailure::default(),
        })
    }
}
