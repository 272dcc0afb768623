//! Relation graph resolver.
//!
//! Entities are registered by name. [`Schema::run`] invokes one action and
//! then follows the `nextpages` edges configured for it, attaching child
//! results to the parent rows they correlate with.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use taodbi_core::{Args, Filter, Page, Row, TableDescriptor, Value};
use tracing::{debug, warn};

use crate::call::{Call, Reply};
use crate::dbi::Dbi;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::rmodel::RestModel;
use crate::smodel::SuperModel;

// ---------------------------------------------------------------------------
// Verbs
// ---------------------------------------------------------------------------

/// Every action name an entity kind can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Topics,
    Edit,
    EditFk,
    Insert,
    Insupd,
    Total,
    Update,
    Delete,
    LastTopics,
    LastEdit,
    ReleaseTopics,
    CreateTable,
    DropTable,
}

impl Verb {
    const ALL: [Verb; 13] = [
        Verb::Topics,
        Verb::Edit,
        Verb::EditFk,
        Verb::Insert,
        Verb::Insupd,
        Verb::Total,
        Verb::Update,
        Verb::Delete,
        Verb::LastTopics,
        Verb::LastEdit,
        Verb::ReleaseTopics,
        Verb::CreateTable,
        Verb::DropTable,
    ];

    /// The action name used in configuration and in [`Schema::run`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topics => "topics",
            Self::Edit => "edit",
            Self::EditFk => "editfk",
            Self::Insert => "insert",
            Self::Insupd => "insupd",
            Self::Total => "total",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::LastTopics => "last_topics",
            Self::LastEdit => "last_edit",
            Self::ReleaseTopics => "release_topics",
            Self::CreateTable => "create_table",
            Self::DropTable => "drop_table",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == name)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Navigate trait
// ---------------------------------------------------------------------------

/// What the resolver needs from an entity kind.
pub trait Navigate: Send + Sync + 'static {
    /// The descriptor holding the entity's control names, edges and
    /// `actions` allow-list.
    fn descriptor(&self) -> &TableDescriptor;

    /// Verbs this kind implements.
    fn verbs(&self) -> &'static [Verb];

    /// Runs one verb. Only called with a verb from [`Navigate::verbs`].
    fn invoke(&self, dbi: &Dbi, verb: Verb, call: Call) -> Result<Reply>;

    /// Resolves an action name to a verb this entity exposes.
    fn action(&self, name: &str) -> Option<Verb> {
        Verb::from_name(name)
            .filter(|v| self.verbs().contains(v))
            .filter(|_| self.descriptor().exposes(name))
    }

    fn next_pages(&self, action: &str) -> &[Page] {
        self.descriptor().next_pages(action)
    }

    /// The reply args handed to child actions: pagination and sort
    /// parameters removed.
    fn forwarded_args(&self, args: &Args) -> Args {
        let strip = self.descriptor().controls.pagination_keys();
        args.iter()
            .filter(|(k, _)| !strip.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

const MODEL_VERBS: &[Verb] = &[
    Verb::Topics,
    Verb::Edit,
    Verb::EditFk,
    Verb::Insert,
    Verb::Insupd,
    Verb::Total,
];

const SUPER_VERBS: &[Verb] = &[
    Verb::Topics,
    Verb::Edit,
    Verb::EditFk,
    Verb::Insert,
    Verb::Insupd,
    Verb::Total,
    Verb::LastTopics,
    Verb::LastEdit,
    Verb::ReleaseTopics,
    Verb::CreateTable,
    Verb::DropTable,
];

const REST_VERBS: &[Verb] = &[
    Verb::Topics,
    Verb::Edit,
    Verb::Insert,
    Verb::Insupd,
    Verb::Update,
    Verb::Delete,
    Verb::Total,
];

fn unsupported(descriptor: &TableDescriptor, verb: Verb) -> Error {
    Error::UnknownAction {
        entity: descriptor.current_table.clone(),
        action: verb.to_string(),
    }
}

impl Navigate for Model {
    fn descriptor(&self) -> &TableDescriptor {
        self.table()
    }

    fn verbs(&self) -> &'static [Verb] {
        MODEL_VERBS
    }

    fn invoke(&self, dbi: &Dbi, verb: Verb, call: Call) -> Result<Reply> {
        match verb {
            Verb::Topics => self.topics(dbi, call),
            Verb::Edit => self.edit(dbi, call),
            Verb::EditFk => self.edit_fk(dbi, call),
            Verb::Insert => self.insert(dbi, call),
            Verb::Insupd => self.insupd(dbi, call),
            Verb::Total => self.total(dbi, call),
            other => Err(unsupported(self.table(), other)),
        }
    }
}

impl Navigate for SuperModel {
    fn descriptor(&self) -> &TableDescriptor {
        self.table()
    }

    fn verbs(&self) -> &'static [Verb] {
        SUPER_VERBS
    }

    fn invoke(&self, dbi: &Dbi, verb: Verb, call: Call) -> Result<Reply> {
        match verb {
            Verb::LastTopics => self.last_topics(dbi, call),
            Verb::LastEdit => self.last_edit(dbi, call),
            Verb::ReleaseTopics => self.release_topics(dbi, call),
            Verb::CreateTable => self.create_table(dbi, call),
            Verb::DropTable => self.drop_table(dbi, call),
            other => self.model().invoke(dbi, other, call),
        }
    }
}

impl Navigate for RestModel {
    fn descriptor(&self) -> &TableDescriptor {
        self.table()
    }

    fn verbs(&self) -> &'static [Verb] {
        REST_VERBS
    }

    fn invoke(&self, dbi: &Dbi, verb: Verb, call: Call) -> Result<Reply> {
        match verb {
            Verb::Topics => self.topics(dbi, call),
            Verb::Edit => self.edit(dbi, call),
            Verb::Insert => self.insert(dbi, call),
            Verb::Insupd => self.insupd(dbi, call),
            Verb::Update => self.update(dbi, call),
            Verb::Delete => self.delete(dbi, call),
            Verb::Total => self.total(dbi, call),
            other => Err(unsupported(self.table(), other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Resolver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Deepest edge chain followed before giving up. Cyclic edge
    /// configurations hit this instead of recursing forever.
    pub max_depth: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { max_depth: 16 }
    }
}

/// Result of one [`Schema::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    /// The root action's rows, with correlated child results attached
    /// under each edge's result key.
    pub rows: Vec<Row>,
    /// Results of uncorrelated edges anywhere in the traversal, by result
    /// key.
    pub side: BTreeMap<String, Vec<Row>>,
    /// The root action's reply args.
    pub args: Args,
}

/// Registry of named entities sharing one store handle.
pub struct Schema {
    dbi: Dbi,
    entities: DashMap<String, Arc<dyn Navigate>>,
    config: SchemaConfig,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        names.sort();
        f.debug_struct("Schema")
            .field("entities", &names)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Schema {
    #[must_use]
    pub fn new(dbi: Dbi) -> Self {
        Self::with_config(dbi, SchemaConfig::default())
    }

    #[must_use]
    pub fn with_config(dbi: Dbi, config: SchemaConfig) -> Self {
        Self {
            dbi,
            entities: DashMap::new(),
            config,
        }
    }

    /// Registers `entity` under `name`, replacing any previous one.
    pub fn register(&self, name: &str, entity: impl Navigate) {
        self.entities.insert(name.to_string(), Arc::new(entity));
    }

    #[must_use]
    pub fn with_entity(self, name: &str, entity: impl Navigate) -> Self {
        self.register(name, entity);
        self
    }

    #[must_use]
    pub fn entity(&self, name: &str) -> Option<Arc<dyn Navigate>> {
        self.entities.get(name).map(|e| Arc::clone(e.value()))
    }

    #[must_use]
    pub fn dbi(&self) -> &Dbi {
        &self.dbi
    }

    /// Runs `action` on `entity` and follows its edges.
    ///
    /// `extra[0]` constrains the root action. `extra[1]`, if present, is
    /// added to every child call's constraint, and the rest are passed on
    /// down. Any failure aborts the whole traversal.
    pub fn run(&self, entity: &str, action: &str, args: Args, extra: Vec<Filter>) -> Result<Graph> {
        let mut side = BTreeMap::new();
        let reply = self.run_at(entity, action, args, extra, 0, &mut side)?;
        Ok(Graph {
            rows: reply.rows,
            side,
            args: reply.args,
        })
    }

    fn run_at(
        &self,
        entity: &str,
        action: &str,
        args: Args,
        extra: Vec<Filter>,
        depth: usize,
        side: &mut BTreeMap<String, Vec<Row>>,
    ) -> Result<Reply> {
        if depth > self.config.max_depth {
            return Err(Error::DepthExceeded {
                entity: entity.to_string(),
                action: action.to_string(),
                max_depth: self.config.max_depth,
            });
        }
        let model = self
            .entity(entity)
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))?;
        let verb = model.action(action).ok_or_else(|| Error::UnknownAction {
            entity: entity.to_string(),
            action: action.to_string(),
        })?;

        let pass_down: Vec<Filter> = extra.iter().skip(1).cloned().collect();
        let mut reply = model.invoke(&self.dbi, verb, Call { args, extra })?;

        let pages = model.next_pages(action);
        if reply.rows.is_empty() || pages.is_empty() {
            return Ok(reply);
        }
        let forwarded = model.forwarded_args(&reply.args);

        for page in pages {
            let mut base = pass_down.first().cloned().unwrap_or_default();
            base.merge(&page.manual_filter());
            let rest: Vec<Filter> = pass_down.iter().skip(1).cloned().collect();
            let key = page.result_key();

            if !page.is_correlated() {
                debug!(entity, action, edge = %key, "uncorrelated edge");
                let child_extra = std::iter::once(base).chain(rest).collect();
                let child = self.child(page, forwarded.clone(), child_extra, depth, side)?;
                side.entry(key).or_default().extend(child.rows);
                continue;
            }

            debug!(entity, action, edge = %key, rows = reply.rows.len(), "correlated edge");
            for row in &mut reply.rows {
                if page.ignore && row.contains_key(&key) {
                    continue;
                }
                let Some(correlation) = page.correlate(row) else {
                    continue;
                };
                let mut filter = base.clone();
                filter.merge(&correlation);
                let child_extra = std::iter::once(filter).chain(rest.iter().cloned()).collect();
                let child = self.child(page, forwarded.clone(), child_extra, depth, side)?;
                if !child.rows.is_empty() {
                    row.insert(key.clone(), Value::from_rows(child.rows));
                }
            }
        }
        Ok(reply)
    }

    fn child(
        &self,
        page: &Page,
        args: Args,
        extra: Vec<Filter>,
        depth: usize,
        side: &mut BTreeMap<String, Vec<Row>>,
    ) -> Result<Reply> {
        self.run_at(&page.model, &page.action, args, extra, depth + 1, side)
            .inspect_err(|e| {
                warn!(model = %page.model, action = %page.action, error = %e, "child action failed");
            })
    }
}
