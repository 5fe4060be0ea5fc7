//! The runtime: configuration plus every registry a frame consults.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use story_graph::{EntityId, KindTable};

use crate::dispatch::{builtins, Behavior, BehaviorId, BehaviorRegistry, Layer, Layers};
use crate::provision::{default_provisioners, Planner, Provisioner, Template, TemplateRegistry};
use crate::RuntimeConfig;

/// Owns behaviors, provisioners and templates. Threaded by reference into each frame.
pub struct Runtime {
    config: RuntimeConfig,
    kinds: Arc<KindTable>,
    /// Registration counter shared by every layer, so ties across layers fall to
    /// whichever behavior was registered first.
    sequence: Arc<AtomicU64>,
    global: BehaviorRegistry,
    domains: BTreeMap<String, BehaviorRegistry>,
    locals: BTreeMap<EntityId, BehaviorRegistry>,
    provisioners: Vec<Box<dyn Provisioner>>,
    templates: TemplateRegistry,
}

impl Runtime {
    /// A runtime with the built-in kinds, behaviors and provisioners.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_kinds(config, KindTable::new())
    }

    /// A runtime over a host-supplied kind table.
    pub fn with_kinds(config: RuntimeConfig, kinds: KindTable) -> Self {
        let kinds = Arc::new(kinds);
        let sequence = Arc::new(AtomicU64::new(0));
        let mut global = BehaviorRegistry::new("global", Layer::Global, Arc::clone(&kinds))
            .sharing_sequence(Arc::clone(&sequence));
        builtins::install(&mut global);
        Self {
            config,
            kinds,
            sequence,
            global,
            domains: BTreeMap::new(),
            locals: BTreeMap::new(),
            provisioners: default_provisioners(),
            templates: TemplateRegistry::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn kinds(&self) -> &KindTable {
        &self.kinds
    }

    pub fn global(&self) -> &BehaviorRegistry {
        &self.global
    }

    pub fn locals(&self) -> &BTreeMap<EntityId, BehaviorRegistry> {
        &self.locals
    }

    /// Register a behavior in the global layer.
    pub fn register(&mut self, behavior: Behavior) -> BehaviorId {
        self.global.register(behavior)
    }

    /// Register a behavior in a named domain, creating the domain if needed.
    pub fn register_domain(&mut self, domain: &str, behavior: Behavior) -> BehaviorId {
        let registry = self.registry(domain, Layer::Domain);
        self.domains
            .entry(domain.to_string())
            .or_insert(registry)
            .register(behavior)
    }

    /// Register a behavior that only applies when `entity` is the caller.
    pub fn register_local(&mut self, entity: EntityId, behavior: Behavior) -> BehaviorId {
        let registry = self.registry(entity.to_string(), Layer::Local);
        self.locals
            .entry(entity)
            .or_insert(registry)
            .register(behavior)
    }

    /// An empty registry on this runtime's kinds and sequence counter. Use it for
    /// inline layers so their ties order with the rest.
    pub fn registry(&self, name: impl Into<String>, layer: Layer) -> BehaviorRegistry {
        BehaviorRegistry::new(name, layer, Arc::clone(&self.kinds)).sharing_sequence(Arc::clone(&self.sequence))
    }

    pub fn domain(&self, name: &str) -> Option<&BehaviorRegistry> {
        self.domains.get(name)
    }

    /// Domain registries by name, in the order given. Unknown names are skipped.
    pub fn domains(&self, names: &[String]) -> Vec<&BehaviorRegistry> {
        names
            .iter()
            .filter_map(|name| {
                let registry = self.domains.get(name);
                if registry.is_none() {
                    tracing::warn!(domain = %name, "unknown domain");
                }
                registry
            })
            .collect()
    }

    /// The dispatch union for the given domains.
    pub fn layers(&self, domains: &[String]) -> Layers<'_> {
        self.domains(domains).into_iter().fold(
            Layers::new(&self.kinds, &self.global).with_locals(&self.locals),
            Layers::with,
        )
    }

    /// Append a provisioner after the built-in ones.
    pub fn add_provisioner(&mut self, provisioner: Box<dyn Provisioner>) {
        self.provisioners.push(provisioner);
    }

    pub fn provisioners(&self) -> &[Box<dyn Provisioner>] {
        &self.provisioners
    }

    pub fn register_template(&mut self, template: Template) {
        self.templates.register(template);
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn planner(&self) -> Planner<'_> {
        Planner::new(&self.provisioners, &self.templates).strict(self.config.strict_templates)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
