// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stage type registry and the plugin interface that fills it.
//!
//! Every stage type is an explicit [`StageType`] table entry: a name, an
//! option schema, a function declaring the ports for a configuration, and a
//! factory. Plugins register their entries once at startup; afterwards the
//! registry is shared immutably (the [`GraphManager`](crate::manager::GraphManager)
//! keeps it behind an `Arc`), so no type can be added while graphs execute.

use crate::config::{ConfigError, ConfigSchema, StageConfig};
use crate::port::PortDesc;
use crate::stage::{RenderStage, Stage};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;

/// Version of the plugin interface implemented by this crate
pub const PLUGIN_API_VERSION: u32 = 1;

type ReflectFn = Box<dyn Fn(&StageConfig) -> Vec<PortDesc> + Send + Sync>;
type CreateFn = Box<dyn Fn(&StageConfig) -> Box<dyn RenderStage> + Send + Sync>;

/// Registry entry describing how to build one kind of stage
pub struct StageType {
    /// Unique type name
    pub name: String,
    /// Description
    pub description: String,
    /// Declared options
    pub schema: ConfigSchema,
    reflect: ReflectFn,
    create: CreateFn,
}

impl StageType {
    /// Create a stage type from its port declaration and factory
    pub fn new(
        name: impl Into<String>,
        reflect: impl Fn(&StageConfig) -> Vec<PortDesc> + Send + Sync + 'static,
        create: impl Fn(&StageConfig) -> Box<dyn RenderStage> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schema: ConfigSchema::new(),
            reflect: Box::new(reflect),
            create: Box::new(create),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the option schema
    pub fn with_schema(mut self, schema: ConfigSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Ports declared for a resolved configuration
    pub fn reflect(&self, config: &StageConfig) -> Vec<PortDesc> {
        (self.reflect)(config)
    }

    /// Validate a configuration and fill in defaults
    pub fn resolve_config(&self, config: &StageConfig) -> Result<StageConfig, ConfigError> {
        self.schema.resolve(&self.name, config)
    }

    fn instantiate(&self, config: StageConfig) -> Result<Stage, ConfigError> {
        let ports = self.reflect(&config);
        if let Some(port) = duplicate_port(&ports) {
            return Err(ConfigError::DuplicatePort {
                stage_type: self.name.clone(),
                port: port.to_string(),
            });
        }
        let runtime = (self.create)(&config);
        Ok(Stage::new(self.name.clone(), config, ports, runtime))
    }
}

impl fmt::Debug for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageType")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// A unit of stage types loaded once at startup
pub trait StagePlugin {
    /// Plugin name, unique among loaded plugins
    fn name(&self) -> &str;

    /// Plugin interface version the plugin was built against
    fn api_version(&self) -> u32 {
        PLUGIN_API_VERSION
    }

    /// Register the plugin's stage types
    fn register(&self, registry: &mut StageRegistry) -> Result<(), RegistryError>;
}

/// Registry of available stage types
#[derive(Debug, Default)]
pub struct StageRegistry {
    types: IndexMap<String, StageType>,
    plugins: Vec<String>,
}

impl StageRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage type.
    ///
    /// The type's default port layout must have unique port names.
    pub fn register(&mut self, stage_type: StageType) -> Result<(), RegistryError> {
        if self.types.contains_key(&stage_type.name) {
            return Err(RegistryError::DuplicateStageType(stage_type.name));
        }

        let defaults = stage_type
            .resolve_config(&StageConfig::new())
            .map_err(|e| RegistryError::InvalidDefaults(e.to_string()))?;
        if let Some(port) = duplicate_port(&stage_type.reflect(&defaults)) {
            return Err(RegistryError::DuplicatePort {
                port: port.to_string(),
                stage_type: stage_type.name,
            });
        }

        tracing::debug!(stage_type = %stage_type.name, "Registered stage type");
        self.types.insert(stage_type.name.clone(), stage_type);
        Ok(())
    }

    /// Load a plugin.
    ///
    /// Either all of the plugin's types are registered or none are.
    pub fn load_plugin(&mut self, plugin: &dyn StagePlugin) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        if plugin.api_version() != PLUGIN_API_VERSION {
            return Err(RegistryError::IncompatiblePlugin {
                plugin: name,
                expected: PLUGIN_API_VERSION,
                found: plugin.api_version(),
            });
        }
        if self.plugins.contains(&name) {
            return Err(RegistryError::DuplicatePlugin(name));
        }

        let before = self.types.len();
        if let Err(e) = plugin.register(self) {
            self.types.truncate(before);
            return Err(e);
        }

        tracing::info!(
            plugin = %name,
            stage_types = self.types.len() - before,
            "Loaded stage plugin"
        );
        self.plugins.push(name);
        Ok(())
    }

    /// Get a stage type by name
    pub fn get(&self, type_name: &str) -> Option<&StageType> {
        self.types.get(type_name)
    }

    /// Whether a stage type is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Names of all registered types, in registration order
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Names of loaded plugins
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// Create a stage instance from a type name and configuration
    pub fn create_stage(&self, type_name: &str, config: &StageConfig) -> Result<Stage, ConfigError> {
        let stage_type = self
            .get(type_name)
            .ok_or_else(|| ConfigError::UnknownStageType(type_name.to_string()))?;
        let config = stage_type.resolve_config(config)?;
        stage_type.instantiate(config)
    }

    /// Create a fresh instance with the same type and configuration as `stage`
    pub fn recreate(&self, stage: &Stage) -> Result<Stage, ConfigError> {
        self.create_stage(stage.type_name(), stage.config())
    }
}

/// First port name declared more than once
fn duplicate_port(ports: &[PortDesc]) -> Option<&str> {
    let mut seen = HashSet::new();
    ports
        .iter()
        .map(|port| port.name.as_str())
        .find(|name| !seen.insert(*name))
}

/// Error while registering stage types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// A type with this name is already registered
    #[error("Stage type already registered: {0}")]
    DuplicateStageType(String),

    /// The plugin was built against another interface version
    #[error("Plugin {plugin} uses interface version {found}, expected {expected}")]
    IncompatiblePlugin {
        /// Plugin name
        plugin: String,
        /// Supported version
        expected: u32,
        /// Plugin's version
        found: u32,
    },

    /// The plugin was already loaded
    #[error("Plugin already loaded: {0}")]
    DuplicatePlugin(String),

    /// The type declares two ports with the same name
    #[error("Stage type {stage_type} declares port '{port}' twice")]
    DuplicatePort {
        /// Stage type name
        stage_type: String,
        /// Duplicated port name
        port: String,
    },

    /// The type's schema defaults do not validate
    #[error("Invalid option defaults: {0}")]
    InvalidDefaults(String),
}
