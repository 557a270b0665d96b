// =====================================================
// DRIVER REGISTRY
// Backend name -> factory, filled explicitly at startup
// =====================================================

use crate::clickhouse::{self, ClickHouseDriver};
use crate::driver::{Driver, Parameters};
use crate::error::{DriverError, Result};
use crate::postgres::{self, PostgresDriver};
use crate::sqlite::{self, SqliteDriver};
use std::collections::BTreeMap;

/// Builds an unopened driver from its flat configuration.
pub type DriverFactory = fn(&Parameters) -> Result<Box<dyn Driver>>;

#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<String, DriverFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every adapter shipped with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            clickhouse::DRIVER_NAME.to_string(),
            ClickHouseDriver::from_parameters,
        );
        registry.factories.insert(
            postgres::DRIVER_NAME.to_string(),
            PostgresDriver::from_parameters,
        );
        registry
            .factories
            .insert(sqlite::DRIVER_NAME.to_string(), SqliteDriver::from_parameters);
        registry
    }

    pub fn register(&mut self, name: &str, factory: DriverFactory) -> Result<()> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(DriverError::config("driver name is required"));
        }
        if self.factories.contains_key(&name) {
            return Err(DriverError::config(format!(
                "driver '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn create(&self, name: &str, parameters: &Parameters) -> Result<Box<dyn Driver>> {
        let name = normalize_name(name);
        let factory = self.factories.get(&name).ok_or_else(|| {
            DriverError::config(format!(
                "unknown driver '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        factory(parameters)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
