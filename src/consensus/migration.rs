//! Tech-debt migration (§4.11): a registry of deprecated state fields
//! and their replacements, used to carry old serialized states forward
//! across schema changes without a hard fork.

use crate::types::Epoch;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("removal_epoch {removal} precedes deprecated_since_epoch {deprecated}")]
    InvalidEpochRange { deprecated: Epoch, removal: Epoch },
    #[error("field {0:?} is already registered as deprecated")]
    AlreadyRegistered(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprecatedField {
    pub name: String,
    pub deprecated_since_epoch: Epoch,
    pub replacements: Vec<String>,
    /// `0` means "no scheduled removal".
    pub removal_epoch: Epoch,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationOutcome {
    pub migrated_fields: u64,
    pub removed_fields: u64,
    pub warnings: Vec<String>,
}

#[derive(Default)]
pub struct MigrationRegistry {
    fields: HashMap<String, DeprecatedField>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        MigrationRegistry { fields: HashMap::new() }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        deprecated_since_epoch: Epoch,
        replacements: Vec<String>,
        removal_epoch: Epoch,
    ) -> Result<(), MigrationError> {
        let name = name.into();
        if removal_epoch != 0 && removal_epoch < deprecated_since_epoch {
            return Err(MigrationError::InvalidEpochRange { deprecated: deprecated_since_epoch, removal: removal_epoch });
        }
        if self.fields.contains_key(&name) {
            return Err(MigrationError::AlreadyRegistered(name));
        }
        self.fields.insert(
            name.clone(),
            DeprecatedField { name, deprecated_since_epoch, replacements, removal_epoch },
        );
        Ok(())
    }

    pub fn is_deprecated(&self, name: &str, epoch: Epoch) -> bool {
        self.fields.get(name).map(|f| epoch >= f.deprecated_since_epoch).unwrap_or(false)
    }

    pub fn is_removed(&self, name: &str, epoch: Epoch) -> bool {
        self.fields
            .get(name)
            .map(|f| f.removal_epoch != 0 && epoch >= f.removal_epoch)
            .unwrap_or(false)
    }

    /// Copies `name`'s value into every replacement not already
    /// present, optionally dropping fields past their removal epoch.
    /// Operates on a copy — the input map is left untouched.
    pub fn migrate_state(
        &self,
        state_map: &HashMap<String, Value>,
        epoch: Epoch,
        auto_migrate: bool,
    ) -> (HashMap<String, Value>, MigrationOutcome) {
        let mut out = state_map.clone();
        let mut outcome = MigrationOutcome::default();

        for field in self.fields.values() {
            if epoch < field.deprecated_since_epoch {
                continue;
            }
            let Some(value) = state_map.get(&field.name) else {
                continue;
            };
            for replacement in &field.replacements {
                if out.contains_key(replacement) {
                    outcome.warnings.push(format!(
                        "replacement field {replacement:?} for deprecated {:?} already present; not overwritten",
                        field.name
                    ));
                    continue;
                }
                out.insert(replacement.clone(), value.clone());
                outcome.migrated_fields += 1;
            }
        }

        if auto_migrate {
            for field in self.fields.values() {
                if field.removal_epoch != 0 && epoch >= field.removal_epoch && out.remove(&field.name).is_some() {
                    outcome.removed_fields += 1;
                }
            }
        }

        for warning in &outcome.warnings {
            warn!("{warning}");
        }

        (out, outcome)
    }
}
