//! Named groupings of axis variables.
use std::collections::BTreeMap;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    schema::SchemaVersion,
    variable::{VariableId, state::VariableCore},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateSystem {
    pub name: CompactString,
    pub axes: Vec<VariableId>,
    /// Variables attached to this system.
    pub variables: Vec<VariableId>,
}

/// Committed list plus the proposed list of the open transaction.
#[derive(Debug, Clone, Default)]
pub(crate) struct CoordinateSystems {
    committed: Vec<CoordinateSystem>,
    proposed: Option<Vec<CoordinateSystem>>,
}

impl CoordinateSystems {
    pub fn from_committed(committed: Vec<CoordinateSystem>) -> Self {
        Self {
            committed,
            proposed: None,
        }
    }

    pub fn get(&self, version: SchemaVersion) -> &[CoordinateSystem] {
        match (version, &self.proposed) {
            (SchemaVersion::Committed, _) => &self.committed,
            (_, Some(proposed)) => proposed,
            (SchemaVersion::Proposed, None) => &[],
            (SchemaVersion::Recent, None) => &self.committed,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.proposed.is_some()
    }

    fn proposed_mut(&mut self) -> &mut Vec<CoordinateSystem> {
        let committed = &self.committed;
        self.proposed.get_or_insert_with(|| committed.clone())
    }

    pub fn add(&mut self, name: &str, axes: Vec<VariableId>) -> Result<()> {
        if self
            .get(SchemaVersion::Recent)
            .iter()
            .any(|cs| cs.name == name)
        {
            return Err(Error::InvalidArgument(format!(
                "coordinate system `{name}` already exists"
            )));
        }
        self.proposed_mut().push(CoordinateSystem {
            name: name.into(),
            axes,
            variables: Vec::new(),
        });
        Ok(())
    }

    pub fn attach(&mut self, name: &str, variable: VariableId) -> Result<()> {
        if !self
            .get(SchemaVersion::Recent)
            .iter()
            .any(|cs| cs.name == name)
        {
            return Err(Error::NotFound(format!("coordinate system `{name}`")));
        }
        let system = self
            .proposed_mut()
            .iter_mut()
            .find(|cs| cs.name == name)
            .ok_or_else(|| Error::NotFound(format!("coordinate system `{name}`")))?;
        if !system.variables.contains(&variable) {
            system.variables.push(variable);
        }
        Ok(())
    }

    /// Axes must exist and be one-dimensional; attached variables must exist.
    pub fn check(&self, variables: &BTreeMap<VariableId, VariableCore>) -> Result<()> {
        for system in self.get(SchemaVersion::Recent) {
            for axis in &system.axes {
                match variables.get(axis) {
                    Some(core) if core.rank() == 1 => {}
                    Some(core) => {
                        return Err(Error::ConstraintsFailed {
                            variable: *axis,
                            reason: format!(
                                "axis of coordinate system `{}` has rank {}",
                                system.name,
                                core.rank()
                            ),
                        });
                    }
                    None => {
                        return Err(Error::ConstraintsFailed {
                            variable: *axis,
                            reason: format!(
                                "axis of coordinate system `{}` does not exist",
                                system.name
                            ),
                        });
                    }
                }
            }
            if let Some(missing) = system.variables.iter().find(|id| !variables.contains_key(id)) {
                return Err(Error::ConstraintsFailed {
                    variable: *missing,
                    reason: format!(
                        "variable attached to coordinate system `{}` does not exist",
                        system.name
                    ),
                });
            }
        }
        Ok(())
    }

    /// Drop references to variables that no longer exist.
    pub fn forget(&mut self, removed: &[VariableId]) {
        let prune = |systems: &mut Vec<CoordinateSystem>| {
            systems.retain(|cs| !cs.axes.iter().any(|a| removed.contains(a)));
            for cs in systems.iter_mut() {
                cs.variables.retain(|v| !removed.contains(v));
            }
        };
        prune(&mut self.committed);
        if let Some(proposed) = &mut self.proposed {
            prune(proposed);
        }
    }

    pub fn commit(&mut self) {
        if let Some(proposed) = self.proposed.take() {
            self.committed = proposed;
        }
    }

    pub fn rollback(&mut self) {
        self.proposed = None;
    }

    pub fn replace(&mut self, committed: Vec<CoordinateSystem>) {
        self.committed = committed;
        self.proposed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposals_are_transactional() {
        let mut systems = CoordinateSystems::default();
        systems.add("grid", vec![VariableId(1)]).unwrap();
        systems.attach("grid", VariableId(2)).unwrap();
        assert!(systems.get(SchemaVersion::Committed).is_empty());
        assert_eq!(systems.get(SchemaVersion::Recent)[0].variables, vec![VariableId(2)]);
        systems.rollback();
        assert!(systems.get(SchemaVersion::Recent).is_empty());
    }

    #[test]
    fn duplicate_and_unknown_names() {
        let mut systems = CoordinateSystems::default();
        systems.add("grid", vec![]).unwrap();
        assert!(matches!(systems.add("grid", vec![]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            systems.attach("other", VariableId(1)),
            Err(Error::NotFound(_))
        ));
        systems.commit();
        assert_eq!(systems.get(SchemaVersion::Committed).len(), 1);
    }
}
