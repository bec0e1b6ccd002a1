//! How local contributions are treated before assembly.
//!
//! The builder is composed with one of two policies, chosen when the system
//! is set up: plain assembly when no constraint exists, or condensation
//! against the global master-slave relations.

use crate::contribution::LocalContribution;
use crate::error::Result;
use crate::relation::GlobalRelations;
use crate::structure::MatrixStructure;
use crate::transform::condense;

/// Treatment of local contributions.
#[derive(Debug, Clone, Default)]
pub enum ConstraintPolicy {
    /// Contributions are assembled as computed.
    #[default]
    Unconstrained,
    /// Contributions touching slaves are condensed onto their masters.
    Condensation(GlobalRelations),
}

impl ConstraintPolicy {
    /// Whether slaves are condensed.
    pub fn is_constrained(&self) -> bool {
        matches!(self, Self::Condensation(_))
    }

    /// Global relations, if any.
    pub fn relations(&self) -> Option<&GlobalRelations> {
        match self {
            Self::Unconstrained => None,
            Self::Condensation(relations) => Some(relations),
        }
    }

    /// Mutable access to the global relations, if any.
    pub fn relations_mut(&mut self) -> Option<&mut GlobalRelations> {
        match self {
            Self::Unconstrained => None,
            Self::Condensation(relations) => Some(relations),
        }
    }

    /// Apply the policy to one local contribution.
    pub fn apply(&self, local: LocalContribution, structure: &MatrixStructure) -> Result<LocalContribution> {
        match self {
            Self::Unconstrained => Ok(local),
            Self::Condensation(relations) => condense(local, relations, structure),
        }
    }
}
