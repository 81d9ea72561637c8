//! Error types for simulation operations.

use thiserror::Error;

/// Errors that can occur while building or stepping a world.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Invalid body ID referenced.
    #[error("invalid body ID: {0}")]
    InvalidBodyId(u64),

    /// Invalid shape ID referenced.
    #[error("invalid shape ID: {0}")]
    InvalidShapeId(u64),

    /// Invalid constraint ID referenced.
    #[error("invalid constraint ID: {0}")]
    InvalidConstraintId(u64),

    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Simulation diverged (`NaN` or `Inf` detected).
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Invalid shape geometry (degenerate or non-convex polygon, negative radius).
    #[error("invalid shape: {reason}")]
    InvalidShape {
        /// Description of what's wrong.
        reason: String,
    },

    /// Invalid mass properties.
    #[error("invalid mass properties: {reason}")]
    InvalidMassProperties {
        /// Description of what's wrong.
        reason: String,
    },

    /// A structural mutation was attempted while the world was locked.
    #[error("world is locked: cannot {operation} during a step or query, schedule a post-step callback instead")]
    WorldLocked {
        /// The operation that was rejected.
        operation: String,
    },

    /// An entity was added twice.
    #[error("{entity} {id} has already been added to the world")]
    AlreadyAdded {
        /// Kind of entity ("body", "shape", "constraint").
        entity: &'static str,
        /// Raw ID of the entity.
        id: u64,
    },

    /// The operation requires a dynamic body.
    #[error("body {0} is not dynamic")]
    NotDynamic(u64),

    /// A body cannot be removed while shapes or constraints still reference it.
    #[error("body {id} still has {shapes} shape(s) and {constraints} constraint(s) attached")]
    BodyInUse {
        /// Raw ID of the body.
        id: u64,
        /// Number of attached shapes.
        shapes: usize,
        /// Number of attached constraints.
        constraints: usize,
    },
}

impl SimError {
    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid shape error.
    #[must_use]
    pub fn invalid_shape(reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            reason: reason.into(),
        }
    }

    /// Create an invalid mass properties error.
    #[must_use]
    pub fn invalid_mass(reason: impl Into<String>) -> Self {
        Self::InvalidMassProperties {
            reason: reason.into(),
        }
    }

    /// Create a locked-world error for the named operation.
    #[must_use]
    pub fn locked(operation: impl Into<String>) -> Self {
        Self::WorldLocked {
            operation: operation.into(),
        }
    }

    /// Check if this is a divergence error.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Check if this error was caused by mutating a locked world.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::WorldLocked { .. })
    }
}
