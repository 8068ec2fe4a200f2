//! Behavior profiles: the persisted form of what an agent has learned

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::AgentClass;
use crate::metrics::LearningMetrics;
use crate::{CombatError, Result};

/// Which approximator produced a profile's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproximatorKind {
    /// Dense feed-forward network
    #[default]
    Dense,
    /// Null-effect fallback, no parameters
    Null,
    /// Rule-based fallback agent, no parameters
    RuleBased,
}

/// Shape of a dense feed-forward network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkArchitecture {
    /// Approximator kind
    #[serde(default)]
    pub kind: ApproximatorKind,
    /// Input width (state size)
    pub input_size: usize,
    /// Hidden layer widths
    pub hidden_layers: Vec<usize>,
    /// Output width (action count)
    pub output_size: usize,
}

impl NetworkArchitecture {
    /// Dense architecture
    #[must_use]
    pub fn dense(input_size: usize, hidden_layers: Vec<usize>, output_size: usize) -> Self {
        Self {
            kind: ApproximatorKind::Dense,
            input_size,
            hidden_layers,
            output_size,
        }
    }

    /// Layer widths from input to output
    #[must_use]
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden_layers.len() + 2);
        sizes.push(self.input_size);
        sizes.extend_from_slice(&self.hidden_layers);
        sizes.push(self.output_size);
        sizes
    }

    /// Number of weight parameters for a dense network of this shape
    #[must_use]
    pub fn weight_count(&self) -> usize {
        if self.kind != ApproximatorKind::Dense {
            return 0;
        }
        self.layer_sizes().windows(2).map(|w| w[0] * w[1]).sum()
    }

    /// Number of bias parameters for a dense network of this shape
    #[must_use]
    pub fn bias_count(&self) -> usize {
        if self.kind != ApproximatorKind::Dense {
            return 0;
        }
        self.layer_sizes().iter().skip(1).sum()
    }

    /// Reject shapes that cannot be built
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.output_size == 0 {
            return Err(CombatError::Validation(format!(
                "network needs non-zero input and output, got {}x{}",
                self.input_size, self.output_size
            )));
        }
        if self.hidden_layers.iter().any(|&h| h == 0) {
            return Err(CombatError::Validation("hidden layer of width 0".to_string()));
        }
        Ok(())
    }

    /// Whether two architectures describe interchangeable parameter sets
    #[must_use]
    pub fn is_compatible_with(&self, other: &NetworkArchitecture) -> bool {
        self.input_size == other.input_size
            && self.hidden_layers == other.hidden_layers
            && self.output_size == other.output_size
    }
}

/// Identity, architecture, parameters and metrics of one learned behavior.
///
/// Profiles are replaced as a whole on every save; there is no partial update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    /// Unique profile id, stable across saves
    pub profile_id: Uuid,
    /// Owning entity or slot name
    pub owner_id: String,
    /// Agent class the profile was trained for
    pub agent_class: AgentClass,
    /// First save
    pub created_at: DateTime<Utc>,
    /// Most recent save
    pub updated_at: DateTime<Utc>,
    /// Incremented on every save
    pub revision: u64,
    /// Network shape
    pub architecture: NetworkArchitecture,
    /// Flattened weights, layer by layer, row-major
    pub weights: Vec<f32>,
    /// Flattened biases, layer by layer
    pub biases: Vec<f32>,
    /// Learning metrics at save time
    pub metrics: LearningMetrics,
}

impl BehaviorProfile {
    /// Create a profile at revision 0
    #[must_use]
    pub fn new(
        agent_class: AgentClass,
        owner_id: impl Into<String>,
        architecture: NetworkArchitecture,
        weights: Vec<f32>,
        biases: Vec<f32>,
        metrics: LearningMetrics,
    ) -> Self {
        let now = Utc::now();
        Self {
            profile_id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            agent_class,
            created_at: now,
            updated_at: now,
            revision: 0,
            architecture,
            weights,
            biases,
            metrics,
        }
    }

    /// Carry identity and creation time over from the previously saved
    /// revision of the same profile
    pub fn succeed(&mut self, previous: &BehaviorProfile) {
        self.profile_id = previous.profile_id;
        self.created_at = previous.created_at;
        self.revision = previous.revision + 1;
        self.updated_at = Utc::now();
    }

    /// Structural validation: parameter counts match the architecture,
    /// every value is finite, and, when given, class and architecture match
    /// what the caller expects.
    pub fn validate(
        &self,
        expected_class: Option<AgentClass>,
        expected_architecture: Option<&NetworkArchitecture>,
    ) -> Result<()> {
        if let Some(class) = expected_class {
            if class != self.agent_class {
                return Err(CombatError::Validation(format!(
                    "profile is for {} agents, expected {}",
                    self.agent_class, class
                )));
            }
        }
        if let Some(arch) = expected_architecture {
            if arch.kind == ApproximatorKind::Dense && !arch.is_compatible_with(&self.architecture) {
                return Err(CombatError::Validation(format!(
                    "architecture {:?} does not match expected {:?}",
                    self.architecture.layer_sizes(),
                    arch.layer_sizes()
                )));
            }
        }
        if self.architecture.kind == ApproximatorKind::Dense {
            self.architecture.validate()?;
        }
        let expected_weights = self.architecture.weight_count();
        if self.weights.len() != expected_weights {
            return Err(CombatError::DimensionMismatch {
                expected: expected_weights,
                actual: self.weights.len(),
            });
        }
        let expected_biases = self.architecture.bias_count();
        if self.biases.len() != expected_biases {
            return Err(CombatError::DimensionMismatch {
                expected: expected_biases,
                actual: self.biases.len(),
            });
        }
        if self.weights.iter().chain(&self.biases).any(|v| !v.is_finite()) {
            return Err(CombatError::Validation("non-finite parameter".to_string()));
        }
        if !self.metrics.exploration_rate.is_finite() {
            return Err(CombatError::Validation("non-finite exploration rate".to_string()));
        }
        Ok(())
    }
}
