//! Q-value function approximators
//!
//! A small dense feed-forward network on `ndarray`, plus a null-effect
//! variant with the same contract that keeps an agent alive when the real
//! network cannot be built.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::warn;

use combat_rl_core::{ApproximatorKind, CombatError, NetworkArchitecture, Result};

/// Function approximator trait for Q-learning agents
pub trait QNetwork: Send + Sync {
    /// Network shape
    fn architecture(&self) -> &NetworkArchitecture;

    /// Forward pass: one Q-value per action
    fn forward(&self, input: &[f32]) -> Result<Vec<f32>>;

    /// One single-sample gradient step on the mean squared error between the
    /// current output and `target`. Returns the loss before the step.
    fn backward(&mut self, input: &[f32], target: &[f32], learning_rate: f32) -> Result<f32>;

    /// Flattened weights, layer by layer, row-major
    fn weights(&self) -> Vec<f32>;

    /// Replace all weights
    fn set_weights(&mut self, weights: &[f32]) -> Result<()>;

    /// Flattened biases, layer by layer
    fn biases(&self) -> Vec<f32>;

    /// Replace all biases
    fn set_biases(&mut self, biases: &[f32]) -> Result<()>;

    /// Copy every parameter from another network of the same shape
    fn copy_from(&mut self, other: &dyn QNetwork) -> Result<()> {
        self.set_weights(&other.weights())?;
        self.set_biases(&other.biases())
    }

    /// Perturb every parameter with zero-mean Gaussian noise
    fn add_noise(&mut self, scale: f32);

    /// Re-initialise all parameters
    fn reset(&mut self);

    /// Total number of parameters
    fn parameter_count(&self) -> usize;

    /// Clone the network
    fn clone_network(&self) -> Box<dyn QNetwork>;

    /// Whether this is the null-effect fallback
    fn is_null(&self) -> bool {
        false
    }
}

/// Dense network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hidden layer sizes
    pub hidden_layers: Vec<usize>,
    /// Per-component clip on the output error during backpropagation
    pub gradient_clip: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![64, 32],
            gradient_clip: 1.0,
        }
    }
}

/// Dense feed-forward network: ReLU hidden layers, linear output layer
pub struct DenseNetwork {
    architecture: NetworkArchitecture,
    /// Weights for each layer, shape (fan_in, fan_out)
    weights: Vec<Array2<f32>>,
    /// Biases for each layer
    biases: Vec<Array1<f32>>,
    gradient_clip: f32,
    rng: StdRng,
}

impl DenseNetwork {
    /// Create and initialise a network.
    ///
    /// Fails when the architecture has a zero-width layer.
    pub fn new(architecture: NetworkArchitecture, gradient_clip: f32, seed: Option<u64>) -> Result<Self> {
        if architecture.kind != ApproximatorKind::Dense {
            return Err(CombatError::Network(format!(
                "cannot build a dense network from a {:?} architecture",
                architecture.kind
            )));
        }
        architecture.validate()?;
        if !gradient_clip.is_finite() || gradient_clip <= 0.0 {
            return Err(CombatError::Network(format!("invalid gradient clip {gradient_clip}")));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut network = Self {
            architecture,
            weights: Vec::new(),
            biases: Vec::new(),
            gradient_clip,
            rng,
        };
        network.initialize();
        Ok(network)
    }

    fn initialize(&mut self) {
        let sizes = self.architecture.layer_sizes();
        self.weights.clear();
        self.biases.clear();
        for pair in sizes.windows(2) {
            self.weights.push(Self::xavier_init(pair[0], pair[1], &mut self.rng));
            self.biases.push(Array1::zeros(pair[1]));
        }
    }

    /// Xavier-scaled Gaussian initialisation, std = sqrt(2 / (fan_in + fan_out))
    #[allow(clippy::cast_precision_loss)]
    fn xavier_init(in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Array2<f32> {
        let scale = (2.0 / (in_dim + out_dim) as f32).sqrt();
        match Normal::new(0.0, scale) {
            Ok(dist) => Array2::from_shape_fn((in_dim, out_dim), |_| dist.sample(rng)),
            Err(_) => Array2::zeros((in_dim, out_dim)),
        }
    }

    fn check_input(&self, input: &[f32]) -> Result<()> {
        if input.len() != self.architecture.input_size {
            return Err(CombatError::DimensionMismatch {
                expected: self.architecture.input_size,
                actual: input.len(),
            });
        }
        Ok(())
    }

    /// Forward pass keeping every layer's pre-activation and activation
    fn forward_trace(&self, input: &[f32]) -> (Vec<Array1<f32>>, Vec<Array1<f32>>) {
        let last = self.weights.len().saturating_sub(1);
        let mut activations = Vec::with_capacity(self.weights.len() + 1);
        let mut pre_activations = Vec::with_capacity(self.weights.len());
        activations.push(Array1::from_vec(input.to_vec()));

        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i == last { z.clone() } else { z.mapv(|v| v.max(0.0)) };
            pre_activations.push(z);
            activations.push(a);
        }
        (pre_activations, activations)
    }

    fn flatten<'a, I>(arrays: I) -> Vec<f32>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        arrays.into_iter().flat_map(|s| s.iter().copied()).collect()
    }
}

impl QNetwork for DenseNetwork {
    fn architecture(&self) -> &NetworkArchitecture {
        &self.architecture
    }

    fn forward(&self, input: &[f32]) -> Result<Vec<f32>> {
        self.check_input(input)?;
        let (_, activations) = self.forward_trace(input);
        Ok(activations.last().map(|a| a.to_vec()).unwrap_or_default())
    }

    #[allow(clippy::cast_precision_loss)]
    fn backward(&mut self, input: &[f32], target: &[f32], learning_rate: f32) -> Result<f32> {
        self.check_input(input)?;
        if target.len() != self.architecture.output_size {
            return Err(CombatError::DimensionMismatch {
                expected: self.architecture.output_size,
                actual: target.len(),
            });
        }

        let (pre_activations, activations) = self.forward_trace(input);
        let Some(output) = activations.last() else {
            return Ok(0.0);
        };
        let target = Array1::from_vec(target.to_vec());
        let error = output - &target;
        let n = error.len() as f32;
        let loss = error.mapv(|e| e * e).sum() / n;
        if !loss.is_finite() {
            return Err(CombatError::Network("non-finite loss".to_string()));
        }

        let clip = self.gradient_clip;
        let mut delta = error.mapv(|e| (2.0 * e / n).clamp(-clip, clip));

        for layer in (0..self.weights.len()).rev() {
            let a_prev = &activations[layer];
            let grad_w = a_prev
                .view()
                .insert_axis(Axis(1))
                .dot(&delta.view().insert_axis(Axis(0)));

            let next_delta = if layer > 0 {
                let back = self.weights[layer].dot(&delta);
                let gate = pre_activations[layer - 1].mapv(|z| if z > 0.0 { 1.0 } else { 0.0 });
                Some(back * gate)
            } else {
                None
            };

            self.weights[layer].scaled_add(-learning_rate, &grad_w);
            self.biases[layer].scaled_add(-learning_rate, &delta);

            match next_delta {
                Some(d) => delta = d,
                None => break,
            }
        }

        Ok(loss)
    }

    fn weights(&self) -> Vec<f32> {
        Self::flatten(self.weights.iter().filter_map(|w| w.as_slice()))
    }

    fn set_weights(&mut self, weights: &[f32]) -> Result<()> {
        let expected = self.architecture.weight_count();
        if weights.len() != expected {
            return Err(CombatError::DimensionMismatch {
                expected,
                actual: weights.len(),
            });
        }
        let sizes = self.architecture.layer_sizes();
        let mut offset = 0;
        let mut layers = Vec::with_capacity(sizes.len() - 1);
        for pair in sizes.windows(2) {
            let len = pair[0] * pair[1];
            let layer = Array2::from_shape_vec((pair[0], pair[1]), weights[offset..offset + len].to_vec())
                .map_err(|e| CombatError::Network(e.to_string()))?;
            layers.push(layer);
            offset += len;
        }
        self.weights = layers;
        Ok(())
    }

    fn biases(&self) -> Vec<f32> {
        Self::flatten(self.biases.iter().filter_map(|b| b.as_slice()))
    }

    fn set_biases(&mut self, biases: &[f32]) -> Result<()> {
        let expected = self.architecture.bias_count();
        if biases.len() != expected {
            return Err(CombatError::DimensionMismatch {
                expected,
                actual: biases.len(),
            });
        }
        let mut offset = 0;
        let mut layers = Vec::with_capacity(self.biases.len());
        for &width in self.architecture.layer_sizes().iter().skip(1) {
            layers.push(Array1::from_vec(biases[offset..offset + width].to_vec()));
            offset += width;
        }
        self.biases = layers;
        Ok(())
    }

    fn add_noise(&mut self, scale: f32) {
        let Ok(dist) = Normal::new(0.0, scale) else {
            return;
        };
        if scale <= 0.0 {
            return;
        }
        let rng = &mut self.rng;
        for w in &mut self.weights {
            w.mapv_inplace(|v| v + dist.sample(rng));
        }
        for b in &mut self.biases {
            b.mapv_inplace(|v| v + dist.sample(rng));
        }
    }

    fn reset(&mut self) {
        self.initialize();
    }

    fn parameter_count(&self) -> usize {
        self.architecture.weight_count() + self.architecture.bias_count()
    }

    fn clone_network(&self) -> Box<dyn QNetwork> {
        Box::new(Self {
            architecture: self.architecture.clone(),
            weights: self.weights.clone(),
            biases: self.biases.clone(),
            gradient_clip: self.gradient_clip,
            rng: self.rng.clone(),
        })
    }
}

/// Null-effect approximator: always outputs zeros, ignores writes, reports
/// zero loss.
#[derive(Debug, Clone)]
pub struct NullNetwork {
    architecture: NetworkArchitecture,
}

impl NullNetwork {
    /// Create a null network that mimics the shape of `architecture`
    #[must_use]
    pub fn new(architecture: &NetworkArchitecture) -> Self {
        Self {
            architecture: NetworkArchitecture {
                kind: ApproximatorKind::Null,
                ..architecture.clone()
            },
        }
    }
}

impl QNetwork for NullNetwork {
    fn architecture(&self) -> &NetworkArchitecture {
        &self.architecture
    }

    fn forward(&self, _input: &[f32]) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.architecture.output_size])
    }

    fn backward(&mut self, _input: &[f32], _target: &[f32], _learning_rate: f32) -> Result<f32> {
        Ok(0.0)
    }

    fn weights(&self) -> Vec<f32> {
        Vec::new()
    }

    fn set_weights(&mut self, _weights: &[f32]) -> Result<()> {
        Ok(())
    }

    fn biases(&self) -> Vec<f32> {
        Vec::new()
    }

    fn set_biases(&mut self, _biases: &[f32]) -> Result<()> {
        Ok(())
    }

    fn add_noise(&mut self, _scale: f32) {}

    fn reset(&mut self) {}

    fn parameter_count(&self) -> usize {
        0
    }

    fn clone_network(&self) -> Box<dyn QNetwork> {
        Box::new(self.clone())
    }

    fn is_null(&self) -> bool {
        true
    }
}

/// Build a dense network, substituting the null-effect network when the
/// real one cannot be built.
pub fn build_network(architecture: &NetworkArchitecture, config: &NetworkConfig, seed: Option<u64>) -> Box<dyn QNetwork> {
    match DenseNetwork::new(architecture.clone(), config.gradient_clip, seed) {
        Ok(network) => Box::new(network),
        Err(e) => {
            warn!(error = %e, layers = ?architecture.layer_sizes(), "network initialisation failed, using null-effect network");
            metrics::counter!("combat_rl.null_network_substitutions", 1);
            Box::new(NullNetwork::new(architecture))
        }
    }
}
