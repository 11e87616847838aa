use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Negative slope of the hidden activations.
pub const LEAKY_RELU_SLOPE: f64 = 0.01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Network expects inputs of length {expected}, got {found}")]
    InputDim { expected: usize, found: usize },
    #[error("Layer {index} maps {found} inputs but follows a layer with {expected} outputs")]
    LayerChain {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("Decoder output has {found} values, expected 6 per segment ({expected})")]
    DecoderOutput { expected: usize, found: usize },
    #[error("Latent table has no row for image {index} ({count} images)")]
    UnknownImage { index: usize, count: usize },
    #[error("A network needs at least one layer")]
    Empty,
}

/// Fully connected layer `y = W x + b`, `W` stored `(out, in)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub weight: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Linear {
    /// Weights and biases drawn from `U(-1/√in, 1/√in)`.
    pub fn new(in_dim: usize, out_dim: usize, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (in_dim.max(1) as f64).sqrt();
        Self {
            weight: Array2::from_shape_simple_fn((out_dim, in_dim), || {
                rng.random_range(-bound..bound)
            }),
            bias: Array1::from_shape_simple_fn(out_dim, || rng.random_range(-bound..bound)),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, input: ArrayView1<'_, f64>) -> Array1<f64> {
        self.weight.dot(&input) + &self.bias
    }
}

fn leaky_relu(x: f64) -> f64 {
    if x >= 0.0 { x } else { LEAKY_RELU_SLOPE * x }
}

/// Multilayer perceptron: LeakyReLU after every layer except the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    layers: Vec<Linear>,
}

impl Mlp {
    pub fn new(in_dim: usize, hidden: &[usize], out_dim: usize, rng: &mut impl Rng) -> Self {
        let dims: Vec<usize> = std::iter::once(in_dim)
            .chain(hidden.iter().copied())
            .chain(std::iter::once(out_dim))
            .collect();
        let layers = dims
            .windows(2)
            .map(|w| Linear::new(w[0], w[1], rng))
            .collect();
        Self { layers }
    }

    /// Assembles a network from existing layers, checking that consecutive shapes chain.
    pub fn from_layers(layers: Vec<Linear>) -> Result<Self, NetworkError> {
        if layers.is_empty() {
            return Err(NetworkError::Empty);
        }
        for (index, pair) in layers.windows(2).enumerate() {
            if pair[0].out_dim() != pair[1].in_dim() {
                return Err(NetworkError::LayerChain {
                    index: index + 1,
                    expected: pair[0].out_dim(),
                    found: pair[1].in_dim(),
                });
            }
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Linear] {
        &self.layers
    }

    pub fn in_dim(&self) -> usize {
        self.layers.first().map_or(0, Linear::in_dim)
    }

    pub fn out_dim(&self) -> usize {
        self.layers.last().map_or(0, Linear::out_dim)
    }

    pub fn forward(&self, input: ArrayView1<'_, f64>) -> Result<Array1<f64>, NetworkError> {
        if input.len() != self.in_dim() {
            return Err(NetworkError::InputDim {
                expected: self.in_dim(),
                found: input.len(),
            });
        }
        let last = self.layers.len().saturating_sub(1);
        let mut x = input.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x.view());
            if i < last {
                x.mapv_inplace(leaky_relu);
            }
        }
        Ok(x)
    }

    /// Sum of squared weights. Biases are not penalized.
    pub fn l2_penalty(&self) -> f64 {
        self.layers
            .iter()
            .map(|l| l.weight.iter().map(|w| w * w).sum::<f64>())
            .sum()
    }

    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weight.len() + l.bias.len())
            .sum()
    }
}
