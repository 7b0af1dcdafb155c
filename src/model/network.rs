use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Keras' clamp for probabilities inside the cross-entropy.
pub(crate) const PROB_EPSILON: f64 = 1e-7;

/// Fully connected layer: `x · weights + bias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Dense {
    /// Glorot-uniform weights, zero bias.
    pub fn glorot<R: rand::Rng>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        Self {
            weights: Array2::from_shape_fn((inputs, outputs), |_| dist.sample(rng)),
            bias: Array1::zeros(outputs),
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn forward(&self, x: ArrayView2<f64>) -> Array2<f64> {
        x.dot(&self.weights) + &self.bias
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub input_dim: usize,
    pub hidden_units: [usize; 2],
    pub dropout: f64,
}

/// Output of [`DelayModel::predict`]: parallel per-row arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    /// Probability of a significant delay, in `[0, 1]`.
    pub probability: Array1<f64>,
    /// Estimated delay in minutes. Unbounded; may be negative.
    pub delay: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayModel {
    pub architecture: Architecture,
    pub hidden: Dense,
    pub trunk: Dense,
    pub classifier: Dense,
    pub regressor: Dense,
}

pub(crate) fn relu(z: &Array2<f64>) -> Array2<f64> {
    z.mapv(|v| v.max(0.0))
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl DelayModel {
    /// A freshly initialised network for `input_dim` features.
    pub fn new(input_dim: usize, config: &TrainingConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let [h1, h2] = config.hidden_units;
        Self {
            architecture: Architecture {
                input_dim,
                hidden_units: config.hidden_units,
                dropout: config.dropout,
            },
            hidden: Dense::glorot(input_dim, h1, &mut rng),
            trunk: Dense::glorot(h1, h2, &mut rng),
            classifier: Dense::glorot(h2, 1, &mut rng),
            regressor: Dense::glorot(h2, 1, &mut rng),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.architecture.input_dim
    }

    pub(crate) fn check_width(&self, x: &ArrayView2<f64>) -> Result<()> {
        if x.ncols() != self.input_dim() {
            return Err(PipelineError::Shape {
                expected: self.input_dim(),
                found: x.ncols(),
            });
        }
        Ok(())
    }

    /// Verifies that every layer's shape agrees with the architecture.
    pub(crate) fn check_consistency(&self) -> std::result::Result<(), String> {
        let [h1, h2] = self.architecture.hidden_units;
        let expected = [
            ("hidden", &self.hidden, self.input_dim(), h1),
            ("trunk", &self.trunk, h1, h2),
            ("classifier", &self.classifier, h2, 1),
            ("regressor", &self.regressor, h2, 1),
        ];
        for (name, layer, inputs, outputs) in expected {
            if layer.inputs() != inputs
                || layer.outputs() != outputs
                || layer.bias.len() != outputs
            {
                return Err(format!(
                    "layer {name} is {}x{} (bias {}), expected {inputs}x{outputs}",
                    layer.inputs(),
                    layer.outputs(),
                    layer.bias.len()
                ));
            }
        }
        Ok(())
    }

    /// Shared representation without dropout.
    fn representation(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let h1 = relu(&self.hidden.forward(x));
        relu(&self.trunk.forward(h1.view()))
    }

    /// Runs both heads over an `N × input_dim` matrix.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Predictions> {
        self.check_width(&x)?;
        let h = self.representation(x);
        let probability = self
            .classifier
            .forward(h.view())
            .index_axis(Axis(1), 0)
            .mapv(sigmoid);
        let delay = self
            .regressor
            .forward(h.view())
            .index_axis(Axis(1), 0)
            .to_owned();
        Ok(Predictions { probability, delay })
    }

    /// Weighted joint loss of the current weights on a labelled batch.
    pub fn loss(
        &self,
        x: ArrayView2<f64>,
        y_cls: ArrayView1<f64>,
        y_reg: ArrayView1<f64>,
        config: &TrainingConfig,
    ) -> Result<f64> {
        let preds = self.predict(x)?;
        Ok(joint_loss(
            preds.probability.view(),
            preds.delay.view(),
            y_cls,
            y_reg,
            config,
        ))
    }
}

pub(crate) fn binary_cross_entropy(prob: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    if prob.is_empty() {
        return 0.0;
    }
    let total: f64 = prob
        .iter()
        .zip(y.iter())
        .map(|(&p, &t)| {
            let p = p.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    total / prob.len() as f64
}

pub(crate) fn mean_absolute(pred: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    if pred.is_empty() {
        return 0.0;
    }
    pred.iter().zip(y.iter()).map(|(p, t)| (p - t).abs()).sum::<f64>() / pred.len() as f64
}

pub(crate) fn joint_loss(
    prob: ArrayView1<f64>,
    delay: ArrayView1<f64>,
    y_cls: ArrayView1<f64>,
    y_reg: ArrayView1<f64>,
    config: &TrainingConfig,
) -> f64 {
    config.classification_weight * binary_cross_entropy(prob, y_cls)
        + config.regression_weight * mean_absolute(delay, y_reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_new_model_shapes() {
        let model = DelayModel::new(9, &TrainingConfig::default());
        assert_eq!(model.hidden.weights.dim(), (9, 64));
        assert_eq!(model.trunk.weights.dim(), (64, 32));
        assert_eq!(model.classifier.weights.dim(), (32, 1));
        assert_eq!(model.regressor.weights.dim(), (32, 1));
        assert!(model.check_consistency().is_ok());
    }

    #[test]
    fn test_same_seed_same_weights() {
        let config = TrainingConfig::default();
        assert_eq!(DelayModel::new(9, &config), DelayModel::new(9, &config));
    }

    #[test]
    fn test_predict_shapes_and_probability_range() {
        let model = DelayModel::new(3, &TrainingConfig::default());
        let x = array![[0.0, 1.0, 2.0], [100.0, -50.0, 3.0], [0.5, 0.5, 0.5]];
        let preds = model.predict(x.view()).unwrap();
        assert_eq!(preds.probability.len(), 3);
        assert_eq!(preds.delay.len(), 3);
        assert!(preds.probability.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let model = DelayModel::new(9, &TrainingConfig::default());
        let x = Array2::<f64>::zeros((2, 4));
        let err = model.predict(x.view()).unwrap_err();
        assert!(matches!(err, PipelineError::Shape { expected: 9, found: 4 }));
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(1000.0) <= 1.0);
    }

    #[test]
    fn test_loss_components() {
        let config = TrainingConfig::default();
        let prob = array![0.5, 0.5];
        let delay = array![10.0, 0.0];
        let y_cls = array![1.0, 0.0];
        let y_reg = array![0.0, 0.0];
        let bce = binary_cross_entropy(prob.view(), y_cls.view());
        assert!((bce - std::f64::consts::LN_2).abs() < 1e-12);
        assert_eq!(mean_absolute(delay.view(), y_reg.view()), 5.0);
        let loss = joint_loss(prob.view(), delay.view(), y_cls.view(), y_reg.view(), &config);
        assert!((loss - (0.7 * std::f64::consts::LN_2 + 0.3 * 5.0)).abs() < 1e-12);
    }
}
