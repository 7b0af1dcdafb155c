//! Mini-batch Adam training with early stopping.

use super::network::{DelayModel, Dense, relu, sigmoid};
use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use ndarray::{Array, Array1, Array2, ArrayView1, ArrayView2, Axis, Dimension, Zip, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

/// Per-epoch losses and where early stopping landed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    /// Zero-based epoch whose weights were restored.
    pub best_epoch: usize,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.train_loss.len()
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.val_loss.get(self.best_epoch).copied()
    }
}

struct LayerGrad {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl LayerGrad {
    fn of(input: &Array2<f64>, delta: &Array2<f64>) -> Self {
        Self {
            weights: input.t().dot(delta),
            bias: delta.sum_axis(Axis(0)),
        }
    }
}

struct Moments {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

impl Moments {
    fn zeros_like(layer: &Dense) -> Self {
        Self {
            m_w: Array2::zeros(layer.weights.raw_dim()),
            v_w: Array2::zeros(layer.weights.raw_dim()),
            m_b: Array1::zeros(layer.bias.raw_dim()),
            v_b: Array1::zeros(layer.bias.raw_dim()),
        }
    }

    fn step(&mut self, layer: &mut Dense, grad: &LayerGrad, lr_t: f64) {
        adam_update(&mut layer.weights, &grad.weights, &mut self.m_w, &mut self.v_w, lr_t);
        adam_update(&mut layer.bias, &grad.bias, &mut self.m_b, &mut self.v_b, lr_t);
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr_t: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = BETA1 * *m + (1.0 - BETA1) * g;
            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + ADAM_EPSILON);
        });
}

struct Optimizer {
    learning_rate: f64,
    t: i32,
    hidden: Moments,
    trunk: Moments,
    classifier: Moments,
    regressor: Moments,
}

impl Optimizer {
    fn new(model: &DelayModel, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            t: 0,
            hidden: Moments::zeros_like(&model.hidden),
            trunk: Moments::zeros_like(&model.trunk),
            classifier: Moments::zeros_like(&model.classifier),
            regressor: Moments::zeros_like(&model.regressor),
        }
    }

    fn apply(&mut self, model: &mut DelayModel, grads: &Gradients) {
        self.t += 1;
        let lr_t = self.learning_rate * (1.0 - BETA2.powi(self.t)).sqrt()
            / (1.0 - BETA1.powi(self.t));
        self.hidden.step(&mut model.hidden, &grads.hidden, lr_t);
        self.trunk.step(&mut model.trunk, &grads.trunk, lr_t);
        self.classifier.step(&mut model.classifier, &grads.classifier, lr_t);
        self.regressor.step(&mut model.regressor, &grads.regressor, lr_t);
    }
}

struct Gradients {
    hidden: LayerGrad,
    trunk: LayerGrad,
    classifier: LayerGrad,
    regressor: LayerGrad,
}

/// Activations kept from a training forward pass for backpropagation.
struct ForwardPass {
    z1: Array2<f64>,
    mask1: Array2<f64>,
    h1: Array2<f64>,
    z2: Array2<f64>,
    mask2: Array2<f64>,
    h2: Array2<f64>,
    prob: Array1<f64>,
    delay: Array1<f64>,
}

/// Inverted-dropout mask: zero with probability `rate`, `1/(1-rate)` otherwise.
fn dropout_mask<R: Rng>(shape: (usize, usize), rate: f64, rng: &mut R) -> Array2<f64> {
    if rate <= 0.0 {
        return Array2::ones(shape);
    }
    let keep = 1.0 / (1.0 - rate);
    Array2::from_shape_fn(shape, |_| if rng.r#gen::<f64>() < rate { 0.0 } else { keep })
}

fn relu_grad(z: &Array2<f64>) -> Array2<f64> {
    z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl DelayModel {
    fn forward_train<R: Rng>(&self, x: &Array2<f64>, rng: &mut R) -> ForwardPass {
        let rate = self.architecture.dropout;

        let z1 = self.hidden.forward(x.view());
        let mask1 = dropout_mask(z1.dim(), rate, rng);
        let h1 = relu(&z1) * &mask1;

        let z2 = self.trunk.forward(h1.view());
        let mask2 = dropout_mask(z2.dim(), rate, rng);
        let h2 = relu(&z2) * &mask2;

        let prob = self
            .classifier
            .forward(h2.view())
            .index_axis(Axis(1), 0)
            .mapv(sigmoid);
        let delay = self
            .regressor
            .forward(h2.view())
            .index_axis(Axis(1), 0)
            .to_owned();

        ForwardPass {
            z1,
            mask1,
            h1,
            z2,
            mask2,
            h2,
            prob,
            delay,
        }
    }

    fn backward(
        &self,
        x: &Array2<f64>,
        pass: &ForwardPass,
        y_cls: ArrayView1<f64>,
        y_reg: ArrayView1<f64>,
        config: &TrainingConfig,
    ) -> Gradients {
        let n = x.nrows() as f64;

        // sigmoid + cross-entropy collapses to (p - y)
        let d_cls = ((&pass.prob - &y_cls) * (config.classification_weight / n))
            .insert_axis(Axis(1));
        let d_reg = ((&pass.delay - &y_reg).mapv(sign) * (config.regression_weight / n))
            .insert_axis(Axis(1));

        let classifier = LayerGrad::of(&pass.h2, &d_cls);
        let regressor = LayerGrad::of(&pass.h2, &d_reg);

        let d_h2 = d_cls.dot(&self.classifier.weights.t()) + d_reg.dot(&self.regressor.weights.t());
        let d_z2 = d_h2 * &pass.mask2 * relu_grad(&pass.z2);
        let trunk = LayerGrad::of(&pass.h1, &d_z2);

        let d_h1 = d_z2.dot(&self.trunk.weights.t());
        let d_z1 = d_h1 * &pass.mask1 * relu_grad(&pass.z1);
        let hidden = LayerGrad::of(x, &d_z1);

        Gradients {
            hidden,
            trunk,
            classifier,
            regressor,
        }
    }

    /// Fits both heads jointly.
    ///
    /// The tail `validation_split` of the given rows is held out for early
    /// stopping; the best-scoring weights are restored before returning.
    /// `stop` is polled between epochs; once set, training returns
    /// [`PipelineError::Interrupted`] and the caller must not persist the
    /// model.
    #[tracing::instrument(skip_all, fields(rows = x.nrows(), epochs = config.epochs))]
    pub fn train(
        &mut self,
        x: ArrayView2<f64>,
        y_cls: ArrayView1<f64>,
        y_reg: ArrayView1<f64>,
        config: &TrainingConfig,
        stop: &AtomicBool,
    ) -> Result<TrainingHistory> {
        self.check_width(&x)?;
        let n = x.nrows();
        let split_at = ((n as f64) * (1.0 - config.validation_split)) as usize;
        if split_at == 0 {
            return Err(PipelineError::EmptyDataset {
                stage: "training split",
            });
        }

        let x_fit = x.slice(s![..split_at, ..]);
        let y_cls_fit = y_cls.slice(s![..split_at]);
        let y_reg_fit = y_reg.slice(s![..split_at]);
        let x_val = x.slice(s![split_at.., ..]);
        let y_cls_val = y_cls.slice(s![split_at..]);
        let y_reg_val = y_reg.slice(s![split_at..]);
        let has_val = split_at < n;

        info!(
            train_rows = split_at,
            val_rows = n - split_at,
            batch_size = config.batch_size,
            "Starting training"
        );

        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        let mut optimizer = Optimizer::new(self, config.learning_rate);
        let mut order: Vec<usize> = (0..split_at).collect();
        let batch_size = config.batch_size.max(1);

        let mut history = TrainingHistory::default();
        let mut best: Option<(f64, DelayModel)> = None;
        let mut wait = 0usize;

        for epoch in 0..config.epochs {
            if stop.load(Ordering::SeqCst) {
                info!(epoch, "Stop requested, abandoning training");
                return Err(PipelineError::Interrupted { epoch });
            }

            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(batch_size) {
                let xb = x_fit.select(Axis(0), batch);
                let yb_cls = y_cls_fit.select(Axis(0), batch);
                let yb_reg = y_reg_fit.select(Axis(0), batch);

                let pass = self.forward_train(&xb, &mut rng);
                let batch_loss = super::network::joint_loss(
                    pass.prob.view(),
                    pass.delay.view(),
                    yb_cls.view(),
                    yb_reg.view(),
                    config,
                );
                epoch_loss += batch_loss * batch.len() as f64;

                let grads = self.backward(&xb, &pass, yb_cls.view(), yb_reg.view(), config);
                optimizer.apply(self, &grads);
            }

            let train_loss = epoch_loss / split_at as f64;
            let val_loss = if has_val {
                self.loss(x_val, y_cls_val, y_reg_val, config)?
            } else {
                self.loss(x_fit, y_cls_fit, y_reg_fit, config)?
            };
            history.train_loss.push(train_loss);
            history.val_loss.push(val_loss);

            info!(
                epoch = epoch + 1,
                train_loss = %format!("{:.4}", train_loss),
                val_loss = %format!("{:.4}", val_loss),
                "Epoch complete"
            );

            let improved = best.as_ref().is_none_or(|(b, _)| val_loss < *b);
            if improved {
                best = Some((val_loss, self.clone()));
                history.best_epoch = epoch;
                wait = 0;
            } else {
                wait += 1;
                debug!(epoch = epoch + 1, wait, "No validation improvement");
                if wait >= config.patience {
                    info!(
                        epoch = epoch + 1,
                        best_epoch = history.best_epoch + 1,
                        "Early stopping"
                    );
                    history.stopped_early = true;
                    break;
                }
            }
        }

        if let Some((_, weights)) = best {
            *self = weights;
        }

        Ok(history)
    }
}
