//! Binary intrusion classifier trained locally on each client.
//!
//! A small feed-forward network (ReLU hidden layer, sigmoid output, BCE
//! loss, plain SGD) with named layers in fixed order, so its state maps
//! cleanly onto the per-layer aggregation protocol. Layer order:
//! `feature.weight`, `feature.bias`, `classifier.weight`, `classifier.bias`.

use fedids_core::{FlError, ModelState, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const LAYER_NAMES: [&str; 4] = [
    "feature.weight",
    "feature.bias",
    "classifier.weight",
    "classifier.bias",
];

#[derive(Debug, Clone)]
pub struct IdsModel {
    input_dim: usize,
    hidden_dim: usize,
    /// hidden_dim x input_dim, row major.
    w1: Vec<f64>,
    b1: Vec<f64>,
    /// 1 x hidden_dim.
    w2: Vec<f64>,
    b2: f64,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// BCE with the probability clamped away from 0/1 so the log stays finite.
fn bce_loss(p: f64, y: f64) -> f64 {
    let p = p.clamp(1e-9, 1.0 - 1e-9);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

impl IdsModel {
    pub fn new(input_dim: usize, hidden_dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let limit = (1.0 / input_dim as f64).sqrt();
        Self {
            input_dim,
            hidden_dim,
            w1: (0..hidden_dim * input_dim)
                .map(|_| rng.gen_range(-limit..limit))
                .collect(),
            b1: vec![0.0; hidden_dim],
            w2: (0..hidden_dim).map(|_| rng.gen_range(-limit..limit)).collect(),
            b2: 0.0,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Snapshot of all parameters in the fixed layer order.
    pub fn state(&self) -> ModelState {
        let mut st = ModelState::new();
        // Shapes are consistent by construction; push cannot fail here.
        let _ = st.push(
            LAYER_NAMES[0],
            Tensor::new(vec![self.hidden_dim, self.input_dim], self.w1.clone()).unwrap(),
        );
        let _ = st.push(
            LAYER_NAMES[1],
            Tensor::new(vec![self.hidden_dim], self.b1.clone()).unwrap(),
        );
        let _ = st.push(
            LAYER_NAMES[2],
            Tensor::new(vec![1, self.hidden_dim], self.w2.clone()).unwrap(),
        );
        let _ = st.push(LAYER_NAMES[3], Tensor::new(vec![1], vec![self.b2]).unwrap());
        st
    }

    /// Loads received global parameters, validating names and shapes.
    pub fn load_state(&mut self, state: &ModelState) -> Result<(), FlError> {
        self.state().check_compatible(state)?;
        self.w1 = state.get(LAYER_NAMES[0]).unwrap().data.clone();
        self.b1 = state.get(LAYER_NAMES[1]).unwrap().data.clone();
        self.w2 = state.get(LAYER_NAMES[2]).unwrap().data.clone();
        self.b2 = state.get(LAYER_NAMES[3]).unwrap().data[0];
        Ok(())
    }

    /// Rebuilds a model with dimensions taken from a received state.
    pub fn from_state(state: &ModelState) -> Result<Self, FlError> {
        let w1 = state.get(LAYER_NAMES[0]).ok_or_else(|| FlError::LayerMismatch {
            layer: LAYER_NAMES[0].into(),
            detail: "missing layer".into(),
        })?;
        if w1.shape.len() != 2 {
            return Err(FlError::LayerMismatch {
                layer: LAYER_NAMES[0].into(),
                detail: format!("expected 2-d weight, got shape {:?}", w1.shape),
            });
        }
        let mut model = Self::new(w1.shape[1], w1.shape[0], 0);
        model.load_state(state)?;
        Ok(model)
    }

    fn forward(&self, x: &[f64]) -> (Vec<f64>, f64) {
        let mut hidden = vec![0.0; self.hidden_dim];
        for h in 0..self.hidden_dim {
            let row = &self.w1[h * self.input_dim..(h + 1) * self.input_dim];
            let z: f64 = row.iter().zip(x.iter()).map(|(w, v)| w * v).sum::<f64>() + self.b1[h];
            hidden[h] = z.max(0.0);
        }
        let z2: f64 = self
            .w2
            .iter()
            .zip(hidden.iter())
            .map(|(w, h)| w * h)
            .sum::<f64>()
            + self.b2;
        (hidden, sigmoid(z2))
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.forward(x).1
    }

    /// One SGD step over a batch. Returns (summed loss, correct count).
    pub fn train_batch(&mut self, batch: &[(Vec<f64>, f64)], lr: f64) -> (f64, usize) {
        if batch.is_empty() {
            return (0.0, 0);
        }
        let n = batch.len() as f64;
        let mut grad_w1 = vec![0.0; self.w1.len()];
        let mut grad_b1 = vec![0.0; self.b1.len()];
        let mut grad_w2 = vec![0.0; self.w2.len()];
        let mut grad_b2 = 0.0;
        let mut loss_sum = 0.0;
        let mut correct = 0;

        for (x, y) in batch {
            let (hidden, p) = self.forward(x);
            loss_sum += bce_loss(p, *y);
            if (p > 0.5) == (*y > 0.5) {
                correct += 1;
            }
            let dz2 = p - y;
            for h in 0..self.hidden_dim {
                grad_w2[h] += dz2 * hidden[h];
                // ReLU gate: gradient flows only through active units.
                if hidden[h] > 0.0 {
                    let dh = dz2 * self.w2[h];
                    for (j, xv) in x.iter().enumerate() {
                        grad_w1[h * self.input_dim + j] += dh * xv;
                    }
                    grad_b1[h] += dh;
                }
            }
            grad_b2 += dz2;
        }

        for (w, g) in self.w1.iter_mut().zip(grad_w1.iter()) {
            *w -= lr * g / n;
        }
        for (b, g) in self.b1.iter_mut().zip(grad_b1.iter()) {
            *b -= lr * g / n;
        }
        for (w, g) in self.w2.iter_mut().zip(grad_w2.iter()) {
            *w -= lr * g / n;
        }
        self.b2 -= lr * grad_b2 / n;

        (loss_sum, correct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrip() {
        let model = IdsModel::new(6, 4, 7);
        let restored = IdsModel::from_state(&model.state()).unwrap();
        assert_eq!(restored.state(), model.state());
    }

    #[test]
    fn state_uses_fixed_layer_order() {
        let model = IdsModel::new(3, 2, 0);
        let names: Vec<_> = model.state().layer_names().map(str::to_owned).collect();
        assert_eq!(names, LAYER_NAMES.to_vec());
    }

    #[test]
    fn training_reduces_loss_on_separable_data() {
        let mut model = IdsModel::new(2, 4, 42);
        let batch: Vec<(Vec<f64>, f64)> = (0..32)
            .map(|i| {
                let positive = i % 2 == 0;
                let base = if positive { 2.0 } else { -2.0 };
                (vec![base, base * 0.5], if positive { 1.0 } else { 0.0 })
            })
            .collect();
        let (first_loss, _) = model.train_batch(&batch, 0.5);
        let mut last_loss = first_loss;
        for _ in 0..200 {
            let (loss, _) = model.train_batch(&batch, 0.5);
            last_loss = loss;
        }
        assert!(last_loss < first_loss * 0.5, "{last_loss} vs {first_loss}");
    }

    #[test]
    fn load_state_rejects_wrong_shapes() {
        let mut model = IdsModel::new(4, 3, 0);
        let other = IdsModel::new(5, 3, 0);
        assert!(model.load_state(&other.state()).is_err());
    }
}
