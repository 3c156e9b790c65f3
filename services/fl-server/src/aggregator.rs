//! Secure aggregation strategies.
//!
//! A round's collected results become one new global state through a
//! pluggable strategy: `PlainFedAvg` sample-weight-averages every layer;
//! `CkksFedAvg` routes layers through the fixed `LayerSelection`, averaging
//! plain layers and aggregating selected layers as encrypted deltas. In the
//! encrypted path no per-client ciphertext is ever decrypted, only the
//! homomorphic sum.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use fedids_core::he::CkksContext;
use fedids_core::{CkksVector, FitResult, FlError, LayerSelection, ModelState, Tensor};

/// Bound applied to every sanitized delta element. Keeps a divergent client
/// inside the numeric domain the encryption scheme handles precisely.
pub const DELTA_CLIP: f64 = 10.0;

/// NaN and infinities become 0, everything else is clipped to
/// [-DELTA_CLIP, DELTA_CLIP]. Idempotent.
pub fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(-DELTA_CLIP, DELTA_CLIP)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    FedavgPlain,
    FedavgHeCkks,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FedavgPlain => "fedavg_plain",
            Self::FedavgHeCkks => "fedavg_he_ckks",
        }
    }
}

/// Turns collected per-client results into one new global state. The
/// pre-round state is read-only input; the coordinator owns the swap.
pub trait AggregationStrategy: Send + Sync {
    fn method(&self) -> AggregationMethod;

    /// Scheme parameters for round reporting, when encryption is in play.
    fn he_poly_modulus(&self) -> Option<usize> {
        None
    }

    fn aggregate(
        &self,
        global_before: &ModelState,
        results: &[FitResult],
    ) -> Result<ModelState, FlError>;
}

/// `sum(v_i * n_i) / max(sum(n_i), 1)` for one layer across clients.
fn weighted_average(
    layer: &str,
    results: &[FitResult],
    total_examples: u64,
) -> Result<Tensor, FlError> {
    let first = results[0].parameters.get(layer).ok_or_else(|| missing(layer))?;
    let mut acc = Tensor::zeros_like(first);
    let denom = total_examples.max(1) as f64;
    for r in results {
        let t = r.parameters.get(layer).ok_or_else(|| missing(layer))?;
        acc.add_scaled(t, r.num_examples as f64 / denom)?;
    }
    Ok(acc)
}

fn missing(layer: &str) -> FlError {
    FlError::LayerMismatch {
        layer: layer.to_string(),
        detail: "missing from client result".into(),
    }
}

/// Classic sample-weighted federated averaging over every layer.
pub struct PlainFedAvg;

impl AggregationStrategy for PlainFedAvg {
    fn method(&self) -> AggregationMethod {
        AggregationMethod::FedavgPlain
    }

    fn aggregate(
        &self,
        global_before: &ModelState,
        results: &[FitResult],
    ) -> Result<ModelState, FlError> {
        let total_examples: u64 = results.iter().map(|r| r.num_examples).sum();
        let mut new_state = ModelState::new();
        for (layer, _) in global_before.iter() {
            new_state.push(layer, weighted_average(layer, results, total_examples)?)?;
        }
        Ok(new_state)
    }
}

/// FedAvg with CKKS-encrypted delta aggregation for the selected layers.
///
/// Selected layers: per-client delta against the pre-round global state,
/// sanitized, flattened, encrypted; ciphertexts are summed homomorphically,
/// the single aggregate is decrypted and the unweighted mean delta is added
/// back onto the pre-round value. (The plain path is sample-weighted, the
/// encrypted path deliberately is not.)
pub struct CkksFedAvg {
    ctx: Arc<CkksContext>,
    selection: LayerSelection,
}

impl CkksFedAvg {
    pub fn new(ctx: Arc<CkksContext>, selection: LayerSelection) -> Self {
        Self { ctx, selection }
    }
}

impl AggregationStrategy for CkksFedAvg {
    fn method(&self) -> AggregationMethod {
        AggregationMethod::FedavgHeCkks
    }

    fn he_poly_modulus(&self) -> Option<usize> {
        Some(self.ctx.params().poly_modulus_degree)
    }

    fn aggregate(
        &self,
        global_before: &ModelState,
        results: &[FitResult],
    ) -> Result<ModelState, FlError> {
        let total_examples: u64 = results.iter().map(|r| r.num_examples).sum();
        let k = results.len() as f64;
        let mut new_state = ModelState::new();

        for (layer, before) in global_before.iter() {
            if !self.selection.is_selected(layer) {
                new_state.push(layer, weighted_average(layer, results, total_examples)?)?;
                continue;
            }

            // One ciphertext (chain) per client; only the aggregate sum is
            // ever decrypted.
            let mut aggregate: Option<CkksVector> = None;
            for r in results {
                let t = r.parameters.get(layer).ok_or_else(|| missing(layer))?;
                if t.shape != before.shape {
                    return Err(FlError::LayerMismatch {
                        layer: layer.to_string(),
                        detail: format!("shape {:?} != {:?}", t.shape, before.shape),
                    });
                }
                let delta: Vec<f64> = t
                    .data
                    .iter()
                    .zip(before.data.iter())
                    .map(|(client_v, global_v)| sanitize(client_v - global_v))
                    .collect();
                let ct = CkksVector::encrypt(&self.ctx, &delta);
                match aggregate.as_mut() {
                    None => aggregate = Some(ct),
                    Some(agg) => agg
                        .add_assign(&ct)
                        .map_err(|e| FlError::LayerMismatch {
                            layer: layer.to_string(),
                            detail: e.to_string(),
                        })?,
                }
            }

            let aggregate = aggregate.ok_or(FlError::AggregationInputEmpty { round: 0 })?;
            let summed = aggregate.decrypt(&self.ctx);
            debug!(layer, elements = summed.len(), clients = results.len(), "decrypted aggregate delta");
            let data: Vec<f64> = before
                .data
                .iter()
                .zip(summed.iter())
                .map(|(global_v, delta_sum)| global_v + delta_sum / k)
                .collect();
            new_state.push(layer, Tensor::new(before.shape.clone(), data)?)?;
        }
        Ok(new_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedids_core::{FitMetrics, HeParams};

    fn result(client: &str, n: u64, layers: &[(&str, Tensor)]) -> FitResult {
        let mut st = ModelState::new();
        for (name, t) in layers {
            st.push(*name, t.clone()).unwrap();
        }
        FitResult {
            parameters: st,
            num_examples: n,
            metrics: FitMetrics {
                client_id: client.into(),
                loss: 0.5,
                accuracy: 0.9,
                training_time_sec: 1.0,
            },
        }
    }

    fn global_one_layer(name: &str, v: f64) -> ModelState {
        let mut st = ModelState::new();
        st.push(name, Tensor::scalar(v)).unwrap();
        st
    }

    fn test_ctx() -> Arc<CkksContext> {
        Arc::new(CkksContext::new(HeParams {
            poly_modulus_degree: 64,
            scale_bits: 40,
        }))
    }

    #[test]
    fn sanitize_zeroes_non_finite_and_clips() {
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(f64::INFINITY), 0.0);
        assert_eq!(sanitize(f64::NEG_INFINITY), 0.0);
        assert_eq!(sanitize(42.0), 10.0);
        assert_eq!(sanitize(-42.0), -10.0);
        assert_eq!(sanitize(3.5), 3.5);
        for v in [f64::NAN, f64::INFINITY, -42.0, 3.5, 0.0] {
            assert_eq!(sanitize(sanitize(v)), sanitize(v));
        }
    }

    #[test]
    fn plain_weighted_average_matches_formula() {
        let global = global_one_layer("fc.weight", 0.0);
        let results = vec![
            result("a", 10, &[("fc.weight", Tensor::scalar(0.1))]),
            result("b", 30, &[("fc.weight", Tensor::scalar(0.2))]),
        ];
        let out = PlainFedAvg.aggregate(&global, &results).unwrap();
        let v = out.get("fc.weight").unwrap().data[0];
        assert!((v - 0.175).abs() < 1e-12);
    }

    #[test]
    fn plain_single_client_passes_through() {
        let global = global_one_layer("fc.weight", 0.0);
        let results = vec![result("a", 77, &[("fc.weight", Tensor::scalar(0.42))])];
        let out = PlainFedAvg.aggregate(&global, &results).unwrap();
        assert!((out.get("fc.weight").unwrap().data[0] - 0.42).abs() < 1e-12);
    }

    #[test]
    fn plain_equal_weights_reduce_to_mean() {
        // Scenario A: 1.0 -> {1.2, 1.4, 1.0} with equal samples -> 1.2.
        let global = global_one_layer("fc.weight", 1.0);
        let results = vec![
            result("a", 100, &[("fc.weight", Tensor::scalar(1.2))]),
            result("b", 100, &[("fc.weight", Tensor::scalar(1.4))]),
            result("c", 100, &[("fc.weight", Tensor::scalar(1.0))]),
        ];
        let out = PlainFedAvg.aggregate(&global, &results).unwrap();
        assert!((out.get("fc.weight").unwrap().data[0] - 1.2).abs() < 1e-12);
    }

    #[test]
    fn he_equal_deltas_match_plain_numerically() {
        // Scenario B: deltas {0.2, 0.4, 0.0} from global 1.0 -> 1.2.
        let global = global_one_layer("fc.weight", 1.0);
        let strategy = CkksFedAvg::new(test_ctx(), LayerSelection::new(["fc.weight"]));
        let results = vec![
            result("a", 100, &[("fc.weight", Tensor::scalar(1.2))]),
            result("b", 100, &[("fc.weight", Tensor::scalar(1.4))]),
            result("c", 100, &[("fc.weight", Tensor::scalar(1.0))]),
        ];
        let out = strategy.aggregate(&global, &results).unwrap();
        let v = out.get("fc.weight").unwrap().data[0];
        assert!((v - 1.2).abs() < 1e-3, "{v}");
    }

    #[test]
    fn he_mean_is_unweighted() {
        // Unequal sample counts must not change the encrypted-path mean.
        let global = global_one_layer("fc.weight", 0.0);
        let strategy = CkksFedAvg::new(test_ctx(), LayerSelection::new(["fc.weight"]));
        let results = vec![
            result("a", 1, &[("fc.weight", Tensor::scalar(0.3))]),
            result("b", 999, &[("fc.weight", Tensor::scalar(0.6))]),
        ];
        let out = strategy.aggregate(&global, &results).unwrap();
        let v = out.get("fc.weight").unwrap().data[0];
        assert!((v - 0.45).abs() < 1e-3, "{v}");
    }

    #[test]
    fn he_nan_delta_contributes_zero() {
        // Scenario C: a NaN element must not poison the decrypted mean.
        let global = global_one_layer("fc.weight", 0.0);
        let strategy = CkksFedAvg::new(test_ctx(), LayerSelection::new(["fc.weight"]));
        let results = vec![
            result("a", 100, &[("fc.weight", Tensor::scalar(f64::NAN))]),
            result("b", 100, &[("fc.weight", Tensor::scalar(0.3))]),
            result("c", 100, &[("fc.weight", Tensor::scalar(0.6))]),
        ];
        let out = strategy.aggregate(&global, &results).unwrap();
        let v = out.get("fc.weight").unwrap().data[0];
        assert!(v.is_finite());
        assert!((v - 0.3).abs() < 1e-3, "{v}");
    }

    #[test]
    fn he_divergent_delta_is_clipped() {
        let global = global_one_layer("fc.weight", 0.0);
        let strategy = CkksFedAvg::new(test_ctx(), LayerSelection::new(["fc.weight"]));
        let results = vec![
            result("a", 100, &[("fc.weight", Tensor::scalar(1e9))]),
            result("b", 100, &[("fc.weight", Tensor::scalar(2.0))]),
        ];
        let out = strategy.aggregate(&global, &results).unwrap();
        let v = out.get("fc.weight").unwrap().data[0];
        // (clip(1e9) + 2.0) / 2 = 6.0
        assert!((v - 6.0).abs() < 1e-3, "{v}");
    }

    #[test]
    fn he_plain_layers_stay_weighted() {
        let mut global = ModelState::new();
        global.push("feat.weight", Tensor::scalar(0.0)).unwrap();
        global.push("fc.weight", Tensor::scalar(0.0)).unwrap();
        let strategy = CkksFedAvg::new(test_ctx(), LayerSelection::new(["fc.weight"]));
        let results = vec![
            result(
                "a",
                10,
                &[
                    ("feat.weight", Tensor::scalar(0.1)),
                    ("fc.weight", Tensor::scalar(1.0)),
                ],
            ),
            result(
                "b",
                30,
                &[
                    ("feat.weight", Tensor::scalar(0.2)),
                    ("fc.weight", Tensor::scalar(3.0)),
                ],
            ),
        ];
        let out = strategy.aggregate(&global, &results).unwrap();
        // Plain layer weighted: (0.1*10 + 0.2*30)/40 = 0.175.
        assert!((out.get("feat.weight").unwrap().data[0] - 0.175).abs() < 1e-12);
        // Selected layer unweighted: (1.0 + 3.0)/2 = 2.0.
        assert!((out.get("fc.weight").unwrap().data[0] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn method_strings_match_wire_format() {
        assert_eq!(AggregationMethod::FedavgPlain.as_str(), "fedavg_plain");
        assert_eq!(AggregationMethod::FedavgHeCkks.as_str(), "fedavg_he_ckks");
        let v = serde_json::to_value(AggregationMethod::FedavgHeCkks).unwrap();
        assert_eq!(v, serde_json::json!("fedavg_he_ckks"));
    }
}
