//! Dense tensors and the ordered per-layer model state they compose.
//!
//! `ModelState` mirrors a framework `state_dict`: an insertion-ordered map
//! from layer name to tensor. Layer order is part of the wire contract, so
//! the backing store is a `Vec` rather than a hash map.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::FlError;

/// Row-major dense tensor of `f64` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, FlError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(FlError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(other.shape.clone())
    }

    /// Scalar tensor convenience, used widely in tests.
    pub fn scalar(v: f64) -> Self {
        Self {
            shape: vec![1],
            data: vec![v],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element-wise `self += other * factor`. Shapes must match.
    pub fn add_scaled(&mut self, other: &Tensor, factor: f64) -> Result<(), FlError> {
        if self.shape != other.shape {
            return Err(FlError::ShapeMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b * factor;
        }
        Ok(())
    }
}

/// Ordered layer-name -> tensor mapping. Whole-value replacement only:
/// callers never see a partially updated state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    layers: Vec<(String, Tensor)>,
}

impl ModelState {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends a layer. Duplicate names are rejected so the selection
    /// partition stays well defined.
    pub fn push(&mut self, name: impl Into<String>, tensor: Tensor) -> Result<(), FlError> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(FlError::LayerMismatch {
                layer: name,
                detail: "duplicate layer name".into(),
            });
        }
        self.layers.push((name, tensor));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.layers.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.layers.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Checks that `other` carries exactly the same layers with the same
    /// shapes, in the same order. Client results must pass this before
    /// entering aggregation.
    pub fn check_compatible(&self, other: &ModelState) -> Result<(), FlError> {
        if self.len() != other.len() {
            return Err(FlError::LayerMismatch {
                layer: String::new(),
                detail: format!("layer count {} != {}", other.len(), self.len()),
            });
        }
        for ((name_a, t_a), (name_b, t_b)) in self.layers.iter().zip(other.layers.iter()) {
            if name_a != name_b {
                return Err(FlError::LayerMismatch {
                    layer: name_b.clone(),
                    detail: format!("expected layer {name_a}"),
                });
            }
            if t_a.shape != t_b.shape {
                return Err(FlError::LayerMismatch {
                    layer: name_a.clone(),
                    detail: format!("shape {:?} != {:?}", t_b.shape, t_a.shape),
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, Tensor)> for ModelState {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            layers: iter.into_iter().collect(),
        }
    }
}

/// Fixed, session-invariant partition of layer names into plain-averaged and
/// HE-aggregated ("selected") sets. Established once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerSelection {
    selected: BTreeSet<String>,
}

impl LayerSelection {
    pub fn new<I, S>(selected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected: selected.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a comma-separated layer list, ignoring empty segments.
    pub fn from_csv(csv: &str) -> Self {
        Self::new(
            csv.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        )
    }

    pub fn is_selected(&self, layer: &str) -> bool {
        self.selected.contains(layer)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }
}
