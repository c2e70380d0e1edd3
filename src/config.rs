use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

pub type DefaultBackend = burn_ndarray::NdArray<f32>;
pub type DefaultDevice = burn_ndarray::NdArrayDevice;
/// Backend with gradient tracking, for training loops and gradient checks.
pub type TrainBackend = burn_autodiff::Autodiff<DefaultBackend>;

/// A per-layer size that is either broadcast to every layer or given
/// explicitly for each one.
///
/// Deserializes from either `3` or `[3, 3]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerLayer {
    Scalar(usize),
    List(Vec<usize>),
}

impl PerLayer {
    /// Normalizes into exactly `n_layers` values.
    ///
    /// A list whose length differs from `n_layers` is rejected, never
    /// truncated or padded.
    pub fn resolve(
        &self,
        field: &'static str,
        count_field: &'static str,
        n_layers: usize,
    ) -> Result<Vec<usize>> {
        match self {
            PerLayer::Scalar(value) => Ok(vec![*value; n_layers]),
            PerLayer::List(values) if values.len() == n_layers => Ok(values.clone()),
            PerLayer::List(values) => Err(ModelError::InvalidLayerConfig {
                field,
                count_field,
                expected: n_layers,
                actual: values.len(),
            }),
        }
    }
}

impl From<usize> for PerLayer {
    fn from(value: usize) -> Self {
        PerLayer::Scalar(value)
    }
}

impl From<Vec<usize>> for PerLayer {
    fn from(values: Vec<usize>) -> Self {
        PerLayer::List(values)
    }
}

impl<const N: usize> From<[usize; N]> for PerLayer {
    fn from(values: [usize; N]) -> Self {
        PerLayer::List(values.to_vec())
    }
}

pub(crate) fn require_layers(field: &'static str, n_layers: usize) -> Result<()> {
    if n_layers == 0 {
        return Err(ModelError::invalid_config(field, "at least one layer is required"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalar_is_broadcast() {
        let sizes = PerLayer::from(4usize).resolve("cout", "n_layers", 3).unwrap();
        assert_eq!(sizes, vec![4, 4, 4]);
    }

    #[test]
    fn list_must_match_layer_count() {
        let err = PerLayer::from(vec![4, 8])
            .resolve("upsample_cout", "n_layers", 3)
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("upsample_cout"));

        let err = PerLayer::from([4, 8, 16, 32])
            .resolve("upsample_cout", "n_layers", 3)
            .unwrap_err();
        match err {
            ModelError::InvalidLayerConfig {
                expected, actual, ..
            } => assert_eq!((expected, actual), (3, 4)),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn json_accepts_scalar_or_list() {
        let scalar: PerLayer = serde_json::from_str("3").unwrap();
        let list: PerLayer = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(scalar, PerLayer::Scalar(3));
        assert_eq!(list, PerLayer::List(vec![1, 2]));
    }
}
