use burn::tensor::{backend::Backend, Tensor};

/// Per-layer recurrent state of the encoder, shallowest layer first.
///
/// Each entry is (batch, channels, height, width); channel and spatial sizes
/// differ between layers.
#[derive(Debug, Clone, Shrinkwrap)]
pub struct HiddenState<B: Backend> {
    pub layers: Vec<Tensor<B, 4>>,
}

impl<B: Backend> HiddenState<B> {
    pub fn new(layers: Vec<Tensor<B, 4>>) -> Self {
        Self { layers }
    }

    /// Deepest layer first, the order the forecaster consumes.
    pub fn reversed(&self) -> Self {
        Self {
            layers: self.layers.iter().rev().cloned().collect(),
        }
    }

    pub fn into_layers(self) -> Vec<Tensor<B, 4>> {
        self.layers
    }

    pub fn shapes(&self) -> Vec<[usize; 4]> {
        self.layers.iter().map(|layer| layer.dims()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DefaultBackend as B;

    #[test]
    fn reversed_puts_deepest_first() {
        let device = Default::default();
        let state = HiddenState::<B>::new(vec![
            Tensor::zeros([1, 4, 8, 8], &device),
            Tensor::zeros([1, 8, 4, 4], &device),
        ]);

        let reversed = state.reversed();
        assert_eq!(reversed.shapes(), vec![[1, 8, 4, 4], [1, 4, 8, 8]]);
        // deref to the layer list
        assert_eq!(state.len(), 2);
        assert_eq!(state.shapes()[0], [1, 4, 8, 8]);
    }
}
