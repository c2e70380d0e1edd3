pub type Result<T, E = ModelError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("`{field}` must have the same length as {count_field} ({expected}), got {actual}")]
    InvalidLayerConfig {
        field: &'static str,
        count_field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("tensor shape mismatch in {context}: {detail}")]
    TensorShapeMismatch {
        context: &'static str,
        detail: String,
    },
}

impl ModelError {
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub fn shape_mismatch(context: &'static str, detail: impl Into<String>) -> Self {
        Self::TensorShapeMismatch {
            context,
            detail: detail.into(),
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidLayerConfig { .. } | Self::InvalidConfig { .. }
        )
    }
}
