// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Fused output activations shared by the sparse kernels and the reference.

use candle_core::Tensor;

use crate::error::{Result, SpmmError};

/// Activation applied after bias addition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ActivationKind {
    /// No activation.
    #[default]
    Identity,
    /// `max(x, 0)`.
    Relu,
    /// `min(max(x, 0), threshold)`.
    Relu6,
    /// `x` for positive inputs, `alpha * x` otherwise.
    LeakyRelu,
}

impl ActivationKind {
    /// Map the numeric activation code used by sweep configurations:
    /// 0 identity, 1 relu, 2 relu6, 3 leaky relu.
    ///
    /// # Errors
    ///
    /// Returns [`SpmmError::InvalidConfig`] for any other code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Identity),
            1 => Ok(Self::Relu),
            2 => Ok(Self::Relu6),
            3 => Ok(Self::LeakyRelu),
            _ => Err(SpmmError::InvalidConfig(format!(
                "unknown activation code {code}"
            ))),
        }
    }

    /// Short name for log lines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Relu => "relu",
            Self::Relu6 => "relu6",
            Self::LeakyRelu => "leaky_relu",
        }
    }
}

/// Activation kind plus its parameters, as passed to a sparse kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationDescriptor {
    /// Which activation to apply.
    pub kind: ActivationKind,
    /// Upper clip for [`ActivationKind::Relu6`].
    pub clip: f32,
    /// Negative slope for [`ActivationKind::LeakyRelu`].
    pub alpha: f32,
}

impl Default for ActivationDescriptor {
    fn default() -> Self {
        Self::new(ActivationKind::Identity)
    }
}

impl ActivationDescriptor {
    /// Descriptor with default parameters (clip 6, slope 0.01).
    #[must_use]
    pub const fn new(kind: ActivationKind) -> Self {
        Self {
            kind,
            clip: 6.0,
            alpha: 0.01,
        }
    }

    /// True if an activation other than identity is fused.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.kind != ActivationKind::Identity
    }

    /// Rescale value-dependent parameters into another output domain.
    ///
    /// The int8 kernels compute in units of the output scale, so the relu6
    /// clip must be divided by it as well.
    #[must_use]
    pub fn rescaled(self, factor: f32) -> Self {
        Self {
            clip: self.clip * factor,
            ..self
        }
    }

    /// Apply to a scalar.
    #[must_use]
    pub fn apply(&self, x: f32) -> f32 {
        match self.kind {
            ActivationKind::Identity => x,
            ActivationKind::Relu => x.max(0.0),
            ActivationKind::Relu6 => x.max(0.0).min(self.clip),
            ActivationKind::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    x * self.alpha
                }
            }
        }
    }

    /// Apply element-wise to a tensor.
    ///
    /// # Errors
    ///
    /// Returns error if a tensor operation fails.
    pub fn apply_tensor(&self, x: &Tensor) -> Result<Tensor> {
        let out = match self.kind {
            ActivationKind::Identity => x.clone(),
            ActivationKind::Relu => x.relu()?,
            ActivationKind::Relu6 => x.relu()?.minimum(self.clip)?,
            ActivationKind::LeakyRelu => {
                let negative = x.affine(f64::from(self.alpha), 0.0)?;
                x.gt(0f32)?.where_cond(x, &negative)?
            }
        };
        Ok(out)
    }
}
