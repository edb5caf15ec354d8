//! The generator's Parameter Set and its gradient counterpart.
//!
//! Every trainable tensor lives in one [`ParameterSet`] record with a fixed
//! layout. Gradients use the same record type, so clipping, finiteness checks
//! and optimizer updates walk both with the same named iteration.

use crate::config::GeneratorConfig;
use crate::graph::{Graph, GraphError, TensorId};
use crate::tensor::{Tensor, TensorError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Weights of one gate: `act(x·W + h·U + b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateWeights {
    /// Input-to-gate weights, `[emb_dim, hidden_dim]`.
    pub w: Tensor<f32>,
    /// Hidden-to-gate weights, `[hidden_dim, hidden_dim]`.
    pub u: Tensor<f32>,
    /// Gate bias, `[hidden_dim]`.
    pub b: Tensor<f32>,
}

/// Hidden-to-logits affine map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputWeights {
    /// `[hidden_dim, vocab_size]`.
    pub w: Tensor<f32>,
    /// `[vocab_size]`.
    pub b: Tensor<f32>,
}

/// All trainable state of the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Token embedding table, `[vocab_size, emb_dim]`.
    pub embedding: Tensor<f32>,
    /// Input gate.
    pub input_gate: GateWeights,
    /// Forget gate.
    pub forget_gate: GateWeights,
    /// Output gate.
    pub output_gate: GateWeights,
    /// Candidate cell activation.
    pub candidate_gate: GateWeights,
    /// Output projection.
    pub output_projection: OutputWeights,
}

/// Gradients share the Parameter Set layout.
pub type Gradients = ParameterSet;

/// Number of tensors in a [`ParameterSet`].
pub const NUM_TENSORS: usize = 15;

impl GateWeights {
    fn init<E>(
        config: &GeneratorConfig,
        mut init: impl FnMut(&[usize]) -> Result<Tensor<f32>, E>,
    ) -> Result<Self, E> {
        Ok(Self {
            w: init(&[config.emb_dim, config.hidden_dim])?,
            u: init(&[config.hidden_dim, config.hidden_dim])?,
            b: init(&[config.hidden_dim])?,
        })
    }
}

impl ParameterSet {
    fn init<E>(
        config: &GeneratorConfig,
        mut init: impl FnMut(&[usize]) -> Result<Tensor<f32>, E>,
    ) -> Result<Self, E> {
        Ok(Self {
            embedding: init(&[config.vocab_size, config.emb_dim])?,
            input_gate: GateWeights::init(config, &mut init)?,
            forget_gate: GateWeights::init(config, &mut init)?,
            output_gate: GateWeights::init(config, &mut init)?,
            candidate_gate: GateWeights::init(config, &mut init)?,
            output_projection: OutputWeights {
                w: init(&[config.hidden_dim, config.vocab_size])?,
                b: init(&[config.vocab_size])?,
            },
        })
    }

    /// Every tensor, biases included, drawn from `N(0, init_stddev²)`.
    pub fn random<R: Rng>(rng: &mut R, config: &GeneratorConfig) -> Result<Self, TensorError> {
        Self::init(config, |shape| {
            Tensor::rand_normal(rng, shape, config.init_stddev)
        })
    }

    /// All-zero parameters (uniform output distribution).
    pub fn zeros(config: &GeneratorConfig) -> Self {
        let zeros = |shape: &[usize]| Ok::<_, Infallible>(Tensor::zeros(shape));
        match Self::init(config, zeros) {
            Ok(params) => params,
            Err(never) => match never {},
        }
    }

    /// Zero tensors with the same shapes as `self`.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        let mut out = self.clone();
        for (_, t) in out.tensors_mut() {
            t.blob_mut().fill(0.0);
        }
        out
    }

    /// Named tensors in a fixed order.
    pub fn tensors(&self) -> [(&'static str, &Tensor<f32>); NUM_TENSORS] {
        let Self {
            embedding,
            input_gate: i,
            forget_gate: f,
            output_gate: o,
            candidate_gate: c,
            output_projection: out,
        } = self;
        [
            ("embedding", embedding),
            ("input_gate.w", &i.w),
            ("input_gate.u", &i.u),
            ("input_gate.b", &i.b),
            ("forget_gate.w", &f.w),
            ("forget_gate.u", &f.u),
            ("forget_gate.b", &f.b),
            ("output_gate.w", &o.w),
            ("output_gate.u", &o.u),
            ("output_gate.b", &o.b),
            ("candidate_gate.w", &c.w),
            ("candidate_gate.u", &c.u),
            ("candidate_gate.b", &c.b),
            ("output_projection.w", &out.w),
            ("output_projection.b", &out.b),
        ]
    }

    /// Mutable named tensors, in the same order as [`ParameterSet::tensors`].
    pub fn tensors_mut(&mut self) -> [(&'static str, &mut Tensor<f32>); NUM_TENSORS] {
        let Self {
            embedding,
            input_gate: i,
            forget_gate: f,
            output_gate: o,
            candidate_gate: c,
            output_projection: out,
        } = self;
        [
            ("embedding", embedding),
            ("input_gate.w", &mut i.w),
            ("input_gate.u", &mut i.u),
            ("input_gate.b", &mut i.b),
            ("forget_gate.w", &mut f.w),
            ("forget_gate.u", &mut f.u),
            ("forget_gate.b", &mut f.b),
            ("output_gate.w", &mut o.w),
            ("output_gate.u", &mut o.u),
            ("output_gate.b", &mut o.b),
            ("candidate_gate.w", &mut c.w),
            ("candidate_gate.u", &mut c.u),
            ("candidate_gate.b", &mut c.b),
            ("output_projection.w", &mut out.w),
            ("output_projection.b", &mut out.b),
        ]
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.tensors().iter().map(|(_, t)| t.size()).sum()
    }

    /// Fails unless every tensor has the shape `config` prescribes.
    pub fn check_shapes(&self, config: &GeneratorConfig) -> Result<(), TensorError> {
        let expected = Self::zeros(config);
        for ((_, t), (_, e)) in self.tensors().iter().zip(expected.tensors()) {
            t.expect_shape(e.shape())?;
        }
        Ok(())
    }

    /// L2 norm over every element of every tensor.
    pub fn global_norm(&self) -> f32 {
        self.tensors()
            .iter()
            .map(|(_, t)| t.squared_norm())
            .sum::<f32>()
            .sqrt()
    }

    /// Rescales so the global norm is at most `max_norm`, returning the norm
    /// measured before clipping.
    ///
    /// A non-finite norm leaves the values as they are; callers detect it with
    /// [`ParameterSet::first_non_finite`].
    pub fn clip_by_global_norm(&mut self, max_norm: f32) -> f32 {
        let norm = self.global_norm();
        if norm.is_finite() && norm > max_norm {
            let scale = max_norm / norm;
            for (_, t) in self.tensors_mut() {
                for v in t.blob_mut() {
                    *v *= scale;
                }
            }
        }
        norm
    }

    /// Name of the first tensor holding a NaN or infinity.
    pub fn first_non_finite(&self) -> Option<&'static str> {
        self.tensors()
            .into_iter()
            .find(|(_, t)| !t.is_finite())
            .map(|(name, _)| name)
    }

    /// Copies every tensor into `graph`, as trainable parameters when
    /// `trainable` is set or as constants otherwise.
    pub fn register<G: Graph>(
        &self,
        graph: &mut G,
        trainable: bool,
    ) -> Result<ParameterIds, GraphError> {
        let mut alloc = |name: &str, t: &Tensor<f32>| graph.alloc(t.clone(), trainable, name.to_string());
        let mut gate = |prefix: &str, g: &GateWeights| -> Result<GateIds, GraphError> {
            Ok(GateIds {
                w: alloc(&format!("{prefix}.w"), &g.w)?,
                u: alloc(&format!("{prefix}.u"), &g.u)?,
                b: alloc(&format!("{prefix}.b"), &g.b)?,
            })
        };
        let input_gate = gate("input_gate", &self.input_gate)?;
        let forget_gate = gate("forget_gate", &self.forget_gate)?;
        let output_gate = gate("output_gate", &self.output_gate)?;
        let candidate_gate = gate("candidate_gate", &self.candidate_gate)?;
        Ok(ParameterIds {
            embedding: alloc("embedding", &self.embedding)?,
            input_gate,
            forget_gate,
            output_gate,
            candidate_gate,
            output_projection: OutputIds {
                w: alloc("output_projection.w", &self.output_projection.w)?,
                b: alloc("output_projection.b", &self.output_projection.b)?,
            },
        })
    }
}

/// Graph handles of one gate's weights.
#[derive(Debug, Clone, Copy)]
pub struct GateIds {
    /// Input-to-gate weights.
    pub w: TensorId,
    /// Hidden-to-gate weights.
    pub u: TensorId,
    /// Bias.
    pub b: TensorId,
}

/// Graph handles of the output projection.
#[derive(Debug, Clone, Copy)]
pub struct OutputIds {
    /// Weights.
    pub w: TensorId,
    /// Bias.
    pub b: TensorId,
}

/// Graph handles of a registered [`ParameterSet`].
#[derive(Debug, Clone, Copy)]
pub struct ParameterIds {
    /// Embedding table.
    pub embedding: TensorId,
    /// Input gate.
    pub input_gate: GateIds,
    /// Forget gate.
    pub forget_gate: GateIds,
    /// Output gate.
    pub output_gate: GateIds,
    /// Candidate activation.
    pub candidate_gate: GateIds,
    /// Output projection.
    pub output_projection: OutputIds,
}

impl ParameterIds {
    /// Collects the gradients of the last `backward` pass into a [`Gradients`] record.
    pub fn gradients<G: Graph>(&self, graph: &G) -> Result<Gradients, GraphError> {
        let grad = |id: TensorId| graph.get_grad(id).cloned();
        let gate = |g: &GateIds| -> Result<GateWeights, GraphError> {
            Ok(GateWeights {
                w: grad(g.w)?,
                u: grad(g.u)?,
                b: grad(g.b)?,
            })
        };
        Ok(Gradients {
            embedding: grad(self.embedding)?,
            input_gate: gate(&self.input_gate)?,
            forget_gate: gate(&self.forget_gate)?,
            output_gate: gate(&self.output_gate)?,
            candidate_gate: gate(&self.candidate_gate)?,
            output_projection: OutputWeights {
                w: grad(self.output_projection.w)?,
                b: grad(self.output_projection.b)?,
            },
        })
    }
}
