//! Inverted dropout with an explicit train/eval switch.
//!
//! Masks are sampled on the host from a seeded [`StdRng`] so a fixed seed
//! reproduces the same sequence of masks. The RNG advances on every call, so
//! two consecutive training-mode calls on the same input generally differ.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use candle_core::{DType, Error, Result, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{checks, dtypes::PrecisionPolicy};

/// Dropout layer applicable to tensors of any rank.
pub struct Dropout {
    probability: f32,
    rng: Mutex<StdRng>,
    training: AtomicBool,
}

impl fmt::Debug for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("probability", &self.probability)
            .field("training", &self.is_training())
            .finish()
    }
}

impl Dropout {
    /// Builds a dropout layer. `probability` must lie in `[0, 1)`.
    ///
    /// New layers start in training mode.
    pub fn new(probability: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(Error::Msg(format!(
                "dropout probability must be in [0, 1), got {probability}"
            )));
        }
        Ok(Self {
            probability,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            training: AtomicBool::new(true),
        })
    }

    /// A layer that never drops anything.
    pub fn disabled() -> Self {
        Self {
            probability: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            training: AtomicBool::new(false),
        }
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    /// True when the next call will actually drop values.
    pub fn is_active(&self) -> bool {
        self.is_training() && self.probability > 0.0
    }

    /// Zeroes each element with probability `p` and scales survivors by `1 / (1 - p)`.
    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        if !self.is_active() {
            return Ok(input.clone());
        }
        checks::ensure_float("dropout.input", input.dtype())?;

        let keep = 1.0 - self.probability;
        let total = input.elem_count();
        let mask = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
            (0..total)
                .map(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
                .collect::<Vec<f32>>()
        };

        let compute = policy.cast_for_matmul(input)?;
        let mask = Tensor::from_vec(mask, input.dims(), input.device())?;
        let mask = if compute.dtype() == DType::F32 {
            mask
        } else {
            mask.to_dtype(compute.dtype())?
        };
        let dropped = compute.mul(&mask)?;
        if dropped.dtype() == input.dtype() {
            Ok(dropped)
        } else {
            dropped.to_dtype(input.dtype())
        }
    }
}
