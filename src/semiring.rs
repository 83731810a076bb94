//! Semiring algebras for aggregating soft-pattern match scores
//!
//! The pattern matcher is generic over the algebra used to combine
//! per-position transition scores into a single activation: max-plus
//! (Viterbi-style best path), probability-sum, or log-space max-times.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};

/// Finite stand-in for −∞ in the max-based algebras. A true −∞ would turn
/// into NaN once a never-matching pattern's score reaches the MLP head.
pub const NEG_INF: f32 = -1e9;

/// Algebra used to combine transition scores along and across match paths.
///
/// `times` extends a path by one transition, `plus` merges alternative
/// paths. `encode` maps raw affine outputs into the score domain the
/// algebra operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Semiring {
    /// Best path, additive scores: plus = max, times = +.
    MaxPlus,
    /// Path probabilities: plus = +, times = *, scores through a sigmoid.
    #[default]
    Prob,
    /// Best path over log-probabilities: plus = max, times = +,
    /// scores through a log-sigmoid.
    LogSpaceMaxTimes,
}

impl Semiring {
    /// Additive identity: the score of an impossible path.
    pub fn zero<S: Into<candle_core::Shape>>(&self, shape: S, device: &Device) -> Result<Tensor> {
        let t = match self {
            Semiring::MaxPlus | Semiring::LogSpaceMaxTimes => {
                Tensor::full(NEG_INF, shape, device)?
            }
            Semiring::Prob => Tensor::zeros(shape, DType::F32, device)?,
        };
        Ok(t)
    }

    /// Multiplicative identity: the score of the empty path.
    pub fn one<S: Into<candle_core::Shape>>(&self, shape: S, device: &Device) -> Result<Tensor> {
        let t = match self {
            Semiring::MaxPlus | Semiring::LogSpaceMaxTimes => {
                Tensor::zeros(shape, DType::F32, device)?
            }
            Semiring::Prob => Tensor::ones(shape, DType::F32, device)?,
        };
        Ok(t)
    }

    /// Merge alternative paths.
    pub fn plus(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let t = match self {
            Semiring::MaxPlus | Semiring::LogSpaceMaxTimes => a.maximum(b)?,
            Semiring::Prob => (a + b)?,
        };
        Ok(t)
    }

    /// Extend a path by one transition.
    pub fn times(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let t = match self {
            Semiring::MaxPlus | Semiring::LogSpaceMaxTimes => (a + b)?,
            Semiring::Prob => (a * b)?,
        };
        Ok(t)
    }

    /// Map raw affine outputs into this algebra's score domain.
    pub fn encode(&self, raw: &Tensor) -> Result<Tensor> {
        let t = match self {
            Semiring::MaxPlus => raw.clone(),
            Semiring::Prob => candle_nn::ops::sigmoid(raw)?,
            Semiring::LogSpaceMaxTimes => candle_nn::ops::sigmoid(raw)?
                .clamp(f32::MIN_POSITIVE, 1.0)?
                .log()?,
        };
        Ok(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(semiring: Semiring, op: impl Fn(&Semiring, &Tensor, &Tensor) -> Result<Tensor>, a: f32, b: f32) -> f32 {
        let device = Device::Cpu;
        let ta = Tensor::full(a, (1,), &device).unwrap();
        let tb = Tensor::full(b, (1,), &device).unwrap();
        op(&semiring, &ta, &tb).unwrap().to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_maxplus_algebra() {
        assert_eq!(scalar(Semiring::MaxPlus, Semiring::plus, 1.5, -2.0), 1.5);
        assert_eq!(scalar(Semiring::MaxPlus, Semiring::times, 1.5, -2.0), -0.5);
        // zero swamps any path under times, is identity under plus
        assert!(scalar(Semiring::MaxPlus, Semiring::times, NEG_INF, 3.0) < NEG_INF / 2.0);
        assert_eq!(scalar(Semiring::MaxPlus, Semiring::plus, NEG_INF, 3.0), 3.0);
    }

    #[test]
    fn test_prob_algebra() {
        assert_eq!(scalar(Semiring::Prob, Semiring::plus, 0.25, 0.5), 0.75);
        assert_eq!(scalar(Semiring::Prob, Semiring::times, 0.25, 0.5), 0.125);
        assert_eq!(scalar(Semiring::Prob, Semiring::times, 0.0, 0.9), 0.0);
    }

    #[test]
    fn test_identities() {
        let device = Device::Cpu;
        for semiring in [Semiring::MaxPlus, Semiring::Prob, Semiring::LogSpaceMaxTimes] {
            let one = semiring.one((2, 2), &device).unwrap();
            let zero = semiring.zero((2, 2), &device).unwrap();
            let x = Tensor::full(0.3f32, (2, 2), &device).unwrap();

            let tx = semiring.times(&one, &x).unwrap().to_vec2::<f32>().unwrap();
            assert_eq!(tx[0][0], 0.3);

            let px = semiring.plus(&zero, &x).unwrap().to_vec2::<f32>().unwrap();
            assert_eq!(px[1][1], 0.3);
        }
    }

    #[test]
    fn test_encode_domains() {
        let device = Device::Cpu;
        let raw = Tensor::full(0.0f32, (1,), &device).unwrap();

        let p = Semiring::Prob.encode(&raw).unwrap().to_vec1::<f32>().unwrap()[0];
        assert!((p - 0.5).abs() < 1e-6);

        let m = Semiring::MaxPlus.encode(&raw).unwrap().to_vec1::<f32>().unwrap()[0];
        assert_eq!(m, 0.0);

        let l = Semiring::LogSpaceMaxTimes
            .encode(&raw)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[0];
        assert!((l - 0.5f32.ln()).abs() < 1e-6);
    }
}
