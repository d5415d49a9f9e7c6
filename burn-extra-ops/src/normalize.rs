//! Lp normalization along a single axis.

use burn::prelude::*;

/// Scales `x` to unit L2 norm along `dim`.
///
/// The norm is clamped below at `eps`, so all-zero slices stay zero instead of
/// producing NaN.
pub fn l2_normalize<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize, eps: f64) -> Tensor<B, D> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(dim).sqrt().clamp_min(eps);
    x.div(norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::ndarray::NdArray,
        tensor::{Tolerance, TensorData},
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn rows_have_unit_norm() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[3.0, 4.0], [0.0, 2.0]], &device);

        let y = l2_normalize(x, 1, 1e-10);

        y.into_data().assert_approx_eq::<f32>(
            &TensorData::from([[0.6f32, 0.8], [0.0, 1.0]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn zero_slices_stay_zero() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::zeros([1, 3, 4], &device);

        let y = l2_normalize(x, 1, 1e-10);

        let values = y.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| *v == 0.0));
    }
}
