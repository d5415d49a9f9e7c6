use burn::prelude::*;
use burn_extra_ops::l2_normalize;

const EPS: f64 = 1e-10;

/// Cosine similarity of two `[batch, channels, height, width]` feature maps.
///
/// Channel vectors are L2-normalized at every position, their dot products
/// are averaged over positions, and the result has shape `[batch]` with
/// values in `[-1, 1]`.
pub fn cosine_similarity<B: Backend>(x: Tensor<B, 4>, y: Tensor<B, 4>) -> Tensor<B, 1> {
    let [batch, channels, height, width] = x.dims();
    let x = l2_normalize(x.reshape([batch, channels, height * width]), 1, EPS);
    let y = l2_normalize(y.reshape([batch, channels, height * width]), 1, EPS);

    x.mul(y).sum_dim(1).mean_dim(2).reshape([batch])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::ndarray::NdArray,
        tensor::{Distribution, Tolerance},
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn identical_maps_score_one() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([2, 8, 3, 5], Distribution::Default, &device);

        let score = cosine_similarity(x.clone(), x);

        score
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([1.0f32, 1.0]), Tolerance::default());
    }

    #[test]
    fn opposite_maps_score_minus_one() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([1, 4, 2, 2], Distribution::Default, &device)
            .add_scalar(0.1);

        let score = cosine_similarity(x.clone(), x.neg());

        score
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([-1.0f32]), Tolerance::default());
    }

    #[test]
    fn orthogonal_channels_score_zero() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[1.0]], [[0.0]]]], &device);
        let y = Tensor::<TestBackend, 4>::from_floats([[[[0.0]], [[2.0]]]], &device);

        let score = cosine_similarity(x, y).into_data().to_vec::<f32>().unwrap();

        assert_eq!(score, vec![0.0]);
    }

    #[test]
    fn zero_maps_do_not_produce_nan() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 2, 2], &device);

        let score = cosine_similarity(x.clone(), x).into_data().to_vec::<f32>().unwrap();

        assert_eq!(score, vec![0.0]);
    }
}
