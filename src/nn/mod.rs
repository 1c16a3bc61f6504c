//! Neural conditional density and ratio estimators built on `burn`.
//!
//! Networks are generic over the backend. Training runs on an autodiff backend; fitted networks
//! are moved to the inner backend with [`AutodiffModule::valid`](burn::module::AutodiffModule)
//! before they are used for sampling or MCMC.

pub mod classifier;
pub mod layers;
pub mod maf;

use burn::prelude::*;
use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Result, SbiError};

pub use classifier::{Classifier, ClassifierConfig};
pub use layers::MaskedLinear;
pub use maf::{Maf, MafConfig};

/// Gathers `rows` of `a` into a `[rows.len(), a.ncols()]` tensor.
pub fn rows_to_tensor<B: Backend>(a: &Array2<f64>, rows: &[usize], device: &B::Device) -> Tensor<B, 2> {
    let d = a.ncols();
    let mut data = Vec::with_capacity(rows.len() * d);
    for &r in rows {
        data.extend(a.row(r).iter().map(|&v| v as f32));
    }
    Tensor::<B, 2>::from_data(TensorData::new(data, [rows.len(), d]), device)
}

/// Repeats `row` `n` times into an `[n, row.len()]` tensor.
pub fn repeat_row<B: Backend>(row: ArrayView1<f64>, n: usize, device: &B::Device) -> Tensor<B, 2> {
    let d = row.len();
    let mut data = Vec::with_capacity(n * d);
    for _ in 0..n {
        data.extend(row.iter().map(|&v| v as f32));
    }
    Tensor::<B, 2>::from_data(TensorData::new(data, [n, d]), device)
}

/// Gathers entries of `values` into a `[rows, cols]` tensor; `idx` is row-major.
pub fn gather_to_tensor<B: Backend>(
    values: &Array1<f64>,
    idx: &[usize],
    shape: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 2> {
    let data: Vec<f32> = idx.iter().map(|&i| values[i] as f32).collect();
    Tensor::<B, 2>::from_data(TensorData::new(data, shape), device)
}

pub fn tensor_to_array<B: Backend>(t: Tensor<B, 2>) -> Result<Array2<f64>> {
    let [n, d] = t.dims();
    let values = t
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|e| SbiError::EstimatorFit(format!("reading tensor data: {e:?}")))?;
    Ok(Array2::from_shape_vec((n, d), values)?)
}

pub fn tensor_to_vec<B: Backend>(t: Tensor<B, 1>) -> Result<Vec<f64>> {
    t.into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|e| SbiError::EstimatorFit(format!("reading tensor data: {e:?}")))
}

/// `log(1 + exp(x))` without overflow for large `x`.
pub fn softplus<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone().clamp_min(0.0) + x.abs().neg().exp().log1p()
}

/// Row-wise `log Σ exp` over dimension 1, returning shape `[n]`.
pub fn logsumexp<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 1> {
    let max = x.clone().max_dim(1).detach();
    (x - max.clone()).exp().sum_dim(1).log().add(max).squeeze(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use burn::backend::NdArray;
    use ndarray::{arr1, arr2};

    type B = NdArray;

    #[test]
    fn gathers_rows() {
        let a = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let device = Default::default();
        let t = rows_to_tensor::<B>(&a, &[2, 0], &device);
        assert_abs_diff_eq!(tensor_to_array(t).unwrap(), arr2(&[[5.0, 6.0], [1.0, 2.0]]));

        let r = repeat_row::<B>(arr1(&[7.0, 8.0]).view(), 2, &device);
        assert_abs_diff_eq!(tensor_to_array(r).unwrap(), arr2(&[[7.0, 8.0], [7.0, 8.0]]));
    }

    #[test]
    fn stable_softplus_and_logsumexp() {
        let device = Default::default();
        let x = Tensor::<B, 1>::from_floats([-100.0, 0.0, 100.0], &device);
        let y = tensor_to_vec(softplus(x)).unwrap();
        assert_abs_diff_eq!(y[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y[1], 2f64.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(y[2], 100.0, epsilon = 1e-4);

        let m = Tensor::<B, 2>::from_floats([[0.0, 0.0], [1000.0, 1000.0]], &device);
        let l = tensor_to_vec(logsumexp(m)).unwrap();
        assert_abs_diff_eq!(l[0], 2f64.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(l[1], 1000.0 + 2f64.ln(), epsilon = 1e-3);
    }
}
