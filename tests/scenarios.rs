#![cfg(feature = "backend_ndarray")]

use burn::{backend::ndarray::NdArray, prelude::*, tensor::Distribution};
use burn_bilinear::{
    layers::registry::{LayerParams, OperatorKind, OperatorRegistry},
    BilinearInterpConfig,
};

type TestBackend = NdArray<f32>;


fn to_vec<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
    tensor.into_data().to_vec::<f32>().unwrap()
}

/// 4x4 single channel map with 10 at (1, 1).
fn peak_map(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
    let mut values = vec![0.0f32; 16];
    values[5] = 10.0;
    Tensor::from_data(TensorData::new(values, [1, 1, 4, 4]), device)
}

/// Normalized coordinates for pixel position `(x, y)` on a 4x4 grid.
fn point(x: f32, y: f32, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 3> {
    let normalize = |p: f32| p / 2.0 - 1.0;
    Tensor::from_data(TensorData::new(vec![normalize(x), normalize(y)], [1, 2, 1]), device)
}


#[test]
fn peak_is_sampled_exactly() {
    let device = <TestBackend as Backend>::Device::default();
    let layer = BilinearInterpConfig::new().init();

    let output = layer.forward(peak_map(&device), point(1.0, 1.0, &device)).unwrap();

    assert_eq!(output.shape().dims, vec![1, 1, 1]);
    assert_eq!(to_vec(output), vec![10.0]);
}

#[test]
fn outside_point_has_zero_value_and_gradients() {
    let device = <TestBackend as Backend>::Device::default();
    let layer = BilinearInterpConfig::new().init();

    let output = layer.forward(peak_map(&device), point(-1.0, -1.0, &device)).unwrap();
    assert_eq!(to_vec(output), vec![0.0]);

    let grads = layer
        .backward(
            Tensor::ones([1, 1, 1], &device),
            peak_map(&device),
            point(-1.0, -1.0, &device),
        )
        .unwrap();

    assert!(to_vec(grads.input_grad).iter().all(|&v| v == 0.0));
    assert_eq!(to_vec(grads.coords_grad), vec![0.0, 0.0]);
}

#[test]
fn uniform_neighborhood_is_reproduced() {
    let device = <TestBackend as Backend>::Device::default();
    let layer = BilinearInterpConfig::new().init();
    let input = Tensor::<TestBackend, 4>::full([1, 1, 4, 4], 3.5, &device);

    let output = layer.forward(input, point(0.5, 0.5, &device)).unwrap();

    assert_eq!(to_vec(output), vec![3.5]);
}

#[test]
fn zero_input_round_trips_to_zero_output() {
    let device = <TestBackend as Backend>::Device::default();
    let mut op = OperatorRegistry::with_defaults()
        .create(&LayerParams::new(OperatorKind::BilinearInterp.to_string()))
        .unwrap();

    let top = op.reshape(&[&[2, 3, 5, 6], &[2, 2, 7]]).unwrap();
    assert_eq!(top, vec![2, 7, 3]);

    let input = vec![0.0; 2 * 3 * 5 * 6];
    let coords = Tensor::<TestBackend, 3>::random([2, 2, 7], Distribution::Uniform(-1.0, 1.0), &device);
    let coords = to_vec(coords);
    let mut output = vec![1.0; 2 * 7 * 3];

    op.forward(&[&input, &coords], &mut [&mut output]).unwrap();

    assert!(output.iter().all(|&v| v == 0.0));
}
