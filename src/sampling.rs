use burn::tensor::{backend::Backend, Tensor};
use burn_tensor::{Data, Shape};

/// Maps every output pixel centre through `theta`.
///
/// theta is (batch, 2, 3); the result is (batch, height * width, 2) holding
/// normalized (x, y) source coordinates in row-major pixel order. Pixel
/// centres are at `(2i + 1) / size - 1`, so the corners of the image sit at
/// -1 and 1 rather than the centres of the corner pixels.
pub fn affine_grid<B: Backend>(theta: Tensor<B, 3>, height: usize, width: usize) -> Tensor<B, 3> {
    let [batch, _, _] = theta.dims();
    let device = theta.device();

    let mut base = Vec::with_capacity(height * width * 3);
    for row in 0..height {
        let y = pixel_center(row, height);
        for col in 0..width {
            base.extend_from_slice(&[pixel_center(col, width), y, 1.0]);
        }
    }
    let base: Tensor<B, 2> = Tensor::from_data(
        Data::new(base, Shape::new([height * width, 3])).convert::<B::FloatElem>(),
        &device,
    );

    // (b, h*w, 3) x (b, 3, 2)
    base.unsqueeze::<3>()
        .repeat(0, batch)
        .matmul(theta.swap_dims(1, 2))
}

/// Bilinear sampling of `input` at the normalized coordinates in `grid`.
///
/// input (batch, channels, in_h, in_w), grid (batch, height * width, 2).
/// Neighbours outside the input read as zero.
pub fn grid_sample<B: Backend>(
    input: Tensor<B, 4>,
    grid: Tensor<B, 3>,
    height: usize,
    width: usize,
) -> Tensor<B, 4> {
    let [batch, channels, in_h, in_w] = input.dims();
    let [_, points, _] = grid.dims();
    let flat = input.reshape([batch, channels, in_h * in_w]);

    let x = grid
        .clone()
        .slice([0..batch, 0..points, 0..1])
        .reshape([batch, points]);
    let y = grid
        .slice([0..batch, 0..points, 1..2])
        .reshape([batch, points]);
    let ix = unnormalize(x, in_w);
    let iy = unnormalize(y, in_h);

    let x0 = floor(ix.clone());
    let y0 = floor(iy.clone());
    let x1 = x0.clone().add_scalar(1.0);
    let y1 = y0.clone().add_scalar(1.0);

    let wx1 = ix - x0.clone();
    let wx0 = wx1.clone().neg().add_scalar(1.0);
    let wy1 = iy - y0.clone();
    let wy0 = wy1.clone().neg().add_scalar(1.0);

    let top_left = gather_corner(&flat, x0.clone(), y0.clone(), wx0.clone() * wy0.clone(), in_h, in_w);
    let top_right = gather_corner(&flat, x1.clone(), y0, wx1.clone() * wy0, in_h, in_w);
    let bottom_left = gather_corner(&flat, x0, y1.clone(), wx0 * wy1.clone(), in_h, in_w);
    let bottom_right = gather_corner(&flat, x1, y1, wx1 * wy1, in_h, in_w);

    (top_left + top_right + bottom_left + bottom_right).reshape([batch, channels, height, width])
}

/// Resamples `input` through `theta` at the input's own spatial size.
pub fn warp<B: Backend>(input: Tensor<B, 4>, theta: Tensor<B, 3>) -> Tensor<B, 4> {
    let [_, _, height, width] = input.dims();
    let grid = affine_grid(theta, height, width);
    grid_sample(input, grid, height, width)
}

fn pixel_center(index: usize, size: usize) -> f32 {
    (2 * index + 1) as f32 / size as f32 - 1.0
}

/// Normalized coordinate to pixel index space. Clamped to [-2, size + 1]:
/// anything further out has no in-bounds neighbour either way.
fn unnormalize<B: Backend>(coords: Tensor<B, 2>, size: usize) -> Tensor<B, 2> {
    coords
        .add_scalar(1.0)
        .mul_scalar(size as f32)
        .sub_scalar(1.0)
        .div_scalar(2.0)
        .clamp(-2.0, size as f32 + 1.0)
}

/// Floor for values >= -2; truncation is floor once shifted non-negative.
fn floor<B: Backend>(coords: Tensor<B, 2>) -> Tensor<B, 2> {
    coords.add_scalar(2.0).int().float().sub_scalar(2.0)
}

fn gather_corner<B: Backend>(
    flat: &Tensor<B, 3>,
    xs: Tensor<B, 2>,
    ys: Tensor<B, 2>,
    weight: Tensor<B, 2>,
    in_h: usize,
    in_w: usize,
) -> Tensor<B, 3> {
    let [_, channels, _] = flat.dims();
    let max_x = (in_w - 1) as f32;
    let max_y = (in_h - 1) as f32;

    let inside = xs.clone().greater_equal_elem(0.0).float()
        * xs.clone().lower_equal_elem(max_x).float()
        * ys.clone().greater_equal_elem(0.0).float()
        * ys.clone().lower_equal_elem(max_y).float();

    let index = (ys.clamp(0.0, max_y) * in_w as f32 + xs.clamp(0.0, max_x))
        .int()
        .unsqueeze_dim::<3>(1)
        .repeat(1, channels);
    let weight = (weight * inside).unsqueeze_dim::<3>(1).repeat(1, channels);

    flat.clone().gather(2, index) * weight
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{DefaultBackend, TrainBackend};
    use burn_tensor::ElementConversion;

    type B = DefaultBackend;

    fn values<Bk: Backend, const D: usize>(tensor: Tensor<Bk, D>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().value
    }

    fn ramp(batch: usize, channels: usize, height: usize, width: usize) -> Tensor<B, 4> {
        let n = batch * channels * height * width;
        let data: Vec<f32> = (0..n).map(|i| i as f32 + 1.0).collect();
        Tensor::<B, 1>::from_floats(data.as_slice(), &Default::default())
            .reshape([batch, channels, height, width])
    }

    fn theta(rows: [[f32; 3]; 2], batch: usize) -> Tensor<B, 3> {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::<B, 1>::from_floats(flat.as_slice(), &Default::default())
            .reshape([1, 2, 3])
            .repeat(0, batch)
    }

    #[test]
    fn identity_grid_hits_pixel_centres() {
        let grid = affine_grid(theta([[1., 0., 0.], [0., 1., 0.]], 1), 2, 2);
        assert_eq!(grid.dims(), [1, 4, 2]);
        let expected = [-0.5, -0.5, 0.5, -0.5, -0.5, 0.5, 0.5, 0.5];
        for (got, want) in values(grid).iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn identity_warp_keeps_input() {
        let input = ramp(2, 3, 5, 4);
        let output = warp(input.clone(), theta([[1., 0., 0.], [0., 1., 0.]], 2));

        assert_eq!(output.dims(), [2, 3, 5, 4]);
        for (got, want) in values(output).iter().zip(values(input)) {
            assert!((got - want).abs() < 1e-4, "{got} != {want}");
        }
    }

    #[test]
    fn translation_shifts_by_one_column() {
        let width = 4;
        let input = ramp(1, 1, 3, width);
        let shift = 2.0 / width as f32;
        let output = values(warp(input.clone(), theta([[1., 0., shift], [0., 1., 0.]], 1)));
        let input = values(input);

        for row in 0..3 {
            for col in 0..width {
                let got = output[row * width + col];
                let want = if col + 1 < width {
                    input[row * width + col + 1]
                } else {
                    0.0
                };
                assert!((got - want).abs() < 1e-4, "({row}, {col}): {got} != {want}");
            }
        }
    }

    #[test]
    fn half_pixel_shift_interpolates() {
        let input = ramp(1, 1, 1, 2);
        // sample halfway between the two pixels
        let grid = Tensor::<B, 1>::from_floats([0.0, 0.0], &Default::default()).reshape([1, 1, 2]);
        let output = grid_sample(input, grid, 1, 1);
        let value = output.into_scalar().elem::<f32>();
        assert!((value - 1.5).abs() < 1e-5, "{value}");
    }

    #[test]
    fn far_outside_reads_zero() {
        let input = ramp(1, 2, 3, 3);
        let output = warp(input, theta([[1., 0., 10.], [0., 1., -10.]], 1));
        assert!(values(output).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn gradient_reaches_theta() {
        let device = Default::default();
        let input = Tensor::<TrainBackend, 1>::from_floats(
            (0..16).map(|i| (i * i) as f32).collect::<Vec<_>>().as_slice(),
            &device,
        )
        .reshape([1, 1, 4, 4]);
        let theta = Tensor::<TrainBackend, 1>::from_floats([0.9, 0.1, 0.05, -0.1, 1.1, 0.0], &device)
            .reshape([1, 2, 3])
            .require_grad();

        let grads = warp(input, theta.clone()).sum().backward();
        let grad = theta.grad(&grads).expect("theta should receive a gradient");

        let grad = values(grad);
        assert_eq!(grad.len(), 6);
        assert!(grad.iter().all(|g| g.is_finite()));
        assert!(grad.iter().any(|g| *g != 0.0));
    }
}
