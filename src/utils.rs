use anyhow::{bail, Context, Result};
use burn::tensor::{backend::Backend, Tensor};
use burn_tensor::{Data, Shape};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut i_buffer = [0u8; std::mem::size_of::<i32>()];
    r.read_exact(&mut i_buffer)?;
    Ok(i32::from_le_bytes(i_buffer))
}

pub fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    let mut f_buffer = [0u8; std::mem::size_of::<f32>()];
    r.read_exact(&mut f_buffer)?;
    Ok(f32::from_le_bytes(f_buffer))
}

/// Reads a tensor stored as: i32 rank, rank x i32 dims, then f32 values in
/// row-major order, all little endian.
pub fn read_array<R: Read>(input: &mut R) -> Result<ArrayD<f32>> {
    let rank = read_i32(input).context("tensor header should have a rank")?;
    let mut dims = Vec::new();
    for _ in 0..rank {
        let dim = read_i32(input)?;
        if dim < 0 {
            bail!("negative dimension {dim} in tensor header");
        }
        dims.push(dim as usize);
    }

    let count: usize = dims.iter().product();
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_f32(input).context("tensor file is shorter than its header says")?);
    }

    Ok(ArrayD::from_shape_vec(IxDyn(&dims), values)?)
}

pub fn write_array<W: Write>(output: &mut W, array: &ArrayD<f32>) -> Result<()> {
    output.write_all(&(array.ndim() as i32).to_le_bytes())?;
    for dim in array.shape() {
        output.write_all(&(*dim as i32).to_le_bytes())?;
    }
    for value in array.iter() {
        output.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

pub fn array_to_tensor<B: Backend, const D: usize>(
    array: ArrayD<f32>,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    if array.ndim() != D {
        bail!("expected a rank {D} tensor, got rank {}", array.ndim());
    }
    let mut dims = [0; D];
    dims.copy_from_slice(array.shape());
    let values = array.as_standard_layout().iter().copied().collect::<Vec<_>>();

    Ok(Tensor::from_data(
        Data::new(values, Shape::new(dims)).convert::<B::FloatElem>(),
        device,
    ))
}

pub fn tensor_to_array<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<ArrayD<f32>> {
    let data = tensor.into_data().convert::<f32>();
    Ok(ArrayD::from_shape_vec(IxDyn(&data.shape.dims), data.value)?)
}

pub fn read_tensor<B: Backend, const D: usize, P: AsRef<Path>>(
    path: P,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let array = read_array(&mut BufReader::new(file))
        .with_context(|| format!("failed to read tensor from {}", path.display()))?;
    array_to_tensor(array, device)
}

pub fn write_tensor<B: Backend, const D: usize, P: AsRef<Path>>(
    path: P,
    tensor: Tensor<B, D>,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut output = BufWriter::new(file);
    write_array(&mut output, &tensor_to_array(tensor)?)?;
    output.flush()?;
    Ok(())
}

/// Seeded uniform data in `[low, high)` for demo runs.
pub fn synthetic_tensor<B: Backend, const D: usize>(
    dims: [usize; D],
    low: f32,
    high: f32,
    rng: &mut StdRng,
    device: &B::Device,
) -> Tensor<B, D> {
    let count: usize = dims.iter().product();
    let values: Vec<f32> = (0..count).map(|_| rng.gen_range(low..high)).collect();
    Tensor::from_data(
        Data::new(values, Shape::new(dims)).convert::<B::FloatElem>(),
        device,
    )
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}
