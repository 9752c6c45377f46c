//! Native phase-functioned network.
//!
//! Three dense layers whose weights are a cyclic cubic Catmull-Rom blend of
//! four control-point weight sets, selected by the phase. Hidden layers use
//! ELU. Inputs are standardized with `Xmean`/`Xstd` and outputs restored with
//! `Ymean`/`Ystd`.
//!
//! Weights are read from a directory of raw little-endian f32 files:
//! `Xmean.bin`, `Xstd.bin`, `Ymean.bin`, `Ystd.bin`, and per layer `l` and
//! control point `k` the files `W{l}_{nnn}.bin` / `b{l}_{nnn}.bin` where
//! `nnn` is the zero-padded index `floor(k · 12.5)` of the 50-step phase table
//! the network was exported with.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use ndarray::{Array, Array1, Array2, Dimension};
use std::f64::consts::TAU;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::network::MotionNetwork;

/// Number of phase control points.
pub const CONTROL_POINTS: usize = 4;
const LAYERS: usize = 3;
/// Phase table resolution the files are indexed by.
const PHASE_TABLE: f64 = 50.0;

/// Weights and bias of one layer at one control point.
#[derive(Debug, Clone)]
pub struct LayerWeights {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

#[derive(Debug, Clone)]
pub struct PhaseFunctionedNetwork {
    x_mean: Array1<f32>,
    x_std: Array1<f32>,
    y_mean: Array1<f32>,
    y_std: Array1<f32>,
    /// `layers[l][k]`: layer `l` at control point `k`.
    layers: Vec<Vec<LayerWeights>>,
}

impl PhaseFunctionedNetwork {
    /// Assemble from in-memory parameters. Each layer needs
    /// [`CONTROL_POINTS`] weight sets with matching shapes.
    pub fn new(
        x_mean: Array1<f32>,
        x_std: Array1<f32>,
        y_mean: Array1<f32>,
        y_std: Array1<f32>,
        layers: Vec<Vec<LayerWeights>>,
    ) -> Result<Self> {
        if layers.is_empty() {
            bail!("network has no layers");
        }
        if x_mean.len() != x_std.len() || y_mean.len() != y_std.len() {
            bail!("normalization vectors differ in length");
        }
        let mut width = x_mean.len();
        for (l, points) in layers.iter().enumerate() {
            if points.len() != CONTROL_POINTS {
                bail!("layer {} has {} control points, expected {}", l, points.len(), CONTROL_POINTS);
            }
            let (rows, cols) = points[0].weights.dim();
            if cols != width {
                bail!("layer {} expects {} inputs, previous width is {}", l, cols, width);
            }
            if points
                .iter()
                .any(|p| p.weights.dim() != (rows, cols) || p.bias.len() != rows)
            {
                bail!("layer {} control points differ in shape", l);
            }
            width = rows;
        }
        if width != y_mean.len() {
            bail!("last layer has {} outputs, normalization has {}", width, y_mean.len());
        }
        Ok(Self {
            x_mean,
            x_std,
            y_mean,
            y_std,
            layers,
        })
    }

    /// Load the weight files of a network with `input_size` inputs,
    /// `output_size` outputs and hidden layers of `hidden` units.
    pub fn load(dir: &Path, input_size: usize, output_size: usize, hidden: usize) -> Result<Self> {
        let x_mean = read_vector(&dir.join("Xmean.bin"), input_size)?;
        let x_std = read_vector(&dir.join("Xstd.bin"), input_size)?;
        let y_mean = read_vector(&dir.join("Ymean.bin"), output_size)?;
        let y_std = read_vector(&dir.join("Ystd.bin"), output_size)?;

        let shapes = [(hidden, input_size), (hidden, hidden), (output_size, hidden)];
        let mut layers = Vec::with_capacity(LAYERS);
        for (l, &(rows, cols)) in shapes.iter().enumerate() {
            let mut points = Vec::with_capacity(CONTROL_POINTS);
            for k in 0..CONTROL_POINTS {
                let index = (k as f64 * PHASE_TABLE / CONTROL_POINTS as f64) as usize;
                let weights = read_vector(&dir.join(format!("W{l}_{index:03}.bin")), rows * cols)?
                    .into_shape_with_order((rows, cols))
                    .context("Failed to shape weight matrix")?;
                let bias = read_vector(&dir.join(format!("b{l}_{index:03}.bin")), rows)?;
                points.push(LayerWeights { weights, bias });
            }
            layers.push(points);
        }

        let network = Self::new(x_mean, x_std, y_mean, y_std, layers)?;
        tracing::info!(
            "Loaded phase-functioned network from {} ({} -> {} -> {})",
            dir.display(),
            input_size,
            hidden,
            output_size
        );
        Ok(network)
    }

    /// Evaluate at `phase` (radians).
    pub fn forward(&self, input: &[f64], phase: f64) -> Result<Vec<f64>> {
        if input.len() != self.x_mean.len() {
            bail!("expected {} inputs, got {}", self.x_mean.len(), input.len());
        }
        let (indices, mu) = control_indices(phase);

        let mut x: Array1<f32> = input
            .iter()
            .zip(self.x_mean.iter().zip(self.x_std.iter()))
            .map(|(&v, (&m, &s))| standardize(v as f32, m, s))
            .collect();

        let last = self.layers.len() - 1;
        for (l, points) in self.layers.iter().enumerate() {
            let weights = cubic(indices.map(|i| &points[i].weights), mu);
            let bias = cubic(indices.map(|i| &points[i].bias), mu);
            x = weights.dot(&x) + bias;
            if l < last {
                x.mapv_inplace(elu);
            }
        }

        Ok(x.iter()
            .zip(self.y_mean.iter().zip(self.y_std.iter()))
            .map(|(&v, (&m, &s))| (v * s + m) as f64)
            .collect())
    }
}

impl MotionNetwork for PhaseFunctionedNetwork {
    fn predict(&mut self, input: &[f64], phase: f64) -> Result<Vec<f64>> {
        self.forward(input, phase)
    }

    fn input_size(&self) -> usize {
        self.x_mean.len()
    }

    fn output_size(&self) -> usize {
        self.y_mean.len()
    }
}

#[inline]
fn standardize(value: f32, mean: f32, std: f32) -> f32 {
    if std != 0.0 {
        (value - mean) / std
    } else {
        value - mean
    }
}

#[inline]
fn elu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        x.exp() - 1.0
    }
}

/// Control points around `phase` and the blend position between the middle two.
fn control_indices(phase: f64) -> ([usize; 4], f32) {
    let scaled = phase.rem_euclid(TAU) / TAU * CONTROL_POINTS as f64;
    let i1 = (scaled.floor() as usize) % CONTROL_POINTS;
    let mu = (scaled - scaled.floor()) as f32;
    let n = CONTROL_POINTS;
    ([(i1 + n - 1) % n, i1, (i1 + 1) % n, (i1 + 2) % n], mu)
}

/// Catmull-Rom spline through `points[1]` (`mu = 0`) and `points[2]` (`mu = 1`).
fn cubic<D: Dimension>(points: [&Array<f32, D>; 4], mu: f32) -> Array<f32, D> {
    let (mu2, mu3) = (mu * mu, mu * mu * mu);
    let weights = [
        -0.5 * mu3 + mu2 - 0.5 * mu,
        1.5 * mu3 - 2.5 * mu2 + 1.0,
        -1.5 * mu3 + 2.0 * mu2 + 0.5 * mu,
        0.5 * mu3 - 0.5 * mu2,
    ];
    let mut out = Array::zeros(points[0].raw_dim());
    for (point, weight) in points.into_iter().zip(weights) {
        out.scaled_add(weight, point);
    }
    out
}

fn read_vector(path: &Path, len: usize) -> Result<Array1<f32>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let expected = (len * 4) as u64;
    let actual = file
        .metadata()
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    if actual != expected {
        bail!(
            "{} holds {} bytes, expected {} ({} floats)",
            path.display(),
            actual,
            expected,
            len
        );
    }
    let mut values = vec![0.0f32; len];
    BufReader::new(file)
        .read_f32_into::<LittleEndian>(&mut values)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Array1::from(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::f64::consts::PI;
    use std::io::Write;

    /// Identity-sized 2→2→2→2 network whose last bias equals the control
    /// point index.
    fn tiny() -> PhaseFunctionedNetwork {
        let layer = |bias: f32| LayerWeights {
            weights: Array2::eye(2),
            bias: Array1::from(vec![bias, bias]),
        };
        let layers = vec![
            (0..4).map(|_| layer(0.0)).collect(),
            (0..4).map(|_| layer(0.0)).collect(),
            (0..4).map(|k| layer(k as f32)).collect(),
        ];
        PhaseFunctionedNetwork::new(
            Array1::zeros(2),
            Array1::ones(2),
            Array1::zeros(2),
            Array1::ones(2),
            layers,
        )
        .unwrap()
    }

    #[test]
    fn test_control_indices_wrap() {
        assert_eq!(control_indices(0.0), ([3, 0, 1, 2], 0.0));
        let (indices, mu) = control_indices(1.75 * PI);
        assert_eq!(indices, [2, 3, 0, 1]);
        assert!((mu - 0.5).abs() < 1e-6);
        assert_eq!(control_indices(-0.25 * PI).0, control_indices(1.75 * PI).0);
    }

    #[test]
    fn test_forward_hits_control_points() {
        let network = tiny();
        let out = network.forward(&[1.0, 2.0], 0.5 * PI).unwrap();
        assert!((out[0] - 2.0).abs() < 1e-6);
        assert!((out[1] - 3.0).abs() < 1e-6);
        assert!(network.forward(&[1.0], 0.0).is_err());
    }

    #[test]
    fn test_elu_hidden_layers() {
        let network = tiny();
        let out = network.forward(&[-1.0, 0.0], 0.0).unwrap();
        let hidden = (-1.0f64).exp() - 1.0;
        assert!((out[0] - (hidden.exp() - 1.0)).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, values: &[f32]| {
            let mut file = File::create(dir.path().join(name)).unwrap();
            for &v in values {
                file.write_f32::<LittleEndian>(v).unwrap();
            }
            file.flush().unwrap();
        };
        write("Xmean.bin", &[0.0; 3]);
        write("Xstd.bin", &[1.0; 3]);
        write("Ymean.bin", &[0.5]);
        write("Ystd.bin", &[2.0]);
        for index in ["000", "012", "025", "037"] {
            write(&format!("W0_{index}.bin"), &[1.0; 6]);
            write(&format!("b0_{index}.bin"), &[0.0; 2]);
            write(&format!("W1_{index}.bin"), &[1.0, 0.0, 0.0, 1.0]);
            write(&format!("b1_{index}.bin"), &[0.0; 2]);
            write(&format!("W2_{index}.bin"), &[1.0, 1.0]);
            write(&format!("b2_{index}.bin"), &[0.0]);
        }

        let mut network = PhaseFunctionedNetwork::load(dir.path(), 3, 1, 2).unwrap();
        assert_eq!(network.input_size(), 3);
        assert_eq!(network.output_size(), 1);
        let out = network.predict(&[1.0, 1.0, 1.0], 1.0).unwrap();
        // hidden = [3, 3], output = 6, restored = 6 * 2 + 0.5
        assert!((out[0] - 12.5).abs() < 1e-5);

        assert!(PhaseFunctionedNetwork::load(dir.path(), 4, 1, 2).is_err());
    }
}
