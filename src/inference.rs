//! ONNX network inference: runs an exported phase-functioned network.
//!
//! Uses the `ort` crate (ONNX Runtime bindings for Rust). When the model
//! declares two inputs, the phase goes in as its own `[1, 1]` tensor;
//! otherwise it is appended to the feature vector.

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use crate::network::MotionNetwork;

/// ONNX wrapper for the motion network.
pub struct OnnxNetwork {
    session: Session,
    input_name: String,
    /// Second model input carrying the phase, if declared.
    phase_name: Option<String>,
    input_size: usize,
    output_size: usize,
}

impl OnnxNetwork {
    /// Load an ONNX model from disk. Tensor sizes come from the layout the
    /// runtime expects; ONNX shapes are often symbolic.
    pub fn load(model_path: &Path, input_size: usize, output_size: usize) -> Result<Self> {
        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let inputs = session.inputs();
        if inputs.is_empty() {
            bail!("ONNX model {} declares no inputs", model_path.display());
        }
        let input_name = inputs[0].name().to_string();
        let phase_name = inputs.get(1).map(|input| input.name().to_string());

        tracing::info!(
            "Loaded ONNX network from {} (input: {}, phase: {})",
            model_path.display(),
            input_name,
            phase_name.as_deref().unwrap_or("appended")
        );

        Ok(Self {
            session,
            input_name,
            phase_name,
            input_size,
            output_size,
        })
    }

    /// Run a forward pass: feature vector and phase in, output vector out.
    pub fn infer(&mut self, input: &[f64], phase: f64) -> Result<Vec<f64>> {
        let mut features: Vec<f32> = input.iter().map(|&x| x as f32).collect();
        if self.phase_name.is_none() {
            features.push(phase as f32);
        }
        let len = features.len();
        let features = Array2::from_shape_vec((1, len), features)
            .context("Failed to create input array")?;
        let features = Tensor::from_array(features).context("Failed to create input tensor")?;

        let outputs = match &self.phase_name {
            Some(phase_name) => {
                let phase = Array2::from_shape_vec((1, 1), vec![phase as f32])
                    .context("Failed to create phase array")?;
                let phase = Tensor::from_array(phase).context("Failed to create phase tensor")?;
                self.session
                    .run(ort::inputs![&self.input_name => features, phase_name => phase])
                    .context("ONNX inference failed")?
            }
            None => self
                .session
                .run(ort::inputs![&self.input_name => features])
                .context("ONNX inference failed")?,
        };

        let (_, output_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;

        let output: Vec<f64> = output_data.iter().map(|&x| x as f64).collect();
        if output.len() != self.output_size {
            bail!(
                "ONNX model produced {} outputs, expected {}",
                output.len(),
                self.output_size
            );
        }
        Ok(output)
    }
}

impl MotionNetwork for OnnxNetwork {
    fn predict(&mut self, input: &[f64], phase: f64) -> Result<Vec<f64>> {
        self.infer(input, phase)
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn output_size(&self) -> usize {
        self.output_size
    }
}

/// Benchmark inference latency of any motion network (useful for verifying
/// the tick stays real-time).
pub fn benchmark(
    network: &mut dyn MotionNetwork,
    iterations: usize,
) -> Result<std::time::Duration> {
    let iterations = iterations.max(1);
    let dummy_input: Vec<f64> = vec![0.0; network.input_size()];
    let start = std::time::Instant::now();

    for i in 0..iterations {
        let phase = (i as f64 / iterations as f64) * std::f64::consts::TAU;
        network.predict(&dummy_input, phase)?;
    }

    let elapsed = start.elapsed();
    let avg = elapsed / iterations as u32;
    tracing::info!(
        "Inference benchmark: {} iterations, avg {:.2}ms ({:.0} Hz)",
        iterations,
        avg.as_secs_f64() * 1000.0,
        1.0 / avg.as_secs_f64().max(f64::EPSILON)
    );

    Ok(avg)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        calls: usize,
    }

    impl MotionNetwork for Echo {
        fn predict(&mut self, input: &[f64], _phase: f64) -> Result<Vec<f64>> {
            self.calls += 1;
            Ok(input.to_vec())
        }

        fn input_size(&self) -> usize {
            3
        }

        fn output_size(&self) -> usize {
            3
        }
    }

    #[test]
    fn test_benchmark_runs_every_iteration() {
        let mut network = Echo { calls: 0 };
        benchmark(&mut network, 25).unwrap();
        assert_eq!(network.calls, 25);
    }
}
