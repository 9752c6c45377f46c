//! Linear-sinusoidal oscillator used to fit phase cycles.
//!
//! `f(x) = a·sin(b·x − c) + d + e·x` where the genes are
//! `[amplitude, frequency, shift, offset, slope]`.

/// Number of oscillator parameters.
pub const GENE_COUNT: usize = 5;

/// Oscillator parameters `[amplitude, frequency, shift, offset, slope]`.
pub type OscillatorGenes = [f64; GENE_COUNT];

pub const AMPLITUDE: usize = 0;
pub const FREQUENCY: usize = 1;
pub const SHIFT: usize = 2;
pub const OFFSET: usize = 3;
pub const SLOPE: usize = 4;

/// Oscillator value at `x`.
#[inline]
pub fn value(genes: &OscillatorGenes, x: f64) -> f64 {
    let [a, b, c, d, e] = *genes;
    a * (b * x - c).sin() + d + e * x
}

/// First derivative with respect to `x`.
#[inline]
pub fn d1(genes: &OscillatorGenes, x: f64) -> f64 {
    let [a, b, c, _, e] = *genes;
    a * b * (b * x - c).cos() + e
}

/// Second derivative with respect to `x`.
#[inline]
pub fn d2(genes: &OscillatorGenes, x: f64) -> f64 {
    let [a, b, c, _, _] = *genes;
    -a * b * b * (b * x - c).sin()
}

/// Third derivative with respect to `x`.
#[inline]
pub fn d3(genes: &OscillatorGenes, x: f64) -> f64 {
    let [a, b, c, _, _] = *genes;
    -a * b * b * b * (b * x - c).cos()
}

/// Derivative order selector for window phenotypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivative {
    Value,
    First,
    Second,
    Third,
}

impl Derivative {
    #[inline]
    pub fn eval(self, genes: &OscillatorGenes, x: f64) -> f64 {
        match self {
            Derivative::Value => value(genes, x),
            Derivative::First => d1(genes, x),
            Derivative::Second => d2(genes, x),
            Derivative::Third => d3(genes, x),
        }
    }
}

/// Window phenotype: the oscillator evaluated at `frame · frame_time`, with the
/// offset reduced by the slope accumulated since the window started.
#[inline]
pub fn phenotype(
    genes: &OscillatorGenes,
    frame: usize,
    window_start: usize,
    frame_time: f64,
    order: Derivative,
) -> f64 {
    let elapsed = frame as f64 - window_start as f64;
    let mut shifted = *genes;
    shifted[OFFSET] = genes[OFFSET] - elapsed * genes[SLOPE] * frame_time;
    order.eval(&shifted, frame as f64 * frame_time)
}
