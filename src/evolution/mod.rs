//! Evolutionary phase fitting.
//!
//! The clip is cut into consecutive windows; each window evolves a population
//! of oscillators against the measured joint speed curve of one phase function
//! (and the negated curve of its mirrored partner). Blending the window winners
//! yields a smooth cycle whose second-derivative zero crossings become
//! keyframes.

pub mod population;
pub mod worker;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::EvolutionConfig;
use crate::error::{MotionError, Result};
use crate::math::normalise;
use crate::oscillator::{Derivative, OscillatorGenes, GENE_COUNT};
use crate::phase::{PhasePair, Side};

pub use population::{Individual, Population};

/// Inclusive frame range of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    #[inline]
    pub fn contains(&self, frame: usize) -> bool {
        (self.start..=self.end).contains(&frame)
    }
}

/// Consecutive windows of `round(window / frame_time)` frames covering
/// `frames`. A trailing single frame joins the previous window.
pub fn windows(frames: usize, frame_time: f64, window: f64) -> Vec<Interval> {
    if frames == 0 {
        return Vec::new();
    }
    let size = ((window / frame_time).round() as usize).max(1);
    let mut intervals = Vec::new();
    let mut start = 0;
    while start < frames {
        let end = (start + size - 1).min(frames - 1);
        intervals.push(Interval::new(start, end));
        start = end + 1;
    }
    if intervals.len() > 1 {
        let tail = intervals[intervals.len() - 1];
        if tail.len() < 2 {
            intervals.pop();
            if let Some(last) = intervals.last_mut() {
                last.end = tail.end;
            }
        }
    }
    intervals
}

/// Gene bounds per dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: OscillatorGenes,
    pub upper: OscillatorGenes,
}

impl Bounds {
    pub fn from_config(config: &EvolutionConfig) -> Self {
        Self {
            lower: config.lower_bounds(),
            upper: config.upper_bounds(),
        }
    }

    #[inline]
    pub fn span(&self, gene: usize) -> f64 {
        self.upper[gene] - self.lower[gene]
    }

    #[inline]
    pub fn clamp_gene(&self, gene: usize, value: f64) -> f64 {
        value.clamp(self.lower[gene], self.upper[gene])
    }

    pub fn clamp(&self, genes: &mut OscillatorGenes) {
        for (i, g) in genes.iter_mut().enumerate() {
            *g = self.clamp_gene(i, *g);
        }
    }
}

/// Measured curves the oscillators are fitted to.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Speed curve of the function being fitted.
    pub own: Vec<f64>,
    /// Speed curve of its mirrored partner.
    pub paired: Vec<f64>,
    pub frame_time: f64,
}

impl Signal {
    pub fn new(own: Vec<f64>, paired: Vec<f64>, frame_time: f64) -> Result<Self> {
        if own.len() != paired.len() {
            return Err(MotionError::invalid_input(format!(
                "signal lengths differ ({} vs {})",
                own.len(),
                paired.len()
            )));
        }
        if own.is_empty() {
            return Err(MotionError::invalid_input("signal is empty"));
        }
        Ok(Self {
            own,
            paired,
            frame_time,
        })
    }

    pub fn from_pair(pair: &PhasePair, side: Side, frame_time: f64) -> Result<Self> {
        let (own, paired) = pair.signal(side);
        Self::new(own, paired, frame_time)
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.own.len()
    }

    /// A window takes part in the search only when there is motion in it.
    pub fn is_active(&self, interval: &Interval) -> bool {
        if interval.len() < 2 {
            return false;
        }
        let motion: f64 = (interval.start..=interval.end)
            .map(|f| self.own[f].abs() + self.paired[f].abs())
            .sum();
        motion / interval.len() as f64 > 0.0
    }
}

/// Result of [`PhaseEvolution::assign`] for one phase function.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleAssignment {
    pub cycle: Vec<f64>,
    pub normalized_cycle: Vec<f64>,
    pub keys: Vec<bool>,
}

/// The optimizer for one phase function of a clip.
#[derive(Debug, Clone)]
pub struct PhaseEvolution {
    config: EvolutionConfig,
    bounds: Bounds,
    signal: Signal,
    populations: Vec<Population>,
    generation: usize,
}

impl PhaseEvolution {
    pub fn new(signal: Signal, config: &EvolutionConfig) -> Result<Self> {
        if config.population_size < 4 {
            return Err(MotionError::invalid_config(
                "evolution.population_size must be at least 4",
            ));
        }
        let bounds = Bounds::from_config(config);
        let populations = windows(signal.frames(), signal.frame_time, config.window)
            .into_iter()
            .enumerate()
            .map(|(i, interval)| {
                let rng = StdRng::seed_from_u64(population_seed(config.seed, i));
                Population::new(interval, config.population_size, &bounds, &signal, rng)
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "Phase evolution: {} frames in {} windows of {:.2}s, {} individuals each",
            signal.frames(),
            populations.len(),
            config.window,
            config.population_size
        );

        Ok(Self {
            config: config.clone(),
            bounds,
            signal,
            populations,
            generation: 0,
        })
    }

    /// Optimizer for one side of a phase pair.
    pub fn for_pair(pair: &PhasePair, side: Side, config: &EvolutionConfig) -> Result<Self> {
        let frame_time = pair.function(side).frame_time();
        Self::new(Signal::from_pair(pair, side, frame_time)?, config)
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Swap in a re-measured signal, keeping the evolved populations.
    pub fn set_signal(&mut self, signal: Signal) -> Result<()> {
        if signal.frames() != self.signal.frames() {
            return Err(MotionError::invalid_input(format!(
                "signal has {} frames, optimizer expects {}",
                signal.frames(),
                self.signal.frames()
            )));
        }
        self.signal = signal;
        Ok(())
    }

    /// Refresh activity flags and snapshot every window's pivot winners.
    fn prepare(&mut self) -> Vec<(OscillatorGenes, OscillatorGenes)> {
        for population in &mut self.populations {
            population.active = self.signal.is_active(&population.interval());
        }
        let winners: Vec<OscillatorGenes> =
            self.populations.iter().map(|p| p.winner().genes).collect();
        let last = self.populations.len().saturating_sub(1);
        (0..self.populations.len())
            .map(|i| {
                let previous = (0..i)
                    .rev()
                    .find(|&j| self.populations[j].active)
                    .unwrap_or(0);
                let next = (i + 1..self.populations.len())
                    .find(|&j| self.populations[j].active)
                    .unwrap_or(last);
                (winners[previous], winners[next])
            })
            .collect()
    }

    /// One generation over every window, sequentially.
    pub fn optimise(&mut self) {
        let pivots = self.prepare();
        for (population, (previous, next)) in self.populations.iter_mut().zip(&pivots) {
            population.evolve(&self.bounds, self.config.behaviour, &self.signal, (previous, next));
        }
        self.finish_generation();
    }

    /// One generation with the windows evolved on scoped threads.
    pub fn optimise_parallel(&mut self) {
        let pivots = self.prepare();
        let (bounds, signal, behaviour) = (&self.bounds, &self.signal, self.config.behaviour);
        std::thread::scope(|scope| {
            for (population, (previous, next)) in self.populations.iter_mut().zip(&pivots) {
                scope.spawn(move || population.evolve(bounds, behaviour, signal, (previous, next)));
            }
        });
        self.finish_generation();
    }

    /// Run one generation in the configured mode.
    pub fn step(&mut self) {
        if self.config.parallel {
            self.optimise_parallel();
        } else {
            self.optimise();
        }
    }

    fn finish_generation(&mut self) {
        self.generation += 1;
        tracing::trace!(
            "Generation {}: mean fitness {:.6}",
            self.generation,
            self.fitness()
        );
    }

    /// Mean winner fitness over all windows.
    pub fn fitness(&self) -> f64 {
        if self.populations.is_empty() {
            return 0.0;
        }
        self.populations.iter().map(Population::fitness).sum::<f64>() / self.populations.len() as f64
    }

    /// Largest absolute winner gene per dimension.
    pub fn peak_configuration(&self) -> OscillatorGenes {
        let mut peak = [f64::MIN; GENE_COUNT];
        for population in &self.populations {
            for (p, g) in peak.iter_mut().zip(population.winner().genes.iter()) {
                *p = p.max(g.abs());
            }
        }
        peak
    }

    /// Winner phenotype of window `index` at `frame`, blended with the
    /// neighbouring window near the window edges.
    pub fn interpolate(&self, index: usize, frame: usize, order: Derivative) -> f64 {
        let last = self.populations.len() - 1;
        let index = index.min(last);
        let frame_time = self.signal.frame_time;
        let evaluate = |i: usize| {
            let p = &self.populations[i];
            p.phenotype(&p.winner().genes, frame, frame_time, order)
        };

        let current = &self.populations[index];
        let interval = current.interval();
        let mut value = evaluate(index);
        if interval.len() < 2 {
            return value;
        }

        let pivot = (frame as f64 - interval.start as f64) / (interval.len() - 1) as f64 - 0.5;
        let threshold = 0.5 * (1.0 - self.config.blending);
        if pivot < -threshold {
            let blend = 0.5 * (pivot + threshold) / (-0.5 + threshold);
            value = (1.0 - blend) * value + blend * evaluate(index.saturating_sub(1));
        }
        if pivot > threshold {
            let blend = 0.5 * (pivot - threshold) / (0.5 - threshold);
            value = (1.0 - blend) * value + blend * evaluate((index + 1).min(last));
        }
        value
    }

    /// Blended cycle, its normalization and the keyframes where the cycle's
    /// second derivative turns from negative to positive.
    pub fn cycle(&self) -> CycleAssignment {
        let frames = self.signal.frames();
        let mut cycle = vec![0.0; frames];
        let mut keys = vec![false; frames];
        for (index, population) in self.populations.iter().enumerate() {
            let interval = population.interval();
            for frame in interval.start..=interval.end {
                cycle[frame] = self.interpolate(index, frame, Derivative::Value);
                keys[frame] = self.interpolate(index, frame, Derivative::Second) <= 0.0
                    && self.interpolate(index, frame + 1, Derivative::Second) >= 0.0;
            }
        }
        let min = cycle.iter().copied().fold(f64::MAX, f64::min);
        let max = cycle.iter().copied().fold(f64::MIN, f64::max);
        let normalized_cycle = cycle.iter().map(|&c| normalise(c, min, max, 0.0, 1.0)).collect();
        CycleAssignment {
            cycle,
            normalized_cycle,
            keys,
        }
    }

    /// Write the fitted cycle, keys and phase into `side` of `pair`.
    pub fn assign(&self, pair: &mut PhasePair, side: Side) -> Result<()> {
        let function = pair.function_mut(side);
        if function.frame_count() != self.signal.frames() {
            return Err(MotionError::invalid_input(format!(
                "phase function has {} frames, optimizer has {}",
                function.frame_count(),
                self.signal.frames()
            )));
        }
        let assignment = self.cycle();
        function.assign_keys(&assignment.keys)?;
        function.cycle = assignment.cycle;
        function.normalized_cycle = assignment.normalized_cycle;
        Ok(())
    }

    /// Window boundaries, for persisting with the annotation.
    pub fn intervals(&self) -> Vec<Interval> {
        self.populations.iter().map(Population::interval).collect()
    }
}

/// Per-window seed derived from the master seed.
fn population_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(index as u64)
        .rotate_left(17)
}
