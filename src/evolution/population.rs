//! One window's population of oscillator candidates.
//!
//! Individuals are kept sorted by ascending fitness, so index 0 is always the
//! winner. Each population owns its random source.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::oscillator::{phenotype, Derivative, OscillatorGenes, GENE_COUNT, OFFSET, SHIFT};

use super::{Bounds, Interval, Signal};

/// A candidate oscillator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub genes: OscillatorGenes,
    pub momentum: OscillatorGenes,
    pub fitness: f64,
    pub extinction: f64,
}

impl Default for Individual {
    fn default() -> Self {
        Self {
            genes: [0.0; GENE_COUNT],
            momentum: [0.0; GENE_COUNT],
            fitness: 0.0,
            extinction: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Population {
    interval: Interval,
    pub(crate) active: bool,
    individuals: Vec<Individual>,
    /// Selection weight per rank, `∝ size − rank`.
    rank_weights: Vec<f64>,
    rng: StdRng,
}

impl Population {
    /// Seed: random genes, evaluated, sorted and graded.
    pub fn new(interval: Interval, size: usize, bounds: &Bounds, signal: &Signal, mut rng: StdRng) -> Self {
        let rank_sum = (size * (size + 1)) as f64 / 2.0;
        let rank_weights = (0..size).map(|i| (size - i) as f64 / rank_sum).collect();

        let mut individuals = Vec::with_capacity(size);
        for _ in 0..size {
            let mut individual = Individual::default();
            reroll(&mut individual, bounds, &mut rng);
            individual.fitness = fitness(&individual.genes, &interval, signal);
            individuals.push(individual);
        }

        let mut population = Self {
            interval,
            active: false,
            individuals,
            rank_weights,
            rng,
        };
        sort_and_grade(&mut population.individuals);
        population
    }

    #[inline]
    pub fn interval(&self) -> Interval {
        self.interval
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    /// Best individual.
    pub fn winner(&self) -> &Individual {
        &self.individuals[0]
    }

    pub fn fitness(&self) -> f64 {
        self.winner().fitness
    }

    /// Window phenotype of `genes` at `frame`.
    #[inline]
    pub fn phenotype(&self, genes: &OscillatorGenes, frame: usize, frame_time: f64, order: Derivative) -> f64 {
        phenotype(genes, frame, self.interval.start, frame_time, order)
    }

    /// One generation.
    ///
    /// `pivots` are the winners of the nearest active populations before and
    /// after this one, snapshotted before the generation started.
    pub fn evolve(
        &mut self,
        bounds: &Bounds,
        behaviour: f64,
        signal: &Signal,
        pivots: (&OscillatorGenes, &OscillatorGenes),
    ) {
        if !self.active {
            self.passthrough(pivots);
            return;
        }

        let size = self.individuals.len();
        let mut offspring = Vec::with_capacity(size);

        let mut elite = self.individuals[0].clone();
        bounds.clamp(&mut elite.genes);
        self.exploit(&mut elite, bounds, signal);
        offspring.push(elite);

        for _ in 1..size {
            let mut child = Individual::default();
            if self.rng.gen::<f64>() <= behaviour {
                self.recombine(&mut child, bounds);
            } else {
                reroll(&mut child, bounds, &mut self.rng);
            }
            offspring.push(child);
        }

        for individual in &mut offspring {
            individual.fitness = fitness(&individual.genes, &self.interval, signal);
        }
        sort_and_grade(&mut offspring);
        self.individuals = offspring;
    }

    /// Low-motion window: neutral genes continuing the neighbouring fits.
    fn passthrough(&mut self, (previous, next): (&OscillatorGenes, &OscillatorGenes)) {
        let shift = 0.5 * (previous[SHIFT] + next[SHIFT]);
        let offset = 0.5 * (previous[OFFSET] + next[OFFSET]);
        for individual in &mut self.individuals {
            individual.genes = [1.0, 1.0, shift, offset, 0.0];
            individual.momentum = [0.0; GENE_COUNT];
            individual.fitness = 0.0;
            individual.extinction = 0.0;
        }
    }

    /// Memetic hill climb: probe each gene up and down by a fitness-scaled step.
    fn exploit(&mut self, individual: &mut Individual, bounds: &Bounds, signal: &Signal) {
        individual.fitness = fitness(&individual.genes, &self.interval, signal);
        for i in 0..GENE_COUNT {
            let gene = individual.genes[i];
            let span = bounds.span(i);

            let up = bounds.clamp_gene(i, gene + self.rng.gen::<f64>() * individual.fitness * span);
            individual.genes[i] = up;
            let up_fitness = fitness(&individual.genes, &self.interval, signal);

            let down = bounds.clamp_gene(i, gene - self.rng.gen::<f64>() * individual.fitness * span);
            individual.genes[i] = down;
            let down_fitness = fitness(&individual.genes, &self.interval, signal);

            individual.genes[i] = gene;
            if up_fitness < individual.fitness {
                individual.genes[i] = up;
                individual.momentum[i] = up - gene;
                individual.fitness = up_fitness;
            }
            if down_fitness < individual.fitness {
                individual.genes[i] = down;
                individual.momentum[i] = down - gene;
                individual.fitness = down_fitness;
            }
        }
    }

    /// Crossover of two rank-selected parents with mutation and adoption
    /// toward a third (prototype) individual.
    fn recombine(&mut self, child: &mut Individual, bounds: &Bounds) {
        let a = self.select();
        let mut b = self.select();
        while b == a {
            b = self.select();
        }
        let mut p = self.select();
        while p == a || p == b {
            p = self.select();
        }
        let (parent_a, parent_b, prototype) = (
            self.individuals[a].clone(),
            self.individuals[b].clone(),
            self.individuals[p].clone(),
        );

        let extinction = 0.5 * (parent_a.extinction + parent_b.extinction);
        let inverse = 1.0 / GENE_COUNT as f64;
        let mutation_rate = extinction * (1.0 - inverse) + inverse;
        let mutation_strength = extinction;

        for i in 0..GENE_COUNT {
            let rng = &mut self.rng;
            let momentum = rng.gen::<f64>() * parent_a.momentum[i] + rng.gen::<f64>() * parent_b.momentum[i];
            child.genes[i] = if rng.gen::<f64>() < 0.5 {
                parent_a.genes[i] + momentum
            } else {
                parent_b.genes[i] + momentum
            };
            let gene = child.genes[i];

            if rng.gen::<f64>() <= mutation_rate {
                let reach = mutation_strength * bounds.span(i);
                if reach > 0.0 {
                    child.genes[i] += rng.gen_range(-reach..reach);
                }
            }

            let weight = rng.gen::<f64>();
            let mean = 0.5 * (parent_a.genes[i] + parent_b.genes[i]);
            child.genes[i] += weight * rng.gen::<f64>() * (mean - child.genes[i])
                + (1.0 - weight) * rng.gen::<f64>() * (prototype.genes[i] - child.genes[i]);

            child.genes[i] = bounds.clamp_gene(i, child.genes[i]);
            child.momentum[i] = rng.gen::<f64>() * momentum + (child.genes[i] - gene);
        }
    }

    /// Rank roulette: better ranks are drawn more often.
    fn select(&mut self) -> usize {
        let mut remaining = self.rng.gen::<f64>();
        for (i, weight) in self.rank_weights.iter().enumerate() {
            remaining -= weight;
            if remaining <= 0.0 {
                return i;
            }
        }
        self.rank_weights.len() - 1
    }
}

fn reroll(individual: &mut Individual, bounds: &Bounds, rng: &mut StdRng) {
    for i in 0..GENE_COUNT {
        individual.genes[i] = rng.gen_range(bounds.lower[i]..=bounds.upper[i]);
    }
}

/// Multi-objective RMSE against the own signal and the negated paired signal.
pub(crate) fn fitness(genes: &OscillatorGenes, interval: &Interval, signal: &Signal) -> f64 {
    let mut sum = 0.0;
    for frame in interval.start..=interval.end {
        let y1 = signal.own[frame];
        let y2 = signal.paired[frame];
        let x = phenotype(genes, frame, interval.start, signal.frame_time, Derivative::Value);
        let error = (y1 - x).powi(2) + (-y2 - x).powi(2);
        sum += error * error;
    }
    (sum / interval.len() as f64).sqrt()
}

/// Sort ascending by fitness and assign extinction pressure per rank.
fn sort_and_grade(individuals: &mut [Individual]) {
    individuals.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
    let size = individuals.len();
    if size == 0 {
        return;
    }
    let min = individuals[0].fitness;
    let max = individuals[size - 1].fitness;
    let denominator = (size.max(2) - 1) as f64;
    for (i, individual) in individuals.iter_mut().enumerate() {
        let grading = i as f64 / denominator;
        individual.extinction = if max > 0.0 {
            ((individual.fitness + min * (grading - 1.0)) / max).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}
