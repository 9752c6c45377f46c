//! Background optimizer thread.
//!
//! Evolves a [`PhaseEvolution`] until told to stop, publishing the latest
//! fitted cycle after every generation. The main thread polls snapshots
//! without blocking and takes the optimizer back when it stops the worker.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CycleAssignment, PhaseEvolution};

/// State published after a generation.
#[derive(Debug, Clone)]
pub struct EvolutionSnapshot {
    pub generation: usize,
    pub fitness: f64,
    pub assignment: CycleAssignment,
}

/// Optimizer running in a background thread.
pub struct OptimizerWorker {
    receiver: Receiver<EvolutionSnapshot>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<PhaseEvolution>>,
    last_snapshot: Option<EvolutionSnapshot>,
}

impl OptimizerWorker {
    /// Start evolving. `pause` throttles the loop between generations
    /// (zero runs flat out).
    pub fn spawn(evolution: PhaseEvolution, pause: Duration) -> Self {
        let (data_tx, data_rx) = bounded::<EvolutionSnapshot>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || optimizer_worker(evolution, data_tx, stop_rx, pause));

        Self {
            receiver: data_rx,
            stop_tx,
            handle: Some(handle),
            last_snapshot: None,
        }
    }

    /// Latest published snapshot (non-blocking).
    pub fn latest(&mut self) -> Option<&EvolutionSnapshot> {
        if let Ok(snapshot) = self.receiver.try_recv() {
            self.last_snapshot = Some(snapshot);
        }
        self.last_snapshot.as_ref()
    }

    /// Signal the background thread to stop.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Stop the worker and take the optimizer back.
    pub fn finish(mut self) -> anyhow::Result<PhaseEvolution> {
        self.stop();
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow::anyhow!("optimizer worker already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("optimizer worker panicked"))
    }
}

impl Drop for OptimizerWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background loop: one generation per iteration, latest snapshot wins.
fn optimizer_worker(
    mut evolution: PhaseEvolution,
    data_tx: Sender<EvolutionSnapshot>,
    stop_rx: Receiver<()>,
    pause: Duration,
) -> PhaseEvolution {
    tracing::info!("Optimizer worker thread started");

    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }

        evolution.step();

        let snapshot = EvolutionSnapshot {
            generation: evolution.generation(),
            fitness: evolution.fitness(),
            assignment: evolution.cycle(),
        };

        match data_tx.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Receiver hasn't consumed the previous snapshot yet; the next
                // generation publishes a fresher one.
            }
            Err(TrySendError::Disconnected(_)) => break,
        }

        if !pause.is_zero() {
            spin_sleep::sleep(pause);
        }
    }

    tracing::info!(
        "Optimizer worker thread exiting after {} generations (fitness {:.6})",
        evolution.generation(),
        evolution.fitness()
    );
    evolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvolutionConfig;
    use crate::evolution::Signal;
    use std::time::Instant;

    #[test]
    fn test_worker_publishes_and_stops() {
        let own: Vec<f64> = (0..60).map(|f| (f as f64 * 0.2).sin().abs()).collect();
        let signal = Signal::new(own.clone(), own, 1.0 / 60.0).unwrap();
        let config = EvolutionConfig {
            population_size: 10,
            ..EvolutionConfig::default()
        };
        let evolution = PhaseEvolution::new(signal, &config).unwrap();
        let mut worker = OptimizerWorker::spawn(evolution, Duration::from_millis(1));

        let deadline = Instant::now() + Duration::from_secs(10);
        while worker.latest().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let snapshot = worker.latest().cloned().unwrap();
        assert!(snapshot.generation >= 1);
        assert_eq!(snapshot.assignment.cycle.len(), 60);

        let evolution = worker.finish().unwrap();
        assert!(evolution.generation() >= snapshot.generation);
    }
}
