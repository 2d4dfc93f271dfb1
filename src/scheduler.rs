//! Periodic driver for the engine: a dedicated tokio task owns the
//! engine and ticks it at a fixed cadence. Because step and reset both
//! run on that task, ticks can never overlap and reset is serialized
//! with any in-flight tick.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::debug;

use crate::{
    clock::Clock,
    engine::{Engine, EngineEvent, ResetError},
    records::DemographicRecord,
};

/// Cadence the production clock ticks at.
pub const DEFAULT_TICK_CADENCE: Duration = Duration::from_millis(1_500);

enum Command {
    Reset {
        records: Vec<DemographicRecord>,
        done: oneshot::Sender<Result<(), ResetError>>,
    },
}

/// Handle to a running scheduler. Dropping it (or calling `shutdown`)
/// stops further ticks; a tick already underway completes and its
/// event is still delivered.
pub struct SchedulerHandle<C: Clock> {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EngineEvent>,
    task: JoinHandle<Engine<C>>,
}

/// Move `engine` onto its own task and tick it every `cadence`.
///
/// `MissedTickBehavior::Delay` keeps the cadence best-effort: if a
/// tick runs long the next one is pushed back rather than burst-fired,
/// and the elapsed-time measurement inside the engine absorbs the
/// difference.
pub fn spawn<C>(mut engine: Engine<C>, cadence: Duration) -> SchedulerHandle<C>
where
    C: Clock + Send + 'static,
{
    let events = engine.event_sender();
    let (commands, mut rx) = mpsc::channel(8);
    let task = tokio::spawn(async move {
        let mut interval = time::interval(cadence);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately; swallow it so
        // the first step happens a full cadence after spawn.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    engine.step();
                }
                command = rx.recv() => match command {
                    Some(Command::Reset { records, done }) => {
                        let result = engine.reset(&records);
                        interval.reset();
                        let _ = done.send(result);
                    }
                    None => break,
                },
            }
        }
        debug!("scheduler stopped");
        engine
    });
    SchedulerHandle {
        commands,
        events,
        task,
    }
}

impl<C: Clock + Send + 'static> SchedulerHandle<C> {
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Rebuild engine state from `records` and re-arm the tick timer.
    pub async fn reset(&self, records: Vec<DemographicRecord>) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(Command::Reset { records, done })
            .await
            .map_err(|_| anyhow!("scheduler task is no longer running"))?;
        ack.await
            .context("scheduler dropped the reset acknowledgement")??;
        Ok(())
    }

    /// Stop ticking and get the engine back.
    pub async fn shutdown(self) -> Result<Engine<C>> {
        drop(self.commands);
        self.task.await.context("scheduler task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{year_boundary, ManualClock};

    fn test_records() -> Vec<DemographicRecord> {
        vec![DemographicRecord {
            id: "aa".into(),
            birth_rate: 20.0,
            death_rate: 10.0,
            population: 1_000,
            population_year: 2010,
        }]
    }

    #[tokio::test]
    async fn ticks_fire_repeatedly_at_cadence() {
        let clock = ManualClock::starting_at(year_boundary(2011));
        let mut engine = Engine::new(1, clock);
        engine.reset(&test_records()).expect("reset");
        let handle = spawn(engine, Duration::from_millis(5));
        let mut events = handle.subscribe();

        let mut steps = 0;
        while steps < 3 {
            if let Ok(EngineEvent::Step(_)) = events.recv().await {
                steps += 1;
            }
        }
        let engine = handle.shutdown().await.expect("shutdown");
        assert!(engine.is_running());
    }

    #[tokio::test]
    async fn reset_through_handle_rebuilds_state() {
        let clock = ManualClock::starting_at(year_boundary(2011));
        let engine = Engine::new(1, clock);
        let handle = spawn(engine, Duration::from_millis(5));
        let mut events = handle.subscribe();

        handle.reset(test_records()).await.expect("reset");
        // A tick can race ahead of the command; skip any early steps.
        loop {
            match events.recv().await {
                Ok(EngineEvent::Reset) => break,
                Ok(EngineEvent::Step(_)) => continue,
                Err(err) => panic!("event channel failed: {err}"),
            }
        }

        let engine = handle.shutdown().await.expect("shutdown");
        assert!(engine.country("aa").is_some());
    }

    #[tokio::test]
    async fn shutdown_stops_scheduling() {
        let clock = ManualClock::starting_at(year_boundary(2011));
        let mut engine = Engine::new(1, clock);
        engine.reset(&test_records()).expect("reset");
        let handle = spawn(engine, Duration::from_millis(5));
        let mut events = handle.subscribe();
        handle.shutdown().await.expect("shutdown");

        // Drain whatever was in flight; the channel must then close.
        loop {
            match events.recv().await {
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
