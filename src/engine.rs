use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    clock::{seconds_between, Clock, YearBoundaryCache},
    records::DemographicRecord,
};

/// Fixed 365-day year for the rate-to-per-second conversion. The
/// non-leap approximation is intentional and load-bearing: the
/// extrapolation arithmetic is specified against it.
pub const SECONDS_PER_YEAR: f64 = (60 * 60 * 24 * 365) as f64;

/// Upper bound on a single sampling sub-step, in seconds. Keeps
/// `rate * population * scale` inside [0, 1] for realistic inputs.
pub const SIMULATION_INTERVAL: f64 = 0.2;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Mutable per-country simulation state. Probabilities are fixed at
/// reset; only `population` changes between resets.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryState {
    pub population: i64,
    pub birth_prob_per_second: f64,
    pub death_prob_per_second: f64,
}

/// Countries that gained a birth / suffered a death during one tick.
/// Sets, so a country repeating across sub-steps is reported once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub births: BTreeSet<String>,
    pub deaths: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Reset,
    Step(StepOutcome),
}

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("country {id}: negative {kind} rate {rate}")]
    NegativeRate {
        id: String,
        kind: &'static str,
        rate: f64,
    },
    #[error("country {id}: negative population {population}")]
    NegativePopulation { id: String, population: i64 },
    #[error(
        "country {id}: {kind} probability {probability} per sub-step exceeds 1; \
         rates and population are inconsistent with the sub-step size"
    )]
    ProbabilityOverflow {
        id: String,
        kind: &'static str,
        probability: f64,
    },
}

/// Probability that a single country experiences one event of a kind
/// over `scale` seconds, given its per-second rate and headcount.
pub fn event_probability(prob_per_second: f64, population: i64, scale: f64) -> f64 {
    prob_per_second * population as f64 * scale
}

/// Decompose an elapsed interval into sampling sub-steps: whole
/// `SIMULATION_INTERVAL` slices followed by the (possibly shorter)
/// remainder. Zero or negative elapsed time yields no sub-steps.
pub fn substep_scales(mut elapsed: f64) -> Vec<f64> {
    let mut scales = Vec::new();
    while elapsed > SIMULATION_INTERVAL {
        elapsed -= SIMULATION_INTERVAL;
        scales.push(SIMULATION_INTERVAL);
    }
    if elapsed > 0.0 {
        scales.push(elapsed);
    }
    scales
}

/// The simulation proper: owns the country map, the clock, and the
/// random source. `reset` rebuilds everything from a fresh record set;
/// `step` advances all populations by the elapsed wall time.
pub struct Engine<C: Clock> {
    clock: C,
    rng: ChaCha8Rng,
    countries: BTreeMap<String, CountryState>,
    last_tick: Option<DateTime<Utc>>,
    events: broadcast::Sender<EngineEvent>,
}

impl<C: Clock> Engine<C> {
    pub fn new(seed: u64, clock: C) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            clock,
            rng: ChaCha8Rng::seed_from_u64(seed),
            countries: BTreeMap::new(),
            last_tick: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<EngineEvent> {
        self.events.clone()
    }

    /// True once `reset` has run at least once.
    pub fn is_running(&self) -> bool {
        self.last_tick.is_some()
    }

    pub fn country(&self, id: &str) -> Option<&CountryState> {
        self.countries.get(id)
    }

    /// Country map in id order. Iteration order is the sampling order.
    pub fn countries(&self) -> &BTreeMap<String, CountryState> {
        &self.countries
    }

    pub fn total_population(&self) -> i64 {
        self.countries.values().map(|c| c.population).sum()
    }

    /// Rebuild all state from `records` and restart the tick clock.
    ///
    /// Each record's population is projected from the end of its
    /// measurement year to "now" with a linear (non-compounding)
    /// growth-rate extrapolation, then truncated to a whole count. A
    /// measurement year in the future projects backwards; that is the
    /// same arithmetic with a negative interval.
    pub fn reset(&mut self, records: &[DemographicRecord]) -> Result<(), ResetError> {
        let now = self.clock.now();
        let mut boundaries = YearBoundaryCache::default();
        let mut countries = BTreeMap::new();
        for record in records {
            let state = Self::initial_state(record, now, &mut boundaries)?;
            countries.insert(record.id.clone(), state);
        }
        self.countries = countries;
        self.last_tick = Some(now);
        debug!(countries = self.countries.len(), "engine reset");
        let _ = self.events.send(EngineEvent::Reset);
        Ok(())
    }

    fn initial_state(
        record: &DemographicRecord,
        now: DateTime<Utc>,
        boundaries: &mut YearBoundaryCache,
    ) -> Result<CountryState, ResetError> {
        for (kind, rate) in [("birth", record.birth_rate), ("death", record.death_rate)] {
            if rate < 0.0 {
                return Err(ResetError::NegativeRate {
                    id: record.id.clone(),
                    kind,
                    rate,
                });
            }
        }
        if record.population < 0 {
            return Err(ResetError::NegativePopulation {
                id: record.id.clone(),
                population: record.population,
            });
        }

        let birth_prob = record.birth_rate / 1_000.0 / SECONDS_PER_YEAR;
        let death_prob = record.death_rate / 1_000.0 / SECONDS_PER_YEAR;
        let growth_rate = record.population as f64 * birth_prob
            - record.population as f64 * death_prob;
        let measured_at = boundaries.get(record.population_year);
        let seconds_since = seconds_between(measured_at, now);
        let population =
            (record.population as f64 + seconds_since * growth_rate).trunc() as i64;

        let state = CountryState {
            population,
            birth_prob_per_second: birth_prob,
            death_prob_per_second: death_prob,
        };
        for (kind, prob) in [
            ("birth", state.birth_prob_per_second),
            ("death", state.death_prob_per_second),
        ] {
            let per_substep = event_probability(prob, state.population, SIMULATION_INTERVAL);
            if per_substep > 1.0 {
                return Err(ResetError::ProbabilityOverflow {
                    id: record.id.clone(),
                    kind,
                    probability: per_substep,
                });
            }
        }
        Ok(state)
    }

    /// Advance the simulation by the wall time elapsed since the last
    /// tick (or since reset). Broadcasts and returns the birth/death
    /// sets for the tick. Before the first reset this is a no-op.
    pub fn step(&mut self) -> StepOutcome {
        let Some(last) = self.last_tick else {
            return StepOutcome::default();
        };
        let now = self.clock.now();
        // Stamp the tick before doing any work so a slow subscriber
        // cannot skew the next tick's elapsed measurement.
        self.last_tick = Some(now);

        let elapsed = seconds_between(last, now);
        let mut outcome = StepOutcome::default();
        for scale in substep_scales(elapsed) {
            self.sample_substep(scale, &mut outcome);
        }
        debug!(
            elapsed,
            births = outcome.births.len(),
            deaths = outcome.deaths.len(),
            "tick complete"
        );
        let _ = self.events.send(EngineEvent::Step(outcome.clone()));
        outcome
    }

    /// One sampling pass over every country at the given time scale.
    /// Birth and death draws are independent and both use the
    /// population as it stood when the sub-step began.
    fn sample_substep(&mut self, scale: f64, outcome: &mut StepOutcome) {
        let rng = &mut self.rng;
        for (id, state) in self.countries.iter_mut() {
            let population = state.population;
            let birth_p = bounded_probability(
                event_probability(state.birth_prob_per_second, population, scale),
                id,
                "birth",
            );
            let death_p = bounded_probability(
                event_probability(state.death_prob_per_second, population, scale),
                id,
                "death",
            );
            if rng.gen::<f64>() < birth_p {
                state.population += 1;
                outcome.births.insert(id.clone());
            }
            if rng.gen::<f64>() < death_p {
                state.population -= 1;
                outcome.deaths.insert(id.clone());
            }
        }
    }
}

/// A raw probability outside [0, 1] is a contract violation: assert in
/// debug builds, clamp and keep going in release.
fn bounded_probability(raw: f64, id: &str, kind: &str) -> f64 {
    debug_assert!(
        (0.0..=1.0).contains(&raw),
        "{kind} probability {raw} out of range for {id}"
    );
    if (0.0..=1.0).contains(&raw) {
        raw
    } else {
        warn!(country = %id, kind, probability = raw, "clamping out-of-range probability");
        raw.clamp(0.0, 1.0)
    }
}
