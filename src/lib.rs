pub mod clock;
pub mod engine;
pub mod records;
pub mod scenario;
pub mod scheduler;

pub use engine::{Engine, EngineEvent, StepOutcome, SECONDS_PER_YEAR, SIMULATION_INTERVAL};
pub use records::{DemographicRecord, RecordSource};
pub use scenario::{Scenario, ScenarioLoader};
