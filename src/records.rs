use serde::{Deserialize, Serialize};

/// One row of demographic input, as handed over by the data provider.
///
/// Rates are expressed per 1000 people per year; `population` is the
/// headcount measured during `population_year`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemographicRecord {
    pub id: String,
    pub birth_rate: f64,
    pub death_rate: f64,
    pub population: i64,
    pub population_year: i32,
}

/// Abstraction over wherever demographic records come from.
///
/// Called once per engine reset. The returned order must be stable for
/// a given source so runs are reproducible.
pub trait RecordSource {
    fn ordered_records(&self) -> Vec<DemographicRecord>;
}
