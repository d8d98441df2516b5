pub mod classifier;
pub mod config;
pub mod inference;
pub mod orchestrator;
pub mod records;
pub mod routes;
pub mod uploads;

#[cfg(test)]
mod test_support;
