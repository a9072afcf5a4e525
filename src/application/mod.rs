pub mod day_boundary;
pub mod difficulty;
pub mod invalidation;
pub mod reconciliation;
pub mod scoped_task;
pub mod session;
pub mod toggle_controller;

#[cfg(test)]
pub(crate) mod test_support;
