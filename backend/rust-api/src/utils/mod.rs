pub mod retry;
pub mod single_flight;
