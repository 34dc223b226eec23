pub mod agent;
pub mod belief;
pub mod config;
pub mod gateway;
pub mod intent;
pub mod plan;
