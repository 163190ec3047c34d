pub mod metrics;
pub mod portfolio;
pub mod serde_helpers;
pub mod series;
pub mod session;
pub mod settings;
