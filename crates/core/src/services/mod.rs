pub mod fee_service;
pub mod portfolio_registry;
pub mod series_service;
pub mod session_service;
