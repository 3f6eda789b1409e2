pub mod account;
pub mod bucket;
pub mod holding;
pub mod investment;
pub mod portfolio;
pub mod quote;
pub mod report;
pub mod settings;
pub mod transaction;
