pub mod bucket_service;
pub mod cash_service;
pub mod position_service;
pub mod report_service;
pub mod valuation_service;
