pub mod accounts_api;
pub mod accrual_api;
pub mod errors;
