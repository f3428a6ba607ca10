pub mod branch_opt_util;
pub mod database;
pub mod decomposition;
pub mod error;
pub mod params;
pub mod serialization;
