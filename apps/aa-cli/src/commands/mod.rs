pub mod agent;
pub mod audit;
pub mod authorize;
pub mod consent;
pub mod policy;
