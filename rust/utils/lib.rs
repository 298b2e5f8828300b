pub mod a2c;
pub mod collector;
pub mod env;
pub mod estimator;
pub mod logging;
pub mod model;
pub mod reinforce;
pub mod report;
mod validate;
