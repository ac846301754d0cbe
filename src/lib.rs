pub mod config;
pub mod error;
pub mod features;
pub mod fetch;
pub mod forecast;
pub mod layout;
pub mod lookup;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod scheduler;
pub mod signals;
pub mod stats;
pub mod store;
