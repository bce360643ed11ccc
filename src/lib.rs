pub mod autoindex;
pub mod cli;
pub mod commit;
pub mod config;
pub mod contract;
pub mod error;
pub mod fetch;
pub mod job;
pub mod links;
pub mod load_config;
pub mod model;
pub mod pool;
pub mod publish;
pub mod s3;
pub mod store;
