pub mod attrs;
pub mod backup_store;
pub mod checksum;
pub mod config;
pub mod crypto;
pub mod error;
pub mod liveness;
pub mod meta;
pub mod model;
pub mod naming;
pub mod paths;
pub mod registry;
pub mod restore;
pub mod scanner;
pub mod settings;
