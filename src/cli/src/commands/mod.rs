pub mod config;
pub mod health;
pub mod keys;
pub mod orgs;
pub mod session;
pub mod users;
