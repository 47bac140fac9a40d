pub mod contacts;
pub mod database;
pub mod health;
pub mod memory;
pub mod rbmq;
pub mod redis;
pub mod store;
pub mod transport;
