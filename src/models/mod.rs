pub mod audit;
pub mod channel;
pub mod contact;
pub mod event;
pub mod health;
pub mod hook;
pub mod payload;
pub mod queue;
pub mod response;
pub mod retry;
pub mod signal;
pub mod status;
pub mod template;
pub mod trace;
