pub mod config;
pub mod controller;
pub mod dispatch;
pub mod identity;
pub mod lifecycle;
pub mod scheduler;
pub mod shipper;
pub mod tasks;
pub mod wire;
