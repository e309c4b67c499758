//! Proxmox node, guest and service monitoring
//!
//! The [`scheduler`] runs periodic jobs over the records in [`storage`]; each
//! target is handled by one [`monitor::Monitor`] unit of work that probes it,
//! reconciles the result, evaluates [`rules`] and announces new alerts through
//! [`notify`] and [`live`].

pub mod actors;
pub mod alerts;
pub mod config;
pub mod live;
pub mod models;
pub mod monitor;
pub mod monitors;
pub mod notify;
pub mod proxmox;
pub mod rules;
pub mod scheduler;
pub mod seed;
pub mod storage;
pub mod uptime;
pub mod util;

#[cfg(feature = "api")]
pub mod api;
