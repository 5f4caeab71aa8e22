//! Runtime tracing for GPU accelerator stacks: domain-scoped callbacks on
//! every traced API call, lock-free activity-record buffering with a
//! bulk-consumer drain, correlation ids that tie an async completion back to
//! the call that issued it, and application-supplied annotation ranges.
//!
//! ## Example
//!
//! Subscribe to every host-API call, print its correlation id on entry, and
//! drain a 1 MiB activity pool on a background thread:
//!
//! ```rust
//! use accel_trace::domain::Domain;
//! use accel_trace::dispatch::{ApiData, Phase};
//! use accel_trace::pool::PoolConfig;
//! use std::ffi::c_void;
//! use std::sync::Arc;
//!
//! unsafe fn on_call(_domain: Domain, _op: u32, data: *const c_void, _arg: *mut c_void) {
//!     let data = &*(data as *const ApiData);
//!     if data.phase == Phase::Enter {
//!         println!("call {} entered, correlation id {}", data.op, data.correlation_id);
//!     }
//! }
//!
//! accel_trace::control::enable_domain_callback(Domain::HostApi, on_call, std::ptr::null_mut()).unwrap();
//!
//! let pool = accel_trace::control::open_pool(
//!     PoolConfig::default(),
//!     Arc::new(|bytes: &[u8]| println!("drained {} bytes of activity records", bytes.len())),
//!     true,
//! ).unwrap();
//! accel_trace::control::enable_domain_activity(Domain::HostApi, Some(pool)).unwrap();
//!
//! accel_trace::control::start();
//! // ... application calls traced host-API entry points here ...
//! accel_trace::control::stop();
//! accel_trace::control::flush_activity(Some(pool)).unwrap();
//! ```
//!
//! ## Scope
//!
//! This crate is the tracing core: callback dispatch, activity buffering,
//! correlation, and the control-plane surface above. It does not parse
//! command lines, write output files, or decode machine-specific binary
//! formats — those belong in a tool layer built on top (see
//! [`config::Config::from_env`] for the one explicit, opt-in seam where a
//! tool layer's environment knobs fold into this crate's configuration).

pub mod annotation;
pub mod buffer;
pub mod callback;
pub mod config;
pub mod control;
pub mod correlation;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod journal;
pub mod loader;
pub mod pool;
pub mod timestamp;

pub use crate::config::{Config, LoaderTarget};
pub use crate::control::{
    close_pool, default_pool, default_pool_expl, disable_domain_activity, disable_domain_callback,
    disable_op_activity, disable_op_callback, enable_domain_activity, enable_domain_callback, enable_op_activity,
    enable_op_callback, flush_activity, get_timestamp, is_running, on_load, on_unload, open_pool,
    pop_external_correlation_id, push_external_correlation_id, set_properties, start, stop, ExtApiProperties,
    TOOL_PRIORITY, VERSION_MAJOR, VERSION_MINOR,
};
pub use crate::dispatch::{next_record, ActivityRecord};
pub use crate::domain::{op_code, op_string, Domain, Kind, OpCode};
pub use crate::error::{error_string, Error, Status};
pub use crate::pool::{PoolConfig, PoolHandle};
