//! Kope ops: watch-confirmed install/uninstall of resource definitions and the
//! harness that runs controllers against them.

#![forbid(unsafe_code)]

mod config;
mod confirm;
pub mod operator;
pub mod protocol;

pub use config::{FaultPolicy, ProtocolConfig, TimeoutPolicy};
pub use operator::{
    Action, Controller, Launcher, Operator, OperatorContext, OperatorFactory, OperatorRegistry, ShutdownSignal,
};
pub use protocol::{BatchReport, Protocol, ProtocolError};
