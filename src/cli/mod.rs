pub mod app;
pub mod check;
pub mod commands;
pub mod dispatch;
pub mod env;
pub mod run;
pub mod runtime;

pub use check::cmd_check;
pub use run::{cmd_run, RunArgs};
