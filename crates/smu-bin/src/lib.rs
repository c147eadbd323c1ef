//! Building blocks of the `smu-bench` command-line tool.

pub mod bench;
pub mod settings;

pub use bench::{open_session, supervise, Target};
pub use settings::{load_run_config, load_settings, BenchSettings, InstrumentSettings};
