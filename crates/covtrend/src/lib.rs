pub mod cli;
pub mod history;
pub mod logging;
