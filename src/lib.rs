// Core infrastructure modules
pub mod core;

// Shell components
pub mod config;
pub mod dispatcher;
pub mod history;
pub mod input;
pub mod line_buffer;
pub mod output;
pub mod shell;
pub mod terminal;

#[cfg(test)]
mod test_utils;
