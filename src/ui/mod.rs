//! Terminal UI

mod console;

pub use console::ConsoleApp;
