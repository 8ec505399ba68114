pub mod errors;
pub mod events;
pub mod history;
pub mod options;
