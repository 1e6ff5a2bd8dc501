pub mod models;
pub mod safety;
pub mod settings;
pub mod tracker;
