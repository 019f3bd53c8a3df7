pub mod config;
pub mod crawler;
pub mod db;
pub mod fetch;
pub mod input;
pub mod model;
pub mod normalize;
