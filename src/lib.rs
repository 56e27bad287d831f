pub mod auth;
pub mod config;
pub mod extract;
pub mod middleware;

pub mod appointment_store;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod slot_guard;
