// REST table API
//
// Endpoint groups are split by concern; `client` owns transport mechanics.

pub mod client;
mod devices;
pub mod models;
mod topology;

pub use client::RestClient;
