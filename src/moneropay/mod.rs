pub mod client;
pub mod models;

pub use client::MoneroPayClient;
pub use models::{CallbackPayload, ReceiveStatusResponse};
