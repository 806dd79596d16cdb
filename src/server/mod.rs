pub mod app;
pub mod deserializers;
pub mod error;
pub mod routes;
pub mod session;
