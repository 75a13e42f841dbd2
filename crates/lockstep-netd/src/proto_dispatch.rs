pub mod error;
pub(crate) mod handlers;
