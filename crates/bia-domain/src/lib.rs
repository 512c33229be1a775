pub mod agent;
pub mod compressed;
pub mod debug;
pub mod error;
pub mod ids;
pub mod log;
pub mod message;
pub mod registry;
