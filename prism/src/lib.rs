// Library interface for prism modules
// This allows tests and the binaries to import modules

pub mod citations;
pub mod coordinator;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod model;
pub mod normalize;
pub mod quota;
pub mod registry;
pub mod server;
pub mod transport;
pub mod workers;
