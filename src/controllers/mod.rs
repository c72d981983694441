pub mod api_response;
pub mod generate;
pub mod models;
pub mod outputs;
pub mod queue;
pub mod system;
