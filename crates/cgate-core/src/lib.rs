pub mod cancel;
pub mod chat;
pub mod client;
pub mod convert;
pub mod error;
pub mod shape;
pub mod token;
pub mod tools;

pub use chat::{ChatCall, ChatOutcome, ChatService, ToolInvocation};
pub use convert::MessageConverter;
pub use error::GatewayError;
pub use token::{TokenManager, TokenManagerConfig, TokenStats};
