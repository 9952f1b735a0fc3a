pub const CLIENT_CONFIG: &'static str = include_str!("../client.toml");

pub mod endpoint;
pub mod error;
pub mod event;
pub mod ext;
pub mod member;
pub mod node_preference;
pub mod position;
pub mod settings;
pub mod status;
pub mod util;
