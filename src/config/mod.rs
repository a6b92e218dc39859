pub mod settings;

pub use settings::{
    CustomHeadersConfig, DatabaseConfig, MenuConfig, SecurityConfig, ServerConfig, Settings,
};
