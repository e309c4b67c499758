use std::net::{Ipv4Addr, SocketAddr};

const API_ADDR: &str = "MONITORIX_API_ADDR";

const DEFAULT_API_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

pub fn get_default_api_addr() -> SocketAddr {
    DEFAULT_API_ADDR
}

/// Bind address from the environment, falling back to the configured one
pub fn get_api_addr(configured: SocketAddr) -> SocketAddr {
    let addr_from_env = std::env::var(API_ADDR);
    addr_from_env.map_or(configured, |res| res.parse().unwrap_or(configured))
}

const SMTP_PASSWORD: &str = "MONITORIX_SMTP_PASSWORD";

pub fn get_smtp_password() -> Option<String> {
    let password_from_env = std::env::var(SMTP_PASSWORD);
    password_from_env.ok().filter(|password| !password.is_empty())
}

const API_TOKEN: &str = "MONITORIX_API_TOKEN";

pub fn get_api_token() -> Option<String> {
    let token_from_env = std::env::var(API_TOKEN);
    token_from_env.ok().filter(|token| !token.is_empty())
}
