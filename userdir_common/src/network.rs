use std::net::SocketAddr;

pub const DEFAULT_PORT: u16 = 3001;

pub fn default_server_host() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

pub fn default_client_address() -> url::Url {
    format!("ws://localhost:{DEFAULT_PORT}/")
        .parse()
        .expect("default client address is a valid url")
}

/// Build a websocket url pointing at a bound server address.
pub fn url_for_sockaddr(addr: &SocketAddr) -> url::Url {
    let host = if addr.ip().is_unspecified() {
        "localhost".to_string()
    } else {
        match addr {
            SocketAddr::V4(v4) => v4.ip().to_string(),
            SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
        }
    };

    format!("ws://{host}:{}/", addr.port())
        .parse()
        .expect("socket address forms a valid url")
}
