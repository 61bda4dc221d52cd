//! Static file server on the coil reactor.
//!
//! Run with `cargo run --example http_server -- 8080 .`, then try
//! `curl http://127.0.0.1:8080/Cargo.toml`.

use std::cell::RefCell;
use std::rc::Rc;

use coil_http::{FileServer, HttpConfig, HttpServer};
use tracing::info;

fn main() -> Result<(), coil::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().and_then(|arg| arg.parse().ok()).unwrap_or(8080);
    let root = args.next().unwrap_or_else(|| ".".to_string());

    let mut poller = coil::Poller::new();
    let mut server = HttpServer::new(HttpConfig::default());
    server.register_child("/", Box::new(FileServer::new(&root)));
    let server = Rc::new(RefCell::new(server));
    coil::listen(&mut poller, &server, "127.0.0.1", port)?;
    info!(port, root, "serving");
    poller.run();
    Ok(())
}
