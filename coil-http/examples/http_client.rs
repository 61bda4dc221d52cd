//! Fetch one URI and print the response body.
//!
//! Run with `cargo run --example http_client -- http://127.0.0.1:8080/`.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use coil::Poller;
use coil_http::{
    connect_uri, path_query, HttpClient, HttpClientHandler, HttpClientStream, HttpConfig,
    HttpMessage,
};
use tracing::{error, info};

struct Fetch {
    uri: String,
}

impl HttpClientHandler for Fetch {
    fn connection_ready(&mut self, poller: &mut Poller, stream: &mut HttpClientStream<Self>) {
        let path = match path_query(&self.uri) {
            Ok(path) => path,
            Err(err) => {
                error!(error = %err, "bad uri");
                stream.close(poller);
                return;
            }
        };
        let request = HttpMessage::request("GET", &path);
        if let Err(err) = stream.send_request(poller, request) {
            error!(error = %err, "sending request failed");
            stream.close(poller);
        }
    }

    fn connection_failed(&mut self, _poller: &mut Poller, error: coil::Error) {
        error!(error = %error, "connect failed");
    }

    fn got_response(
        &mut self,
        poller: &mut Poller,
        stream: &mut HttpClientStream<Self>,
        _request: HttpMessage,
        mut response: HttpMessage,
    ) {
        info!(status = response.status, reason = %response.reason, "response");
        let mut stdout = std::io::stdout();
        loop {
            match response.body_mut().read(65536) {
                Ok(piece) if piece.is_empty() => break,
                Ok(piece) => {
                    let _ = stdout.write_all(&piece);
                }
                Err(_) => break,
            }
        }
        stream.close(poller);
    }

    fn connection_lost(&mut self, poller: &mut Poller) {
        poller.shutdown();
    }
}

fn main() -> Result<(), coil_http::HttpError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8080/".to_string());

    let mut poller = Poller::new();
    let app = Rc::new(RefCell::new(Fetch { uri: uri.clone() }));
    let client = Rc::new(RefCell::new(HttpClient::new(HttpConfig::default(), app)));
    connect_uri(&mut poller, &client, &uri)?;
    poller.run();
    Ok(())
}
