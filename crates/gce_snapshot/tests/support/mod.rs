//! Loopback HTTP stub standing in for the Compute Engine REST API.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub const API_PREFIX: &str = "/compute/v1";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub authorization: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }
}

/// Canned responses for one method + path. Responses are served in order and
/// the last one repeats.
#[derive(Debug, Clone)]
pub struct StubRoute {
    method: String,
    path: String,
    responses: VecDeque<(u16, String)>,
}

impl StubRoute {
    pub fn new(method: &str, path: &str, status: u16, body: &str) -> Self {
        Self {
            method: method.to_string(),
            path: format!("{API_PREFIX}/{path}"),
            responses: VecDeque::from([(status, body.to_string())]),
        }
    }

    pub fn then(mut self, status: u16, body: &str) -> Self {
        self.responses.push_back((status, body.to_string()));
        self
    }

    fn next_response(&mut self) -> (u16, String) {
        if self.responses.len() > 1 {
            self.responses.pop_front().expect("queued response")
        } else {
            self.responses.front().cloned().expect("queued response")
        }
    }
}

pub struct StubServer {
    pub base: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubServer {
    pub async fn start(routes: Vec<StubRoute>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub address");
        let routes = Arc::new(Mutex::new(routes));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let accept_routes = routes.clone();
        let accept_requests = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = accept_routes.clone();
                let requests = accept_requests.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, routes, requests).await;
                });
            }
        });

        Self {
            base: format!("http://{addr}{API_PREFIX}"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    stream: TcpStream,
    routes: Arc<Mutex<Vec<StubRoute>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse().unwrap_or(0),
                "authorization" => authorization = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let recorded = RecordedRequest {
        method,
        target,
        authorization,
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let (status, payload) = {
        let mut routes = routes.lock().unwrap();
        match routes
            .iter_mut()
            .find(|route| route.method == recorded.method && route.path == recorded.path())
        {
            Some(route) => route.next_response(),
            None => (
                404,
                r#"{"error": {"code": 404, "message": "no stub route"}}"#.to_string(),
            ),
        }
    };
    requests.lock().unwrap().push(recorded);

    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let stream = reader.get_mut();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
