//! Minimal HTTP/1.1 job API for integration tests.
//!
//! Serves `POST /generate`, `GET /status/{id}` and `GET /download/{id}` from
//! background threads. Status answers are scripted; once the script runs dry
//! the last answer repeats. Every response closes the connection.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct JobServerOptions {
    /// If set, requests without a matching `x-api-key` get 401.
    pub api_key: Option<String>,
    /// How long `POST /generate` takes to answer.
    pub generate_delay: Duration,
}

#[derive(Default)]
struct State {
    opts: JobServerOptions,
    generate_calls: AtomicUsize,
    status_calls: AtomicUsize,
    download_calls: AtomicUsize,
    generate_bodies: Mutex<Vec<String>>,
    status_script: Mutex<VecDeque<(u16, String)>>,
    last_status: Mutex<Option<(u16, String)>>,
}

/// Handle to a running server. The server lives until the process exits.
#[derive(Clone)]
pub struct JobServer {
    pub base_url: String,
    state: Arc<State>,
}

impl JobServer {
    pub fn start() -> Self {
        Self::start_with_options(JobServerOptions::default())
    }

    pub fn start_with_options(opts: JobServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State {
            opts,
            ..State::default()
        });
        let server_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&server_state);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base_url: format!("http://127.0.0.1:{}/", port),
            state,
        }
    }

    /// Queue a `GET /status` answer with a JSON body.
    pub fn push_status(&self, code: u16, body: &str) -> &Self {
        self.state
            .status_script
            .lock()
            .unwrap()
            .push_back((code, body.to_string()));
        self
    }

    pub fn push_progress(&self, status: &str, progress: u32) -> &Self {
        self.push_status(
            200,
            &format!(r#"{{"status":"{}","progress":{}}}"#, status, progress),
        )
    }

    pub fn generate_calls(&self) -> usize {
        self.state.generate_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.state.status_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.state.download_calls.load(Ordering::SeqCst)
    }

    pub fn generate_bodies(&self) -> Vec<String> {
        self.state.generate_bodies.lock().unwrap().clone()
    }
}

struct Request {
    method: String,
    path: String,
    api_key: Option<String>,
    body: String,
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = std::str::from_utf8(&data[..header_end]).ok()?.to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let mut content_length = 0usize;
    let mut api_key = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("x-api-key") {
                api_key = Some(value.trim().to_string());
            }
        }
    }

    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    Some(Request {
        method,
        path,
        api_key,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn respond(stream: &mut TcpStream, code: u16, body: &str) {
    let reason = match code {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        code,
        reason,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };

    if let Some(expected) = &state.opts.api_key {
        if request.api_key.as_deref() != Some(expected.as_str()) {
            respond(&mut stream, 401, r#"{"message":"invalid api key"}"#);
            return;
        }
    }

    let path = request.path.trim_start_matches('/');
    match (request.method.as_str(), path.split_once('/')) {
        ("POST", None) if path == "generate" => {
            let n = state.generate_calls.fetch_add(1, Ordering::SeqCst) + 1;
            state
                .generate_bodies
                .lock()
                .unwrap()
                .push(request.body.clone());
            if !state.opts.generate_delay.is_zero() {
                thread::sleep(state.opts.generate_delay);
            }
            let body = format!(r#"{{"job_id":"job-{}","status":"pending"}}"#, n);
            respond(&mut stream, 200, &body);
        }
        ("GET", Some(("status", _id))) => {
            state.status_calls.fetch_add(1, Ordering::SeqCst);
            let next = state.status_script.lock().unwrap().pop_front();
            let reply = match next {
                Some(reply) => {
                    *state.last_status.lock().unwrap() = Some(reply.clone());
                    reply
                }
                None => state
                    .last_status
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or((404, r#"{"message":"no such job"}"#.to_string())),
            };
            respond(&mut stream, reply.0, &reply.1);
        }
        ("GET", Some(("download", id))) => {
            state.download_calls.fetch_add(1, Ordering::SeqCst);
            let body = format!(
                r#"{{"download_url":"https://cdn.example.test/decks/{}.pptx"}}"#,
                id
            );
            respond(&mut stream, 200, &body);
        }
        _ => respond(&mut stream, 404, r#"{"message":"no such route"}"#),
    }
}
