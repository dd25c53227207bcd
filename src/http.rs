//! Inbound HTTP surface
//!
//! Thin JSON contracts over a hand-rolled HTTP/1.1 listener: client
//! bootstrap, account handout, and the metrics exporter. Everything
//! interesting happens in the supply and lifecycle components; this layer
//! only translates.

use crate::config::ServerConfig;
use crate::faucet::Faucet;
use crate::metrics::metrics;
use crate::supply::Supply;
use anyhow::Result;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

const MAX_REQUEST_BYTES: usize = 64 * 1024;

pub struct ServerState {
    pub supply: Arc<Supply>,
    pub faucet: Arc<Faucet>,
    pub program_id: Pubkey,
    pub rpc_url: String,
    pub require_payment: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    program_id: String,
    cluster_url: String,
    payment_required: bool,
    /// Lamports per account pair, including the payment signature fee
    cost_per_account: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountsRequest {
    split: usize,
    payment_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountsResponse {
    /// Base58-encoded fee payer keypairs, one per program account
    fee_payers: Vec<String>,
    program_accounts: Vec<String>,
    /// Transactions each pair can carry
    capacity: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    retryable: bool,
}

/// Start the listener. Runs until the process exits.
pub async fn serve(state: Arc<ServerState>, config: &ServerConfig) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((socket, _)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(socket, state).await {
                        warn!(error = %err, "Connection handling failed");
                    }
                });
            }
            Err(err) => {
                error!(error = %err, "Failed to accept connection");
            }
        }
    }
}

async fn handle_connection(mut socket: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let request = match read_request(&mut socket).await? {
        Some(request) => request,
        None => return Ok(()),
    };

    let response = route(&request, &state).await;
    socket.write_all(&response).await?;
    socket.shutdown().await?;
    Ok(())
}

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Read one HTTP/1.1 request. Returns None on an empty or oversized read.
async fn read_request(socket: &mut TcpStream) -> Result<Option<Request>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Ok(None);
        }
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let content_length = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .next()
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Ok(None);
    }

    let body_start = header_end + 4;
    let mut body = buf[body_start.min(buf.len())..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request { method, path, body }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn route(request: &Request, state: &ServerState) -> Vec<u8> {
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/init") => init(state),
        ("POST", "/accounts") => accounts(request, state).await,
        ("GET", "/metrics") => metrics_text(),
        _ => respond(404, "application/json", b"{\"error\":\"not found\"}"),
    }
}

fn init(state: &ServerState) -> Vec<u8> {
    let body = InitResponse {
        program_id: state.program_id.to_string(),
        cluster_url: state.rpc_url.clone(),
        payment_required: state.require_payment,
        cost_per_account: state.supply.calculate_cost(1, true),
    };
    json_response(200, &body)
}

async fn accounts(request: &Request, state: &ServerState) -> Vec<u8> {
    let parsed: AccountsRequest = match serde_json::from_slice(&request.body) {
        Ok(parsed) => parsed,
        Err(_) => {
            return json_response(
                400,
                &ErrorBody {
                    error: "invalid request body",
                    retryable: false,
                },
            );
        }
    };
    if parsed.split == 0 {
        return json_response(
            400,
            &ErrorBody {
                error: "split must be positive",
                retryable: false,
            },
        );
    }

    // Backpressure, not an error: the client should retry shortly
    if !state.supply.reserve(parsed.split) {
        return json_response(
            400,
            &ErrorBody {
                error: "account supply busy, try again",
                retryable: true,
            },
        );
    }

    if state.require_payment {
        let Some(payment_key) = parsed.payment_key.as_deref() else {
            state.supply.unreserve(parsed.split);
            return json_response(
                400,
                &ErrorBody {
                    error: "payment required",
                    retryable: false,
                },
            );
        };
        let cost = state.supply.calculate_cost(parsed.split, false);
        if let Err(err) = state.faucet.collect_payment(payment_key, cost).await {
            warn!(error = %err, "Payment collection failed");
            state.supply.unreserve(parsed.split);
            return json_response(
                400,
                &ErrorBody {
                    error: "payment failed",
                    retryable: false,
                },
            );
        }
    }

    let popped = match state.supply.pop(parsed.split) {
        Ok(popped) => popped,
        Err(err) => {
            error!(error = %err, "Reserved accounts vanished before pop");
            return json_response(
                500,
                &ErrorBody {
                    error: "account supply exhausted",
                    retryable: true,
                },
            );
        }
    };

    metrics().active_users.inc();
    let body = AccountsResponse {
        fee_payers: popped
            .fee_accounts
            .iter()
            .map(|account| bs58::encode(account.keypair().to_bytes()).into_string())
            .collect(),
        program_accounts: popped
            .program_accounts
            .iter()
            .map(|account| account.keypair().pubkey().to_string())
            .collect(),
        capacity: state.supply.account_capacity(),
    };
    json_response(200, &body)
}

fn metrics_text() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let mut out = Vec::new();
    if let Err(err) = encoder.encode(&metrics().registry().gather(), &mut out) {
        error!(error = %err, "Failed to encode metrics");
        return respond(500, "text/plain", b"encoding error");
    }
    respond(200, "text/plain; version=0.0.4", &out)
}

fn json_response<T: Serialize>(status: u16, body: &T) -> Vec<u8> {
    match serde_json::to_vec(body) {
        Ok(bytes) => respond(status, "application/json", &bytes),
        Err(err) => {
            error!(error = %err, "Failed to encode response");
            respond(500, "application/json", b"{\"error\":\"internal\"}")
        }
    }
}

fn respond(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let mut response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_end_detection() {
        assert_eq!(
            find_header_end(b"POST /init HTTP/1.1\r\nHost: x\r\n\r\nbody"),
            Some(28)
        );
        assert_eq!(find_header_end(b"POST /init HTTP/1.1\r\n"), None);
    }

    #[test]
    fn responses_carry_content_length() {
        let response = respond(200, "application/json", b"{}");
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn error_bodies_flag_retryability() {
        let body = ErrorBody {
            error: "account supply busy, try again",
            retryable: true,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"retryable\":true"));
    }

    #[tokio::test]
    async fn read_request_parses_method_path_and_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(
                    b"POST /accounts HTTP/1.1\r\nContent-Length: 11\r\n\r\n{\"split\":2}",
                )
                .await
                .unwrap();
            stream
        });

        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await.unwrap().unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/accounts");
        assert_eq!(request.body, b"{\"split\":2}");
        drop(client.await.unwrap());
    }
}
