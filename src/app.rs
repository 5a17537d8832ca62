//! Application hook (C8): turns request bytes into response bytes.
//!
//! Grounded on `original_source/linux/advanced-reactor-server/thread_pool.c`'s
//! `process_request`, which builds the exact `"Echo: "`-prefixed HTTP
//! response this module reproduces. A worker calls [`Application::handle`]
//! with a task's payload and gets back the bytes to stage for writing; the
//! worker (not this trait) is responsible for building the
//! [`crate::task::ReactorMessage`] and acquiring the reference it carries —
//! this hook never touches the reactor or the kernel registration (I5).

/// A pluggable request handler invoked by a worker thread.
///
/// Implementations must be `Send + Sync`: the same instance is shared across
/// every worker thread.
pub trait Application: Send + Sync {
    /// Produces the response bytes for one request payload.
    fn handle(&self, input: &[u8]) -> Vec<u8>;
}

/// The reference echo responder: wraps the request bytes in a minimal HTTP
/// response, truncating to fit the connection's write buffer (spec.md
/// §4.8's buffering contract).
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoResponder;

impl Application for EchoResponder {
    fn handle(&self, input: &[u8]) -> Vec<u8> {
        let available = crate::connection::BUFFER_SIZE;
        // Reserve room for the fixed envelope around the echoed bytes so the
        // whole response (not just the body) fits within one buffer.
        let envelope_len = response_envelope_len(0);
        let max_body = available.saturating_sub(envelope_len);
        let body = &input[..input.len().min(max_body)];

        let mut response = Vec::with_capacity(response_envelope_len(body.len()) + body.len());
        response.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
        response.extend_from_slice(b"Content-Type: text/plain\r\n");
        response.extend_from_slice(format!("Content-Length: {}\r\n", 6 + body.len()).as_bytes());
        response.extend_from_slice(b"Connection: keep-alive\r\n\r\n");
        response.extend_from_slice(b"Echo: ");
        response.extend_from_slice(body);
        response
    }
}

fn response_envelope_len(body_len: usize) -> usize {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\nEcho: ",
        6 + body_len
    );
    header.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_request_body_with_content_length() {
        let responder = EchoResponder;
        let response = responder.handle(b"ping");
        let expected = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 10\r\nConnection: keep-alive\r\n\r\nEcho: ping";
        assert_eq!(response, expected.to_vec());
    }

    #[test]
    fn truncates_bodies_that_would_overflow_the_buffer() {
        let responder = EchoResponder;
        let oversized = vec![b'x'; crate::connection::BUFFER_SIZE * 2];
        let response = responder.handle(&oversized);
        assert!(response.len() <= crate::connection::BUFFER_SIZE);
    }
}
