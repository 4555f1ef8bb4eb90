//! Duplex request/response channel over a TCP connection
//!
//! A [`Channel`] wraps one connected socket and speaks the frame protocol
//! from [`super::frame_codec`]. It plays one of two roles:
//!
//! - **client role** ([`Channel::connect`]): [`Channel::send_request`] writes a
//!   request frame and blocks for exactly one response frame.
//! - **server role** ([`Channel::accepted`], returned by
//!   [`ListeningChannel::accept`]): [`Channel::receive_request`] and
//!   [`Channel::send_response`] exchange one frame each.
//!
//! Exactly one request is in flight per channel. Both roles take `&mut self`,
//! so there is no pipelining or multiplexing.
//!
//! # Shutdown awareness
//!
//! Blocking socket calls are not cancellable. Instead the two places where a
//! service may wait indefinitely poll the process [`ShutdownContext`]:
//! [`ListeningChannel::accept`] polls a non-blocking listener, and
//! [`Channel::wait_for_request`] peeks with a short read timeout before each
//! receive. Once a frame has started, the round trip always runs to
//! completion or fails with a transport error.

use super::frame_codec::{decode_request, decode_response, encode_request, encode_response};
use super::frame_codec::{read_frame, write_frame};
use crate::core::ShutdownContext;
use crate::types::{Request, Response, ServiceError};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often blocked accept/receive loops re-check the shutdown flag
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of waiting for the next request on a server-role channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one byte of the next frame is available
    Ready,
    /// The peer closed the connection cleanly
    Closed,
    /// Shutdown was requested and no request is pending
    Shutdown,
}

/// One connected socket speaking the netbank frame protocol
#[derive(Debug)]
pub struct Channel {
    stream: TcpStream,
    peer: String,
    poll_interval: Duration,
}

impl Channel {
    /// Open a client-role channel to `host:port`
    ///
    /// `host` may be a literal IP address or a host name.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if resolution or connection fails.
    pub fn connect(host: &str, port: u16) -> Result<Self, ServiceError> {
        let stream = TcpStream::connect((host, port))
            .map_err(|e| ServiceError::transport("connect", format!("{}:{}: {}", host, port, e)))?;
        let _ = stream.set_nodelay(true);

        let peer = format!("{}:{}", host, port);
        info!(peer = %peer, "connected");
        Ok(Channel {
            stream,
            peer,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Bind a listening channel on all interfaces
    ///
    /// Port 0 picks an ephemeral port; see [`ListeningChannel::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if the bind fails.
    pub fn listen(port: u16) -> Result<ListeningChannel, ServiceError> {
        ListeningChannel::bind(("0.0.0.0", port))
    }

    /// Wrap a socket produced by an accept call as a server-role channel
    ///
    /// The peer address is recorded for logging only; it reads `Unknown` if
    /// the OS cannot report it.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if the socket cannot be switched to
    /// blocking mode.
    pub fn accepted(stream: TcpStream) -> Result<Self, ServiceError> {
        stream
            .set_nonblocking(false)
            .map_err(|e| ServiceError::transport("accept", e))?;
        let _ = stream.set_nodelay(true);

        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "Unknown".to_string());

        Ok(Channel {
            stream,
            peer,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override how often [`Channel::wait_for_request`] re-checks shutdown
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Address of the other end, as `ip:port`
    pub fn peer_addr(&self) -> &str {
        &self.peer
    }

    /// Send one request and block for its response
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if the write is short or fails, or
    /// if the response frame is short or absent; the caller may retry the
    /// whole round trip. Returns [`ServiceError::Protocol`] if the response
    /// frame arrived but does not parse.
    pub fn send_request(&mut self, request: &Request) -> Result<Response, ServiceError> {
        write_frame(&mut self.stream, &encode_request(request))?;
        let payload = read_frame(&mut self.stream)?;
        decode_response(&payload)
    }

    /// Read one request frame
    ///
    /// Frames that do not parse decode to [`Request::quit`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if the frame is short or absent.
    pub fn receive_request(&mut self) -> Result<Request, ServiceError> {
        let payload = read_frame(&mut self.stream)?;
        Ok(decode_request(&payload))
    }

    /// Write one response frame
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if the write is short or fails.
    pub fn send_response(&mut self, response: &Response) -> Result<(), ServiceError> {
        write_frame(&mut self.stream, &encode_response(response))
    }

    /// Block until a request is pending, the peer disconnects, or shutdown is
    /// requested
    ///
    /// This is the cancellation point before each receive. A request that is
    /// already pending is reported as [`Readiness::Ready`] even after
    /// shutdown was requested, so the caller can still acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if the socket reports an error.
    pub fn wait_for_request(&mut self, ctx: &ShutdownContext) -> Result<Readiness, ServiceError> {
        self.stream
            .set_read_timeout(Some(self.poll_interval))
            .map_err(|e| ServiceError::transport("recv", e))?;

        let mut probe = [0u8; 1];
        let outcome = loop {
            match self.stream.peek(&mut probe) {
                Ok(0) => break Ok(Readiness::Closed),
                Ok(_) => break Ok(Readiness::Ready),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if ctx.is_shutdown_requested() {
                        break Ok(Readiness::Shutdown);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => break Err(ServiceError::transport("recv", e)),
            }
        };

        self.stream
            .set_read_timeout(None)
            .map_err(|e| ServiceError::transport("recv", e))?;
        outcome
    }
}

/// A bound listener producing server-role [`Channel`]s
#[derive(Debug)]
pub struct ListeningChannel {
    listener: TcpListener,
    local_addr: SocketAddr,
    poll_interval: Duration,
}

impl ListeningChannel {
    /// Bind to `addr` and start listening
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if the bind fails or the listener
    /// cannot be made non-blocking.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, ServiceError> {
        let listener = TcpListener::bind(addr).map_err(|e| ServiceError::transport("bind", e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ServiceError::transport("listen", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServiceError::transport("listen", e))?;

        info!(addr = %local_addr, "listening");
        Ok(ListeningChannel {
            listener,
            local_addr,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override how often [`ListeningChannel::accept`] re-checks shutdown
    ///
    /// Accepted channels inherit the same interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next connection
    ///
    /// Returns `Ok(None)` once shutdown has been requested. The flag is
    /// checked before every accept attempt and after every attempt that
    /// yields nothing, so a pending accept never holds up shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Transport`] if the accept call fails. A
    /// connection whose socket cannot be set up is logged and dropped, and
    /// the wait continues.
    pub fn accept(&self, ctx: &ShutdownContext) -> Result<Option<Channel>, ServiceError> {
        loop {
            if ctx.is_shutdown_requested() {
                return Ok(None);
            }

            match self.listener.accept() {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "accepted connection");
                    if let Some(channel) = self.adopt(Channel::accepted(stream), addr) {
                        return Ok(Some(channel));
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(self.poll_interval),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(ServiceError::transport("accept", e)),
            }
        }
    }

    /// Keep a freshly accepted channel, or drop it if its setup failed
    fn adopt(&self, accepted: Result<Channel, ServiceError>, addr: SocketAddr) -> Option<Channel> {
        match accepted {
            Ok(channel) => Some(channel.with_poll_interval(self.poll_interval)),
            Err(e) => {
                warn!(peer = %addr, error = %e, "dropping connection that could not be set up");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestKind;
    use std::io::Write;

    fn listener() -> ListeningChannel {
        ListeningChannel::bind("127.0.0.1:0")
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_request_response_round_trip() {
        let listener = listener();
        let port = listener.local_addr().port();
        let ctx = ShutdownContext::new();

        let server_ctx = ctx.clone();
        let server = thread::spawn(move || {
            let mut channel = listener.accept(&server_ctx).unwrap().unwrap();
            let request = channel.receive_request().unwrap();
            let response = Response::success("echo").with_balance(request.amount * 2.0);
            channel.send_response(&response).unwrap();
            request
        });

        let mut client = Channel::connect("127.0.0.1", port).unwrap();
        let sent = Request::new(RequestKind::Deposit, 5).with_amount(21.0);
        let response = client.send_request(&sent).unwrap();

        assert!(response.ok);
        assert_eq!(response.balance, 42.0);
        assert_eq!(response.message, "echo");
        assert_eq!(server.join().unwrap(), sent);
    }

    #[test]
    fn test_accepted_channel_records_peer_address() {
        let listener = listener();
        let port = listener.local_addr().port();
        let ctx = ShutdownContext::new();

        let _client = Channel::connect("127.0.0.1", port).unwrap();
        let channel = listener.accept(&ctx).unwrap().unwrap();
        assert!(channel.peer_addr().starts_with("127.0.0.1:"));
    }

    #[test]
    fn test_accept_returns_none_after_shutdown() {
        let listener = listener();
        let ctx = ShutdownContext::new();

        let waiter_ctx = ctx.clone();
        let waiter = thread::spawn(move || listener.accept(&waiter_ctx).unwrap().is_none());

        thread::sleep(Duration::from_millis(30));
        ctx.request_shutdown();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_short_response_is_transport_error() {
        let listener = listener();
        let port = listener.local_addr().port();
        let ctx = ShutdownContext::new();

        let server = thread::spawn(move || {
            let mut channel = listener.accept(&ctx).unwrap().unwrap();
            let _ = channel.receive_request().unwrap();
            // Half a length prefix, then hang up.
            channel.stream.write_all(&[0, 0]).unwrap();
        });

        let mut client = Channel::connect("127.0.0.1", port).unwrap();
        let result = client.send_request(&Request::new(RequestKind::Balance, 1));
        server.join().unwrap();

        assert!(matches!(result, Err(ServiceError::Transport { .. })));
    }

    #[test]
    fn test_garbled_request_is_received_as_quit() {
        let listener = listener();
        let port = listener.local_addr().port();
        let ctx = ShutdownContext::new();

        let mut raw = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write_frame(&mut raw, "99|1|0|x|y").unwrap();

        let mut channel = listener.accept(&ctx).unwrap().unwrap();
        assert_eq!(channel.receive_request().unwrap(), Request::quit());
    }

    #[test]
    fn test_wait_for_request_readiness() {
        let listener = listener();
        let port = listener.local_addr().port();
        let ctx = ShutdownContext::new();

        let mut client = Channel::connect("127.0.0.1", port).unwrap();
        let mut server = listener.accept(&ctx).unwrap().unwrap();

        write_frame(&mut client.stream, "3|1|0||").unwrap();
        assert_eq!(server.wait_for_request(&ctx).unwrap(), Readiness::Ready);
        let _ = server.receive_request().unwrap();

        ctx.request_shutdown();
        assert_eq!(server.wait_for_request(&ctx).unwrap(), Readiness::Shutdown);

        drop(client);
        assert_eq!(server.wait_for_request(&ctx).unwrap(), Readiness::Closed);
    }

    #[test]
    fn test_failed_setup_is_dropped_and_accept_continues() {
        let listener = listener();
        let port = listener.local_addr().port();
        let ctx = ShutdownContext::new();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let failed = listener.adopt(Err(ServiceError::transport("accept", "setup failed")), addr);
        assert!(failed.is_none());

        let _client = Channel::connect("127.0.0.1", port).unwrap();
        let channel = listener.accept(&ctx).unwrap().unwrap();
        assert_eq!(channel.poll_interval, Duration::from_millis(10));
    }
}
