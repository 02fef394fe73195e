use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::session::CaptureSession;
use super::types::{CaptureState, ConnectionInfo, FlowDirection};
use crate::error_handling::types::{CaptureError, NetworkError};

const BUF_SIZE: usize = 16 * 1024;

/// Full-duplex proxy feeding a [`CaptureSession`].
///
/// The proxy sits on the server side of the client connection: bytes read
/// from the client are `Inbound`, bytes relayed back from upstream are
/// `Outbound`. Capture failures are logged and never interrupt forwarding.
pub struct TcpCapture {
    session_id: Uuid,
    session: Mutex<CaptureSession>,
    client_to_upstream: AtomicU64,
    upstream_to_client: AtomicU64,
}

impl TcpCapture {
    pub fn new(session: CaptureSession) -> Self {
        Self {
            session_id: session.id(),
            session: Mutex::new(session),
            client_to_upstream: AtomicU64::new(0),
            upstream_to_client: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn session(&self) -> MutexGuard<'_, CaptureSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CaptureState {
        self.session().state()
    }

    pub fn pause(&self) {
        self.session().pause();
    }

    pub fn resume(&self) {
        self.session().resume();
    }

    /// Bytes forwarded so far as (client→upstream, upstream→client).
    pub fn bytes_forwarded(&self) -> (u64, u64) {
        (
            self.client_to_upstream.load(Ordering::Relaxed),
            self.upstream_to_client.load(Ordering::Relaxed),
        )
    }

    fn observe(&self, direction: FlowDirection, data: &[u8]) {
        let counter = match direction {
            FlowDirection::Inbound => &self.client_to_upstream,
            FlowDirection::Outbound => &self.upstream_to_client,
        };
        counter.fetch_add(data.len() as u64, Ordering::Relaxed);

        if let Err(e) = self.session().on_payload(direction, data) {
            error!("[{}] capture of {:?} payload failed: {}", self.session_id, direction, e);
        }
        let preview = &data[..std::cmp::min(data.len(), 64)];
        trace!(
            "[{}] relayed {:?} {} bytes: {}{}",
            self.session_id,
            direction,
            data.len(),
            String::from_utf8_lossy(preview),
            if data.len() > 64 { " ..." } else { "" }
        );
    }

    async fn pump<R, W>(
        self: Arc<Self>,
        mut reader: R,
        mut writer: W,
        direction: FlowDirection,
    ) -> Result<(), NetworkError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        trace!("[{}] {:?} task started", self.session_id, direction);
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await.map_err(NetworkError::StreamError)?;
            if n == 0 {
                trace!("[{}] {:?} EOF; shutting down peer writer", self.session_id, direction);
                self.session().on_shutdown(direction);
                let _ = writer.shutdown().await;
                return Ok(());
            }
            // recorded before the peer can see it, so a reply never precedes its request
            self.observe(direction, &buf[..n]);
            writer
                .write_all(&buf[..n])
                .await
                .map_err(NetworkError::StreamError)?;
        }
    }

    /// Relay between `client` and `upstream` until both directions reach
    /// EOF, capturing every chunk.
    ///
    /// `info` describes the client connection as seen by the proxy. On a
    /// clean finish the capture records the close sequence; on a stream
    /// error it records a reset and the error is returned.
    pub async fn proxy_and_record<C, U>(
        self: Arc<Self>,
        client: C,
        upstream: U,
        info: ConnectionInfo,
    ) -> Result<(), NetworkError>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        U: AsyncRead + AsyncWrite + Send + 'static,
    {
        if let Err(e) = self.session().on_active(Some(info)) {
            error!("[{}] capture activation failed: {}", self.session_id, e);
        }

        let (cr, cw) = tokio::io::split(client);
        let (ur, uw) = tokio::io::split(upstream);

        debug!("[{}] starting tcp proxy", self.session_id);
        let mut set = JoinSet::new();
        set.spawn(Arc::clone(&self).pump(cr, uw, FlowDirection::Inbound));
        set.spawn(Arc::clone(&self).pump(ur, cw, FlowDirection::Outbound));

        let mut failure = None;
        while let Some(res) = set.join_next().await {
            let res = res.map_err(|e| NetworkError::StreamError(io::Error::new(io::ErrorKind::Other, e)));
            if let Err(e) = res.and_then(|inner| inner) {
                if failure.is_none() {
                    set.abort_all();
                    failure = Some(e);
                }
            }
        }

        let (c2u, u2c) = self.bytes_forwarded();
        match failure {
            Some(e) => {
                debug!("[{}] tcp proxy failed after {}/{} bytes: {}", self.session_id, c2u, u2c, e);
                self.session().on_error().map_err(NetworkError::CaptureError)?;
                Err(e)
            }
            None => {
                debug!("[{}] tcp proxy completed, {}/{} bytes", self.session_id, c2u, u2c);
                self.close_capture().map_err(NetworkError::CaptureError)
            }
        }
    }

    pub fn close_capture(&self) -> Result<(), CaptureError> {
        self.session().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::builder::CaptureSessionBuilder;
    use crate::data_capture::tests::{parse_records, MemorySink};
    use crate::pcap::TcpFlags;
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_pair() -> std::io::Result<(TcpStream, TcpStream)> {
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;

        let client = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (server_side, _) = listener.accept().await?;
        let client = client.await.unwrap()?;
        Ok((server_side, client))
    }

    #[tokio::test]
    async fn tcp_proxy_captures_exchange() {
        run_proxy_exchange().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn tcp_proxy_captures_exchange_multi_thread() {
        for _ in 0..20 {
            run_proxy_exchange().await;
        }
    }

    async fn run_proxy_exchange() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (client_server_side, mut client_outside) = tcp_pair().await.unwrap();
        let (upstream_server_side, mut upstream_inside) = tcp_pair().await.unwrap();

        let info = ConnectionInfo::tcp(
            client_server_side.local_addr().unwrap(),
            client_server_side.peer_addr().unwrap(),
            true,
        );

        let sink = MemorySink::new();
        let session = CaptureSessionBuilder::new().build(sink.clone());
        let capture = Arc::new(TcpCapture::new(session));

        let cap2 = Arc::clone(&capture);
        let proxy = tokio::spawn(async move {
            cap2.proxy_and_record(client_server_side, upstream_server_side, info)
                .await
        });

        client_outside.write_all(b"hello").await.expect("write client->upstream");
        let mut buf = [0u8; 16];
        let n = upstream_inside.read(&mut buf).await.expect("read upstream");
        assert_eq!(&buf[..n], b"hello");

        upstream_inside.write_all(b"pong").await.expect("write upstream->client");
        let mut rbuf = [0u8; 16];
        let rn = client_outside.read(&mut rbuf).await.expect("read client");
        assert_eq!(&rbuf[..rn], b"pong");

        // Client closes first; wait for the EOF to reach upstream before
        // upstream closes so the initiator is deterministic.
        client_outside.shutdown().await.ok();
        let eof = upstream_inside.read(&mut buf).await.expect("read upstream eof");
        assert_eq!(eof, 0);
        upstream_inside.shutdown().await.ok();
        drop(upstream_inside);
        drop(client_outside);

        let res = tokio::time::timeout(std::time::Duration::from_secs(2), proxy).await;
        match res {
            Ok(join_res) => join_res.expect("proxy join").expect("proxy ok"),
            Err(_) => panic!("proxy task timed out"),
        }

        assert_eq!(capture.state(), CaptureState::Closed);
        assert_eq!(capture.bytes_forwarded(), (5, 4));
        assert!(sink.close_calls() == 1);

        let records = parse_records(&sink.contents(), true);
        // handshake + 2x(data, ack) + close
        assert_eq!(records.len(), 3 + 4 + 3);
        let data: Vec<_> = records.iter().filter(|r| !r.payload.is_empty()).collect();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].payload, b"hello");
        assert_eq!((data[0].seq, data[0].ack), (1, 1));
        assert_eq!(data[1].payload, b"pong");
        assert_eq!((data[1].seq, data[1].ack), (1, 6));
        // client half-closed first, so its FIN leads
        let fin = &records[7];
        assert_eq!(fin.flags, TcpFlags::FIN_ACK);
        assert_eq!(fin.dst_port, records[0].dst_port);
    }
}
