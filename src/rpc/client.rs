// ABOUTME: Async HTSP RPC client: session handshake, sequence demultiplexing, event dispatch
// ABOUTME: One reader task owns the socket's read half; callers serialize writes through a mutex

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use sha1::{Digest, Sha1};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::htsmsg::Value;
use crate::rpc::epg;
use crate::rpc::events::{EventBus, EventHandler, HtspEvent};
use crate::rpc::session::{Session, SessionPhase, CLIENT_HTSP_VERSION, CLIENT_NAME, MIN_HTSP_VERSION};
use crate::transport::{self, FrameWriter};
use crate::{Error, Result};

type WaiterTable = StdMutex<HashMap<i64, oneshot::Sender<Value>>>;

struct Credentials {
    username: String,
    digest: Vec<u8>,
}

struct Inner {
    config: Config,
    session: StdMutex<Session>,
    /// Serializes session establishment so concurrent callers racing into
    /// a fresh connection produce exactly one `hello`/`authenticate` pair.
    auth_lock: AsyncMutex<()>,
    writer: AsyncMutex<Option<FrameWriter>>,
    waiters: WaiterTable,
    credentials: StdMutex<Option<Credentials>>,
    events: EventBus,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
}

/// Handle to one HTSP server connection. Cheap to clone; clones share the
/// same socket, session state and waiter table.
#[derive(Clone)]
pub struct HtspClient {
    inner: Arc<Inner>,
}

impl HtspClient {
    pub fn new(config: Config) -> HtspClient {
        HtspClient {
            inner: Arc::new(Inner {
                config,
                session: StdMutex::new(Session::default()),
                auth_lock: AsyncMutex::new(()),
                writer: AsyncMutex::new(None),
                waiters: StdMutex::new(HashMap::new()),
                credentials: StdMutex::new(None),
                events: EventBus::new(),
                reader_task: StdMutex::new(None),
                active: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Whether the host wants recording-details canonicalization deferred
    /// to its own hook before the built-in title/subtitle rules run.
    pub fn custom_processing(&self) -> bool {
        self.inner.config.custom_processing
    }

    /// Default chunk size for a VFS read that didn't request a specific
    /// size, mirroring the ambient I/O chunk-size setting.
    pub fn io_chunk_size(&self) -> usize {
        self.inner.config.io_chunk_size
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.inner.events.subscribe(handler);
    }

    pub fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) {
        self.inner.events.unsubscribe(handler);
    }

    /// Establishes the session if needed (lazily, on first demand) and
    /// reconnects if the previous connection was lost. Idempotent and
    /// safe under concurrent callers.
    pub async fn start(&self) -> Result<()> {
        self.ensure_session().await
    }

    /// Tears the connection down: fails every outstanding waiter, stops
    /// the reader task, marks the session `Idle`.
    pub async fn stop(&self) -> Result<()> {
        self.inner.active.store(false, Ordering::SeqCst);

        if let Some(handle) = self.inner.reader_task.lock().unwrap().take() {
            handle.abort();
        }
        *self.inner.writer.lock().await = None;
        self.fail_all_waiters();
        self.inner.session.lock().unwrap().phase = SessionPhase::Idle;
        Ok(())
    }

    pub async fn get_server_name(&self) -> Result<String> {
        self.ensure_session().await?;
        Ok(self
            .inner
            .session
            .lock()
            .unwrap()
            .server_name
            .clone()
            .unwrap_or_default())
    }

    pub async fn get_server_version(&self) -> Result<String> {
        self.ensure_session().await?;
        Ok(self
            .inner
            .session
            .lock()
            .unwrap()
            .server_version
            .clone()
            .unwrap_or_default())
    }

    /// Starts the server's initial-sync event burst. Issued once the
    /// session is up; the manager relies on the subsequent
    /// `*Add`/`*Update`/`initialSyncCompleted` events to seed its cache.
    pub async fn enable_async_metadata(&self) -> Result<()> {
        self.call("enableAsyncMetadata", vec![]).await?;
        Ok(())
    }

    pub async fn get_channel_name(&self, channel_id: i64) -> Result<String> {
        let channel_get_supported = self.inner.session.lock().unwrap().channel_get_supported;
        if channel_get_supported {
            let response = self
                .call("getChannel", vec![("channelId".to_string(), Value::S64(channel_id as i128))])
                .await?;
            response
                .get("channelName")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Value("getChannel response missing channelName".into()))
        } else {
            self.inner
                .session
                .lock()
                .unwrap()
                .channel_cache
                .get(&channel_id)
                .cloned()
                .ok_or_else(|| Error::Value(format!("channel id {channel_id} is not cached")))
        }
    }

    pub async fn get_epg_event_details(&self, event_id: i64) -> Result<Value> {
        self.call("getEvent", vec![("eventId".to_string(), Value::S64(event_id as i128))])
            .await
            .map_err(|_| Error::Value("no EPG event matched the given ID".into()))
    }

    pub async fn get_epg_details(
        &self,
        channel: i64,
        start: i64,
        stop: Option<i64>,
        title: Option<&str>,
    ) -> Result<Value> {
        let client = self.clone();
        epg::search_epg_details(start, stop, title, move |cursor, max_time| {
            let client = client.clone();
            async move {
                let mut params = vec![
                    ("channelId".to_string(), Value::S64(channel as i128)),
                    ("numFollowing".to_string(), Value::S64(10)),
                ];
                if let Some(cursor) = cursor {
                    params.push(("eventId".to_string(), Value::S64(cursor as i128)));
                }
                if let Some(max_time) = max_time {
                    params.push(("maxTime".to_string(), Value::S64(max_time as i128)));
                }
                client.call("getEvents", params).await
            }
        })
        .await
    }

    pub async fn file_open(&self, path: &str) -> Result<i64> {
        let response = self
            .call("fileOpen", vec![("file".to_string(), Value::str(path))])
            .await?;
        response
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Value("fileOpen response missing id".into()))
    }

    pub async fn file_read(&self, handle_id: i64, size: i64) -> Result<Vec<u8>> {
        let response = self
            .call(
                "fileRead",
                vec![
                    ("id".to_string(), Value::S64(handle_id as i128)),
                    ("size".to_string(), Value::S64(size as i128)),
                ],
            )
            .await?;
        Ok(response.get("data").and_then(Value::as_bin).unwrap_or_default().to_vec())
    }

    pub async fn file_seek(&self, handle_id: i64, offset: i64) -> Result<i64> {
        let response = self
            .call(
                "fileSeek",
                vec![
                    ("id".to_string(), Value::S64(handle_id as i128)),
                    ("offset".to_string(), Value::S64(offset as i128)),
                    ("whence".to_string(), Value::str("SEEK_SET")),
                ],
            )
            .await?;
        response
            .get("offset")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Value("fileSeek response missing offset".into()))
    }

    pub async fn file_stat(&self, handle_id: i64) -> Result<(i64, i64)> {
        let response = self
            .call("fileStat", vec![("id".to_string(), Value::S64(handle_id as i128))])
            .await?;
        let size = response.get("size").and_then(Value::as_i64).unwrap_or(0);
        let mtime = response.get("mtime").and_then(Value::as_i64).unwrap_or(0);
        Ok((size, mtime))
    }

    pub async fn file_close(&self, handle_id: i64) -> Result<()> {
        self.call("fileClose", vec![("id".to_string(), Value::S64(handle_id as i128))])
            .await?;
        Ok(())
    }

    /// Generic RPC call. Any method other than `hello` / `authenticate`
    /// first forces session establishment.
    pub async fn call(&self, method: &str, params: Vec<(String, Value)>) -> Result<Value> {
        if method != "hello" && method != "authenticate" {
            self.ensure_session().await?;
        }
        self.send_and_wait(method, params).await
    }

    async fn ensure_session(&self) -> Result<()> {
        let _guard = self.inner.auth_lock.lock().await;

        if self.inner.session.lock().unwrap().phase == SessionPhase::Authenticated
            && self.inner.active.load(Ordering::SeqCst)
        {
            return Ok(());
        }

        self.establish_session().await
    }

    async fn establish_session(&self) -> Result<()> {
        self.inner.session.lock().unwrap().reset_for_reconnect();

        let (reader, writer) = transport::connect_split(
            &self.inner.config.listener_address,
            self.inner.config.ip_family,
            self.inner.config.socket_data_timeout,
        )
        .await?;
        *self.inner.writer.lock().await = Some(writer);
        self.inner.active.store(true, Ordering::SeqCst);
        *self.inner.credentials.lock().unwrap() = None;

        let client_for_reader = self.clone();
        let handle = tokio::spawn(async move {
            client_for_reader.run_reader(reader).await;
        });
        *self.inner.reader_task.lock().unwrap() = Some(handle);

        let hello_response = self
            .send_and_wait(
                "hello",
                vec![
                    ("htspversion".to_string(), Value::S64(CLIENT_HTSP_VERSION as i128)),
                    ("clientname".to_string(), Value::str(CLIENT_NAME)),
                    ("clientversion".to_string(), Value::str(env!("CARGO_PKG_VERSION"))),
                ],
            )
            .await?;

        let htspversion = hello_response
            .get("htspversion")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Protocol("hello response missing htspversion".into()))?;
        if htspversion < MIN_HTSP_VERSION {
            return Err(Error::Protocol("Tvheadend indicated HTSP version is too old".into()));
        }

        let server_name = hello_response
            .get("servername")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let server_version = hello_response
            .get("serverversion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.inner
            .session
            .lock()
            .unwrap()
            .note_hello(htspversion, server_name, server_version);

        if let (Some(user), Some(password)) = (&self.inner.config.user, &self.inner.config.password) {
            let challenge = hello_response
                .get("challenge")
                .and_then(Value::as_bin)
                .unwrap_or_default();
            let mut hasher = Sha1::new();
            hasher.update(password.as_bytes());
            hasher.update(challenge);
            let digest = hasher.finalize().to_vec();

            *self.inner.credentials.lock().unwrap() = Some(Credentials {
                username: user.clone(),
                digest,
            });

            let auth_response = self.send_and_wait("authenticate", vec![]).await?;
            if auth_response.has("noaccess") {
                return Err(Error::Protocol("Tvheadend denied access".into()));
            }
        }

        let mut session = self.inner.session.lock().unwrap();
        session.phase = SessionPhase::Authenticated;
        let needs_channel_cache = !session.channel_get_supported;
        drop(session);

        if needs_channel_cache {
            self.subscribe(Arc::new(ChannelCacheHandler {
                client: self.clone(),
            }));
        }

        Ok(())
    }

    async fn send_and_wait(&self, method: &str, params: Vec<(String, Value)>) -> Result<Value> {
        let seq = self.inner.session.lock().unwrap().next_seq();

        let mut fields = vec![
            ("method".to_string(), Value::str(method)),
            ("seq".to_string(), Value::S64(seq as i128)),
        ];
        fields.extend(params);
        if let Some(credentials) = self.inner.credentials.lock().unwrap().as_ref() {
            fields.push(("username".to_string(), Value::str(credentials.username.clone())));
            fields.push(("digest".to_string(), Value::Bin(credentials.digest.clone())));
        }
        let message = Value::Map(fields);

        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().unwrap().insert(seq, tx);

        let write_result = {
            let mut writer = self.inner.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => writer.write_message(&message).await,
                None => Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "no active connection",
                ))),
            }
        };
        if let Err(err) = write_result {
            self.inner.waiters.lock().unwrap().remove(&seq);
            return Err(err);
        }

        let timeout = self.inner.config.socket_data_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error").and_then(Value::as_str) {
                    Err(Error::Protocol(error.to_string()))
                } else {
                    Ok(response)
                }
            }
            Ok(Err(_)) => Err(Error::Transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "session lost while waiting for response",
            ))),
            Err(_) => {
                self.inner.waiters.lock().unwrap().remove(&seq);
                Err(Error::Timeout)
            }
        }
    }

    fn fail_all_waiters(&self) {
        let mut waiters = self.inner.waiters.lock().unwrap();
        waiters.clear();
    }

    async fn run_reader(&self, mut reader: transport::FrameReader) {
        loop {
            match reader.read_message().await {
                Ok(Some(message)) => self.dispatch_incoming(message),
                Ok(None) => {
                    tracing::warn!("htsp connection closed by peer");
                    self.mark_lost();
                    return;
                }
                Err(err) => {
                    tracing::error!(error = %err, "htsp reader failed");
                    self.mark_lost();
                    return;
                }
            }
        }
    }

    fn dispatch_incoming(&self, message: Value) {
        if let Some(seq) = message.get("seq").and_then(Value::as_i64) {
            let waiter = self.inner.waiters.lock().unwrap().remove(&seq);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(message);
                }
                None => tracing::warn!(seq, "htsp response with unknown seq dropped"),
            }
            return;
        }

        if let Some(method) = message.get("method").and_then(Value::as_str) {
            self.inner.events.dispatch(HtspEvent {
                method: method.to_string(),
                fields: message,
            });
        }
    }

    fn mark_lost(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.session.lock().unwrap().phase = SessionPhase::LostConnection;
        self.fail_all_waiters();
    }
}

/// Maintains the channel-name cache for servers that predate `getChannel`.
/// Registered once, during session establishment, only when the
/// negotiated `htspversion` doesn't support the direct call.
struct ChannelCacheHandler {
    client: HtspClient,
}

impl EventHandler for ChannelCacheHandler {
    fn handle(&self, event: &HtspEvent) {
        let mut session = self.client.inner.session.lock().unwrap();
        match event.method.as_str() {
            "channelAdd" | "channelUpdate" => {
                if let (Some(id), Some(name)) = (
                    event.field("channelId").and_then(Value::as_i64),
                    event.field("channelName").and_then(Value::as_str),
                ) {
                    session.channel_cache.insert(id, name.to_string());
                }
            }
            "channelDelete" => {
                if let Some(id) = event.field("channelId").and_then(Value::as_i64) {
                    session.channel_cache.remove(&id);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::htsmsg;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Duration;

    fn test_config(addr: String) -> Config {
        Config {
            listener_address: addr,
            socket_data_timeout: Duration::from_secs(2),
            ..Config::default()
        }
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> Value {
        let mut len_buf = [0u8; 4];
        socket.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        socket.read_exact(&mut body).await.unwrap();
        let mut framed = len_buf.to_vec();
        framed.extend(body);
        htsmsg::decode(&framed).unwrap()
    }

    async fn write_response(socket: &mut tokio::net::TcpStream, fields: Value) {
        let encoded = htsmsg::encode(&fields).unwrap();
        socket.write_all(&encoded).await.unwrap();
    }

    #[tokio::test]
    async fn hello_handshake_populates_server_identity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(vec![1, 2, 3])),
                ]),
            )
            .await;
            std::future::pending::<()>().await;
        });

        let client = HtspClient::new(test_config(addr.to_string()));
        let name = client.get_server_name().await.unwrap();
        assert_eq!(name, "tvheadend");
        let version = client.get_server_version().await.unwrap();
        assert_eq!(version, "4.3");
    }

    #[tokio::test]
    async fn authenticate_sends_sha1_of_password_and_challenge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let challenge = vec![9u8, 8, 7, 6];
        let challenge_for_server = challenge.clone();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(challenge_for_server)),
                ]),
            )
            .await;

            let auth = read_request(&mut socket).await;
            let seq = auth.get("seq").and_then(Value::as_i64).unwrap();
            let digest = auth.get("digest").and_then(Value::as_bin).unwrap().to_vec();

            let mut hasher = Sha1::new();
            hasher.update(b"secret");
            hasher.update(&challenge);
            assert_eq!(digest, hasher.finalize().to_vec());

            write_response(&mut socket, Value::map([("seq", Value::S64(seq as i128))])).await;
            std::future::pending::<()>().await;
        });

        let mut config = test_config(addr.to_string());
        config.user = Some("alice".to_string());
        config.password = Some("secret".to_string());

        let client = HtspClient::new(config);
        client.start().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_calls_demultiplex_by_seq_even_out_of_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(vec![])),
                ]),
            )
            .await;

            let req_a = read_request(&mut socket).await;
            let req_b = read_request(&mut socket).await;
            let seq_a = req_a.get("seq").and_then(Value::as_i64).unwrap();
            let seq_b = req_b.get("seq").and_then(Value::as_i64).unwrap();

            // Reply to B first, then A: demux must not mix them up.
            write_response(
                &mut socket,
                Value::map([("seq", Value::S64(seq_b as i128)), ("tag", Value::str("B"))]),
            )
            .await;
            write_response(
                &mut socket,
                Value::map([("seq", Value::S64(seq_a as i128)), ("tag", Value::str("A"))]),
            )
            .await;
            std::future::pending::<()>().await;
        });

        let client = HtspClient::new(test_config(addr.to_string()));
        client.start().await.unwrap();

        let client_a = client.clone();
        let client_b = client.clone();
        let (result_a, result_b) = tokio::join!(
            client_a.call("getSomethingA", vec![]),
            client_b.call("getSomethingB", vec![])
        );

        assert_eq!(result_a.unwrap().get("tag").and_then(Value::as_str), Some("A"));
        assert_eq!(result_b.unwrap().get("tag").and_then(Value::as_str), Some("B"));
    }

    #[tokio::test]
    async fn error_field_in_response_fails_the_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(vec![])),
                ]),
            )
            .await;

            let req = read_request(&mut socket).await;
            let seq = req.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([("seq", Value::S64(seq as i128)), ("error", Value::str("boom"))]),
            )
            .await;
            std::future::pending::<()>().await;
        });

        let client = HtspClient::new(test_config(addr.to_string()));
        let err = client.call("getChannel", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn call_times_out_and_removes_its_waiter() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(vec![])),
                ]),
            )
            .await;
            std::future::pending::<()>().await;
        });

        let mut config = test_config(addr.to_string());
        config.socket_data_timeout = Duration::from_millis(100);
        let client = HtspClient::new(config);

        let err = client.call("getChannel", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(client.inner.waiters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_seq_response_is_dropped_not_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(vec![])),
                ]),
            )
            .await;

            // A response for a seq nobody is waiting on.
            write_response(&mut socket, Value::map([("seq", Value::S64(9999))])).await;
            std::future::pending::<()>().await;
        });

        let client = HtspClient::new(test_config(addr.to_string()));
        client.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.inner.waiters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_events_dispatch_to_subscribers() {
        struct Counter(Arc<AtomicUsize>);
        impl EventHandler for Counter {
            fn handle(&self, _event: &HtspEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(vec![])),
                ]),
            )
            .await;

            write_response(
                &mut socket,
                Value::map([
                    ("method", Value::str("dvrEntryAdd")),
                    ("id", Value::S64(7)),
                ]),
            )
            .await;
            std::future::pending::<()>().await;
        });

        let count = Arc::new(AtomicUsize::new(0));
        let client = HtspClient::new(test_config(addr.to_string()));
        client.subscribe(Arc::new(Counter(count.clone())));
        client.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnect_after_server_close_resets_seq() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First connection: reply to hello, then drop.
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(vec![])),
                ]),
            )
            .await;
            drop(socket);

            // Second connection: expect a fresh hello with seq == 0 again.
            let (mut socket, _) = listener.accept().await.unwrap();
            let hello = read_request(&mut socket).await;
            assert_eq!(hello.get("seq").and_then(Value::as_i64), Some(0));
            let seq = hello.get("seq").and_then(Value::as_i64).unwrap();
            write_response(
                &mut socket,
                Value::map([
                    ("seq", Value::S64(seq as i128)),
                    ("htspversion", Value::S64(25)),
                    ("servername", Value::str("tvheadend")),
                    ("serverversion", Value::str("4.3")),
                    ("challenge", Value::Bin(vec![])),
                ]),
            )
            .await;
            std::future::pending::<()>().await;
        });

        let client = HtspClient::new(test_config(addr.to_string()));
        client.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // First connection is now closed; the next call must reconnect.
        let name = client.get_server_name().await.unwrap();
        assert_eq!(name, "tvheadend");
    }
}
