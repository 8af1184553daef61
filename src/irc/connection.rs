use crate::error::{ChatError, Result};
use crate::irc::message::{MessageKind, ServerMessage};
use crate::irc::queue::MessageQueue;
use crate::irc::receiver::ReceiveLoop;
use crate::irc::transport::{LineWriter, TransportSession};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A joinable chat room. Names compare case-insensitively and are stored
/// lowercased without the leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    name: String,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().trim_start_matches('#').to_lowercase(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name as used on the wire, e.g. `#foo`.
    pub fn irc_name(&self) -> String {
        format!("#{}", self.name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)
    }
}

/// Where to connect and who to authenticate as.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub nickname: String,
    pub password: Option<String>,
}

struct ActiveSession {
    writer: LineWriter,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One logical connection to a chat server.
///
/// All methods take `&self`; wrap the connection in an `Arc` to share it
/// between the task polling messages and tasks issuing commands.
pub struct ChatConnection {
    settings: ConnectionSettings,
    queue: Arc<MessageQueue>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Mutex<Option<ActiveSession>>,
    joined_channels: RwLock<Vec<Channel>>,
}

impl ChatConnection {
    pub fn new(settings: ConnectionSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            queue: Arc::new(MessageQueue::new()),
            state: Arc::new(state),
            session: Mutex::new(None),
            joined_channels: RwLock::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions, including the drop to `Disconnected` when
    /// the server goes away.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Open the socket, send PASS/NICK and start the receive loop.
    ///
    /// Authentication is not awaited: the connection reports `Connected` as
    /// soon as the credentials are written. Calling this while a session is
    /// live is a no-op; a session the server already dropped is torn down
    /// and replaced.
    pub async fn connect(&self) -> Result<()> {
        // Held until the new session is installed so concurrent callers
        // cannot open a second socket.
        let mut session = self.session.lock().await;
        if self.is_live(&session) {
            return Ok(());
        }
        if let Some(stale) = session.take() {
            self.teardown(stale).await;
        }

        self.state.send_replace(ConnectionState::Connecting);
        info!(host = %self.settings.host, port = self.settings.port, "Connecting");
        let transport =
            match TransportSession::open(&self.settings.host, self.settings.port).await {
                Ok(transport) => transport,
                Err(e) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    return Err(e);
                }
            };
        self.install(&mut session, transport);
        drop(session);

        self.finish_connect().await
    }

    /// Like [`connect`](Self::connect), over an already established
    /// transport instead of opening a socket. The transport is dropped if a
    /// session is already live.
    ///
    /// Messages still queued from an earlier session are dropped; after
    /// [`disconnect`](Self::disconnect) they remain poppable until then.
    pub async fn connect_with(&self, transport: TransportSession) -> Result<()> {
        let mut session = self.session.lock().await;
        if self.is_live(&session) {
            return Ok(());
        }
        if let Some(stale) = session.take() {
            self.teardown(stale).await;
        }

        self.state.send_replace(ConnectionState::Connecting);
        self.install(&mut session, transport);
        drop(session);

        self.finish_connect().await
    }

    /// A session whose receive loop is still running.
    fn is_live(&self, session: &Option<ActiveSession>) -> bool {
        session.as_ref().is_some_and(|s| {
            !s.task.is_finished() && self.state() != ConnectionState::Disconnected
        })
    }

    fn install(&self, session: &mut Option<ActiveSession>, transport: TransportSession) {
        // Leftovers from a previous session are discarded.
        self.queue.clear();

        let (reader, writer) = transport.split();
        let cancel = CancellationToken::new();
        let receive_loop =
            ReceiveLoop::new(reader, writer.clone(), self.queue.clone(), cancel.clone());
        let state = self.state.clone();

        let task = tokio::spawn(async move {
            let exit = receive_loop.run().await;
            if exit.is_abnormal() {
                warn!(?exit, "Connection lost");
                state.send_replace(ConnectionState::Disconnected);
            }
        });

        *session = Some(ActiveSession { writer, cancel, task });
    }

    async fn finish_connect(&self) -> Result<()> {
        if let Err(e) = self.authenticate().await {
            warn!("Failed to send credentials: {}", e);
            self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    async fn authenticate(&self) -> Result<()> {
        if let Some(password) = &self.settings.password {
            self.send_line(&format!("PASS {}", password)).await?;
        }
        self.send_line(&format!("NICK {}", self.settings.nickname)).await?;

        // The receive loop may already have seen the socket close.
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        info!(nick = %self.settings.nickname, "Connected");
        Ok(())
    }

    /// Send QUIT, stop the receive loop and release the socket.
    ///
    /// The receive loop has terminated when this returns. Safe to call at any
    /// time, including twice in a row or when never connected.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(active) = session.take() {
            self.teardown(active).await;
        }
    }

    /// Stop a session's receive loop and close its socket. QUIT is only sent
    /// while the server is still there.
    async fn teardown(&self, session: ActiveSession) {
        let was_live = self.state() != ConnectionState::Disconnected;
        self.state.send_replace(ConnectionState::Disconnecting);
        if was_live {
            if let Err(e) = session.writer.write_line("QUIT").await {
                warn!("Failed to send QUIT: {}", e);
            }
        }

        session.cancel.cancel();
        if let Err(e) = session.task.await {
            warn!("Receive loop ended abnormally: {}", e);
        }
        session.writer.close().await;

        self.joined_channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.state.send_replace(ConnectionState::Disconnected);
        info!("Disconnected");
    }

    /// Request to join a channel. Membership is recorded only once the
    /// server confirms; see [`apply_membership`](Self::apply_membership).
    pub async fn join_channel(&self, channel: &Channel) -> Result<()> {
        self.send_line(&format!("JOIN {}", channel.irc_name())).await
    }

    /// Request to leave a channel. Sent as `PART #<name>` with the name
    /// lowercased, the same form JOIN uses.
    pub async fn part_channel(&self, channel: &Channel) -> Result<()> {
        self.send_line(&format!("PART {}", channel.irc_name())).await
    }

    /// Send a chat message. Line breaks in `text` become spaces.
    pub async fn send_chat_message(&self, target: &str, text: &str) -> Result<()> {
        let clean = text.replace(['\r', '\n'], " ");
        self.send_line(&format!("PRIVMSG {} :{}", target.to_lowercase(), clean))
            .await
    }

    /// Send a single raw protocol line.
    pub async fn send_raw(&self, line: &str) -> Result<()> {
        self.send_line(line).await
    }

    async fn send_line(&self, line: &str) -> Result<()> {
        let writer = {
            let session = self.session.lock().await;
            if !self.is_live(&session) {
                return Err(ChatError::NotConnected);
            }
            session.as_ref().map(|s| s.writer.clone()).ok_or(ChatError::NotConnected)?
        };
        writer.write_line(line).await
    }

    pub fn is_message_in_queue(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn pop_server_message(&self) -> Option<ServerMessage> {
        self.queue.try_pop()
    }

    pub fn peek_server_message(&self) -> Option<ServerMessage> {
        self.queue.peek()
    }

    /// Channels the server has confirmed we are in, in join order.
    pub fn joined_channels(&self) -> Vec<Channel> {
        self.joined_channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Update joined channels from a server confirmation.
    ///
    /// Meant to be called by whatever consumes the queue: a JOIN or PART
    /// whose source is our own nickname adds or removes the channel. Returns
    /// whether the message changed membership.
    pub fn apply_membership(&self, message: &ServerMessage) -> bool {
        let is_own = message
            .source_nick()
            .is_some_and(|nick| nick.eq_ignore_ascii_case(&self.settings.nickname));
        if !is_own {
            return false;
        }
        let Some(target) = message.target() else {
            return false;
        };

        let mut joined = self
            .joined_channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut changed = false;
        for name in target.split(',') {
            let channel = Channel::new(name);
            match message.kind() {
                MessageKind::Join if !joined.contains(&channel) => {
                    joined.push(channel);
                    changed = true;
                }
                MessageKind::Part => {
                    let before = joined.len();
                    joined.retain(|c| c != &channel);
                    changed |= joined.len() != before;
                }
                _ => {}
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;

    struct FakeServer {
        lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl FakeServer {
        async fn next_line(&mut self) -> Option<String> {
            tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .expect("timed out waiting for client line")
                .unwrap()
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
        }
    }

    async fn listening(password: Option<&str>) -> (TcpListener, ChatConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = ChatConnection::new(ConnectionSettings {
            host: "127.0.0.1".into(),
            port,
            nickname: "bot".into(),
            password: password.map(|p| p.to_string()),
        });
        (listener, conn)
    }

    async fn accept(listener: &TcpListener) -> FakeServer {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let (read, writer) = stream.into_split();
        FakeServer {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn connected_pair(password: Option<&str>) -> (ChatConnection, FakeServer) {
        let (listener, conn) = listening(password).await;
        let (server, connected) = tokio::join!(accept(&listener), conn.connect());
        connected.unwrap();
        (conn, server)
    }

    async fn wait_for_message(conn: &ChatConnection) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(msg) = conn.pop_server_message() {
                    return msg;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no message queued")
    }

    #[test]
    fn test_channel_normalization() {
        assert_eq!(Channel::new("Foo").irc_name(), "#foo");
        assert_eq!(Channel::new("#FOO"), Channel::new("foo"));
        assert_eq!(Channel::new("Foo").to_string(), "#foo");
    }

    #[tokio::test]
    async fn test_connect_sends_credentials() {
        let (conn, mut server) = connected_pair(Some("oauth:secret")).await;
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(server.next_line().await.as_deref(), Some("PASS oauth:secret"));
        assert_eq!(server.next_line().await.as_deref(), Some("NICK bot"));
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_without_password_skips_pass() {
        let (conn, mut server) = connected_pair(None).await;
        assert_eq!(server.next_line().await.as_deref(), Some("NICK bot"));
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let conn = ChatConnection::new(ConnectionSettings {
            host: "127.0.0.1".into(),
            port,
            nickname: "bot".into(),
            password: None,
        });
        assert!(matches!(conn.connect().await, Err(ChatError::Connection { .. })));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_ping_answered_with_single_pong() {
        let (conn, mut server) = connected_pair(Some("oauth:x")).await;
        server.next_line().await;
        server.next_line().await;

        server.send("PING :tmi.twitch.tv").await;
        assert_eq!(server.next_line().await.as_deref(), Some("PONG :tmi.twitch.tv"));

        // A marker proves no second PONG was written before it.
        conn.send_raw("MARKER").await.unwrap();
        assert_eq!(server.next_line().await.as_deref(), Some("MARKER"));
        assert!(!conn.is_message_in_queue());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_privmsg_is_queued_as_chat() {
        let (conn, mut server) = connected_pair(None).await;
        server
            .send(":user!user@user.tmi.twitch.tv PRIVMSG #chan :hello")
            .await;

        let msg = wait_for_message(&conn).await;
        assert_eq!(msg.kind(), MessageKind::Chat);
        assert_eq!(msg.text(), Some("hello"));
        assert!(conn.pop_server_message().is_none());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_peek_leaves_message_queued() {
        let (conn, mut server) = connected_pair(None).await;
        server.send(":u!u@u PRIVMSG #chan :one").await;

        let popped = wait_for_message(&conn).await;
        server.send(":u!u@u PRIVMSG #chan :two").await;
        let second = wait_for_message(&conn).await;
        assert_eq!(popped.text(), Some("one"));
        assert_eq!(second.text(), Some("two"));

        server.send(":u!u@u PRIVMSG #chan :three").await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !conn.is_message_in_queue() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(conn.peek_server_message().unwrap().text(), Some("three"));
        assert!(conn.is_message_in_queue());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_join_part_and_privmsg_wire_format() {
        let (conn, mut server) = connected_pair(None).await;
        server.next_line().await;

        conn.join_channel(&Channel::new("Foo")).await.unwrap();
        assert_eq!(server.next_line().await.as_deref(), Some("JOIN #foo"));

        conn.part_channel(&Channel::new("Foo")).await.unwrap();
        assert_eq!(server.next_line().await.as_deref(), Some("PART #foo"));

        conn.send_chat_message("#Foo", "hi\r\nQUIT").await.unwrap();
        assert_eq!(server.next_line().await.as_deref(), Some("PRIVMSG #foo :hi  QUIT"));

        // Fire-and-forget: nothing recorded until the server confirms.
        assert!(conn.joined_channels().is_empty());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_membership_follows_server_confirmation() {
        let (conn, mut server) = connected_pair(None).await;
        conn.join_channel(&Channel::new("foo")).await.unwrap();
        server.send(":bot!bot@bot.tmi.twitch.tv JOIN #foo").await;
        server.send(":other!o@o.tmi.twitch.tv JOIN #foo").await;

        let own = wait_for_message(&conn).await;
        let other = wait_for_message(&conn).await;
        assert!(conn.apply_membership(&own));
        assert!(!conn.apply_membership(&other));
        assert!(!conn.apply_membership(&own));
        assert_eq!(conn.joined_channels(), vec![Channel::new("foo")]);

        server.send(":bot!bot@bot.tmi.twitch.tv PART #foo").await;
        let part = wait_for_message(&conn).await;
        assert!(conn.apply_membership(&part));
        assert!(conn.joined_channels().is_empty());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_sends_quit_and_closes() {
        let (conn, mut server) = connected_pair(None).await;
        assert_eq!(server.next_line().await.as_deref(), Some("NICK bot"));

        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(server.next_line().await.as_deref(), Some("QUIT"));
        assert_eq!(server.next_line().await, None);
        assert!(matches!(
            conn.send_chat_message("#foo", "late").await,
            Err(ChatError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_twice_and_when_never_connected() {
        let idle = ChatConnection::new(ConnectionSettings {
            host: "127.0.0.1".into(),
            port: 1,
            nickname: "bot".into(),
            password: None,
        });
        idle.disconnect().await;
        assert_eq!(idle.state(), ConnectionState::Disconnected);

        let (conn, _server) = connected_pair(None).await;
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_server_close_moves_to_disconnected() {
        let (conn, server) = connected_pair(None).await;
        let mut state = conn.subscribe_state();
        drop(server);

        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .expect("state never became Disconnected")
        .unwrap();
        assert!(!conn.is_message_in_queue());
        assert!(matches!(
            conn.send_chat_message("#foo", "anyone?").await,
            Err(ChatError::NotConnected)
        ));
        assert!(matches!(
            conn.join_channel(&Channel::new("foo")).await,
            Err(ChatError::NotConnected)
        ));

        // Still safe to tear down after the loop ended on its own.
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_again_after_server_close() {
        let (listener, conn) = listening(None).await;
        let (first, connected) = tokio::join!(accept(&listener), conn.connect());
        connected.unwrap();

        let mut state = conn.subscribe_state();
        drop(first);
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .expect("state never became Disconnected")
        .unwrap();

        let (mut second, reconnected) = tokio::join!(accept(&listener), conn.connect());
        reconnected.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(second.next_line().await.as_deref(), Some("NICK bot"));

        conn.send_raw("BACK").await.unwrap();
        assert_eq!(second.next_line().await.as_deref(), Some("BACK"));
        second.send(":u!u@u PRIVMSG #chan :welcome back").await;
        assert_eq!(wait_for_message(&conn).await.text(), Some("welcome back"));
        conn.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_connects_open_one_socket() {
        let (listener, conn) = listening(None).await;
        let conn = Arc::new(conn);

        let a = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        let b = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });

        let mut server = accept(&listener).await;
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let extra = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(extra.is_err(), "a second socket was opened");
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(server.next_line().await.as_deref(), Some("NICK bot"));
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let (first, _s1) = connected_pair(None).await;
        let (second, mut s2) = connected_pair(None).await;

        first.disconnect().await;
        assert_eq!(second.state(), ConnectionState::Connected);
        second.send_raw("STILL HERE").await.unwrap();
        s2.next_line().await;
        assert_eq!(s2.next_line().await.as_deref(), Some("STILL HERE"));
        second.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_with_in_memory_transport() {
        let (client, server) = tokio::io::duplex(1024);
        let conn = ChatConnection::new(ConnectionSettings {
            host: "unused".into(),
            port: 0,
            nickname: "bot".into(),
            password: None,
        });
        conn.connect_with(TransportSession::from_stream(client)).await.unwrap();

        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("NICK bot"));
        conn.disconnect().await;
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("QUIT"));
    }
}
