//! ServerQuery provider against a scripted TCP peer.

// std
use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use roster_auth::{
	AuthorizationCache, AuthorizationConfig, Error, GroupId, Result, RosterProvider,
	ServerQueryConfig, ServerQueryProvider,
};
use tokio::{
	io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
	net::{TcpListener, TcpStream},
};

const PASSWORD: &str = "s3cr3t pass";
const CLIENT_LIST: &str = "clid=1 client_database_id=11 client_nickname=Alice client_type=0 connection_client_ip=10.0.0.5|clid=2 client_database_id=1 client_nickname=serveradmin client_type=1 connection_client_ip=127.0.0.1|clid=3 client_database_id=13 client_nickname=Carol\\sSmith client_type=0 connection_client_ip=10.0.0.7|clid=4 client_database_id=14 client_nickname=Dave client_type=0";

/// Scripted query peer accepting any number of sessions.
#[derive(Clone, Default)]
struct Peer {
	received: Arc<Mutex<Vec<String>>>,
	connections: Arc<AtomicUsize>,
	slow_groups: Arc<AtomicBool>,
}
impl Peer {
	fn received(&self) -> Vec<String> {
		self.received.lock().unwrap().clone()
	}

	async fn wait_for(&self, command: &str) {
		for _ in 0..100 {
			if self.received().iter().any(|line| line == command) {
				return;
			}

			tokio::time::sleep(Duration::from_millis(10)).await;
		}

		panic!("peer never received {command:?}");
	}

	async fn serve(self, stream: TcpStream) {
		self.connections.fetch_add(1, Ordering::SeqCst);

		let (read, mut write) = stream.into_split();
		let mut lines = BufReader::new(read).lines();

		if write
			.write_all(b"TS3\n\rWelcome to the TeamSpeak 3 ServerQuery interface.\n\r")
			.await
			.is_err()
		{
			return;
		}

		while let Ok(Some(line)) = lines.next_line().await {
			self.received.lock().unwrap().push(line.clone());

			if line.starts_with("servergroupsbyclientid") && self.slow_groups.load(Ordering::SeqCst) {
				tokio::time::sleep(Duration::from_millis(200)).await;
			}
			if write.write_all(reply_for(&line).as_bytes()).await.is_err() || line == "quit" {
				break;
			}
		}
	}
}

async fn spawn_server() -> (ServerQueryConfig, Peer) {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let port = listener.local_addr().expect("local addr").port();
	let peer = Peer::default();

	tokio::spawn({
		let peer = peer.clone();

		async move {
			while let Ok((stream, _)) = listener.accept().await {
				tokio::spawn(peer.clone().serve(stream));
			}
		}
	});

	let config = ServerQueryConfig {
		host: "127.0.0.1".into(),
		port,
		username: "serveradmin".into(),
		password: PASSWORD.into(),
		server_id: 1,
	};

	(config, peer)
}

fn reply_for(command: &str) -> String {
	const OK: &str = "error id=0 msg=ok\n\r";

	if command.starts_with("login ") {
		if command.ends_with("client_login_password=s3cr3t\\spass") {
			return OK.into();
		}

		return "error id=520 msg=invalid\\sloginname\\sor\\spassword\n\r".into();
	}

	match command {
		"use sid=1" | "quit" => OK.into(),
		"clientlist -ip" => format!("{CLIENT_LIST}\n\r{OK}"),
		"servergroupsbyclientid cldbid=11" =>
			format!("name=Admin sgid=6 cldbid=11|name=Guest sgid=8 cldbid=11\n\r{OK}"),
		"servergroupsbyclientid cldbid=14" => format!("name=Mod sgid=9 cldbid=14\n\r{OK}"),
		"servergroupsbyclientid cldbid=13" =>
			"error id=1281 msg=database\\sempty\\sresult\\sset\n\r".into(),
		_ => "error id=256 msg=command\\snot\\sfound\n\r".into(),
	}
}

#[tokio::test]
async fn lists_voice_clients_and_their_groups() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let (config, peer) = spawn_server().await;
	let provider = ServerQueryProvider::new(config);
	let mut session = provider.connect().await?;
	let entities = provider.list_entities(&mut session).await?;

	assert_eq!(entities.len(), 3);
	assert_eq!(entities[0].address.as_deref(), Some("10.0.0.5"));
	assert_eq!(entities[1].display_name.as_deref(), Some("Carol Smith"));
	assert_eq!(entities[2].address, None);

	let groups = provider.list_groups(&mut session, "11").await?;

	assert_eq!(groups, vec![GroupId::from(6_u64), GroupId::from(8_u64)]);
	assert!(provider.list_groups(&mut session, "13").await?.is_empty());

	provider.disconnect(session).await?;
	peer.wait_for("quit").await;

	let received = peer.received();

	assert_eq!(received.first().map(String::as_str), Some(
		"login client_login_name=serveradmin client_login_password=s3cr3t\\spass"
	));
	assert_eq!(received.get(1).map(String::as_str), Some("use sid=1"));
	assert_eq!(received.last().map(String::as_str), Some("quit"));

	Ok(())
}

#[tokio::test]
async fn rejected_login_is_a_connection_error() {
	let (mut config, _peer) = spawn_server().await;

	config.password = "wrong".into();

	let provider = ServerQueryProvider::new(config);

	match provider.connect().await {
		Err(Error::Connection { reason, .. }) => assert!(reason.contains("520")),
		other => panic!("expected connection error, got {:?}", other.map(|_| ())),
	}
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let port = listener.local_addr().expect("local addr").port();

	drop(listener);

	let provider = ServerQueryProvider::new(ServerQueryConfig {
		host: "127.0.0.1".into(),
		port,
		..ServerQueryConfig::default()
	});

	assert!(matches!(provider.connect().await, Err(Error::Connection { .. })));
}

#[tokio::test]
async fn cache_refreshes_through_server_query() -> Result<()> {
	let (server_config, _peer) = spawn_server().await;
	let config = AuthorizationConfig {
		server: server_config.clone(),
		call_timeout: Duration::from_secs(2),
		..AuthorizationConfig::default()
	};
	let cache = AuthorizationCache::new(config, ServerQueryProvider::new(server_config))?;
	let summary = cache.refresh_now().await?;

	assert_eq!(summary.entities_seen, 3);
	assert_eq!(summary.entities_skipped, 1);
	assert!(cache.is_authorized("10.0.0.5"));
	assert!(!cache.is_authorized("10.0.0.7"));
	assert!(!cache.is_authorized("127.0.0.1"));

	cache.stop().await;

	Ok(())
}

#[tokio::test]
async fn abandoned_refresh_does_not_desync_the_next_one() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();
	let (server_config, peer) = spawn_server().await;
	let config = AuthorizationConfig {
		server: server_config.clone(),
		call_timeout: Duration::from_secs(2),
		..AuthorizationConfig::default()
	};
	let cache = AuthorizationCache::new(config, ServerQueryProvider::new(server_config))?;

	cache.refresh_now().await?;

	assert!(cache.is_authorized("10.0.0.5"));

	peer.slow_groups.store(true, Ordering::SeqCst);

	// The caller gives up while the group reply is still on the wire.
	assert!(tokio::time::timeout(Duration::from_millis(50), cache.refresh_now()).await.is_err());

	peer.slow_groups.store(false, Ordering::SeqCst);
	tokio::time::sleep(Duration::from_millis(300)).await;

	let summary = cache.refresh_now().await?;

	assert_eq!(summary.entities_seen, 3);
	assert_eq!(summary.authorized, 1);
	assert!(cache.is_authorized("10.0.0.5"));
	assert_eq!(peer.connections.load(Ordering::SeqCst), 2);

	cache.stop().await;

	Ok(())
}
