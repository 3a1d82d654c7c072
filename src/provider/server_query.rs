//! [`RosterProvider`] backed by a TeamSpeak-style ServerQuery session over TCP.

// crates.io
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
// self
use crate::{
	_prelude::*,
	config::ServerQueryConfig,
	provider::{
		GroupId, RosterEntity, RosterProvider,
		wire::{self, EMPTY_RESULT_SET, Record, Status},
	},
};

/// Upper bound for a single reply line; a full client listing arrives on one line.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

const GREETING: &str = "TS3";
const VOICE_CLIENT_TYPE: &str = "0";

/// Opens authenticated query sessions against the configured server.
#[derive(Clone, Debug)]
pub struct ServerQueryProvider {
	config: ServerQueryConfig,
}
impl ServerQueryProvider {
	/// Build a provider for the given connection settings.
	pub fn new(config: ServerQueryConfig) -> Self {
		Self { config }
	}

	/// Connection settings in use.
	pub fn config(&self) -> &ServerQueryConfig {
		&self.config
	}
}
#[async_trait::async_trait]
impl RosterProvider for ServerQueryProvider {
	type Session = ServerQuerySession;

	async fn connect(&self) -> Result<ServerQuerySession> {
		let endpoint = self.config.endpoint();
		let fail = |reason: String| Error::Connection { endpoint: endpoint.clone(), reason };
		let stream = TcpStream::connect((self.config.host.as_str(), self.config.port))
			.await
			.map_err(|err| fail(err.to_string()))?;
		let mut session = ServerQuerySession {
			framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
		};

		session.handshake(&self.config).await.map_err(|err| fail(err.to_string()))?;

		tracing::info!(endpoint = %endpoint, server_id = self.config.server_id, "connected to roster source");

		Ok(session)
	}

	async fn disconnect(&self, mut session: ServerQuerySession) -> Result<()> {
		// The server closes the socket after acknowledging; dropping the session finishes our side.
		session.framed.send("quit").await?;

		tracing::info!(endpoint = %self.config.endpoint(), "disconnected from roster source");

		Ok(())
	}

	async fn list_entities(&self, session: &mut ServerQuerySession) -> Result<Vec<RosterEntity>> {
		let records = session.execute("clientlist -ip").await?;
		let entities: Vec<RosterEntity> = records
			.into_iter()
			.filter(|record| record.get("client_type").map(String::as_str) == Some(VOICE_CLIENT_TYPE))
			.map(entity_from_record)
			.collect();

		tracing::info!(count = entities.len(), "retrieved connected clients");

		Ok(entities)
	}

	async fn list_groups(
		&self,
		session: &mut ServerQuerySession,
		entity_key: &str,
	) -> Result<Vec<GroupId>> {
		let command = format!("servergroupsbyclientid cldbid={}", wire::escape(entity_key));

		match session.execute(&command).await {
			Ok(records) =>
				Ok(records.iter().filter_map(|record| record.get("sgid")).map(GroupId::new).collect()),
			Err(Error::Query { id: EMPTY_RESULT_SET, .. }) => Ok(Vec::new()),
			Err(err) => Err(err),
		}
	}
}

/// Line-framed query connection.
#[derive(Debug)]
pub struct ServerQuerySession {
	framed: Framed<TcpStream, LinesCodec>,
}
impl ServerQuerySession {
	async fn handshake(&mut self, config: &ServerQueryConfig) -> Result<()> {
		let greeting = self.read_line().await?;

		if greeting != GREETING {
			return Err(Error::SessionBroken(format!("Unexpected greeting '{greeting}'.")));
		}

		// Welcome banner.
		self.read_line().await?;
		self.execute(&format!(
			"login client_login_name={} client_login_password={}",
			wire::escape(&config.username),
			wire::escape(&config.password)
		))
		.await?;
		self.execute(&format!("use sid={}", config.server_id)).await?;

		Ok(())
	}

	/// Send one command and collect its data records, failing on a non-zero status.
	async fn execute(&mut self, command: &str) -> Result<Vec<Record>> {
		self.framed.send(command).await?;

		let mut data = Vec::new();

		loop {
			let line = self.read_line().await?;

			if let Some(status) = Status::parse(&line) {
				status.into_result()?;

				return Ok(wire::parse_records(data.iter().map(String::as_str)));
			}
			if line.starts_with("notify") {
				continue;
			}

			data.push(line);
		}
	}

	async fn read_line(&mut self) -> Result<String> {
		loop {
			match self.framed.next().await {
				Some(Ok(line)) => {
					let line = wire::normalize_line(&line);

					if !line.is_empty() {
						return Ok(line.to_owned());
					}
				},
				Some(Err(err)) => return Err(err.into()),
				None => return Err(Error::SessionBroken("Connection closed by remote.".into())),
			}
		}
	}
}

fn entity_from_record(mut record: Record) -> RosterEntity {
	let mut take = |key: &str| record.remove(key).filter(|value| !value.is_empty());

	RosterEntity {
		address: take("connection_client_ip"),
		display_name: take("client_nickname"),
		entity_key: take("client_database_id"),
		session_id: take("clid"),
	}
}
