pub mod handlers;
pub mod ticker;

use std::path::PathBuf;
use std::sync::Arc;

use procpilot_ipc::{ConnectionRegistry, Inbound, SupervisorPaths};
use procpilot_supervisor::{ProcessHost, ServiceManager, TmuxHost};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use crate::config::{self, GlobalConfig};
use handlers::Outcome;
use ticker::Ticker;

/// Everything the supervisor loop owns. Built once at startup and only
/// touched from the loop, so nothing here needs a lock.
pub struct SupervisorContext {
	connections: ConnectionRegistry,
	manager: ServiceManager,
	registry_path: PathBuf,
}

impl SupervisorContext {
	pub fn new(connections: ConnectionRegistry, manager: ServiceManager, registry_path: PathBuf) -> Self {
		Self {
			connections,
			manager,
			registry_path,
		}
	}

	pub fn connections(&self) -> &ConnectionRegistry {
		&self.connections
	}

	pub fn manager(&self) -> &ServiceManager {
		&self.manager
	}

	/// One loop iteration: socket I/O and dispatch, then the service pass.
	pub fn tick(&mut self) {
		for inbound in self.connections.poll() {
			self.dispatch(inbound);
		}
		for id in self.manager.tick() {
			tracing::info!("auto-started {}", id);
		}
	}

	fn dispatch(&mut self, inbound: Inbound) {
		let Inbound { connection, packet } = inbound;
		if !self.connections.is_open(connection) {
			return;
		}
		match handlers::handle(&mut self.manager, &self.registry_path, &packet) {
			Outcome::Nothing => {}
			Outcome::Close => self.connections.close(connection),
			Outcome::Reply(replies) => {
				for reply in &replies {
					if let Err(e) = self.connections.send(connection, reply) {
						tracing::warn!("failed to reply to connection {}: {}", connection, e);
						break;
					}
				}
			}
		}
	}
}

fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run(paths: &SupervisorPaths, config: GlobalConfig) {
	init_tracing();

	let socket_path = config.socket_path();
	let connections = match ConnectionRegistry::bind(&socket_path, config.client_timeout(), config.write_timeout()) {
		Ok(c) => c,
		Err(e) => {
			tracing::error!("failed to bind {}: {}", socket_path.display(), e);
			std::process::exit(1);
		}
	};

	let host: Arc<dyn ProcessHost> = Arc::new(TmuxHost::default());
	let mut manager = ServiceManager::new(config.service_settings(paths), host);
	let registry_path = config.registry_path(paths);
	if let Err(e) = manager.load_registry(&registry_path) {
		tracing::warn!("starting with no services: {}", e);
	}

	let mut sigterm = match signal(SignalKind::terminate()) {
		Ok(s) => s,
		Err(e) => {
			tracing::error!("failed to install SIGTERM handler: {}", e);
			std::process::exit(1);
		}
	};

	// Written once SIGTERM is handled, since `procpilot shutdown` signals it.
	let state_dir = paths.state_dir();
	let _ = std::fs::create_dir_all(&state_dir);
	let pid_path = paths.pid_path();
	let _ = std::fs::write(&pid_path, std::process::id().to_string());

	let mut ctx = SupervisorContext::new(connections, manager, registry_path);
	let mut ticker = Ticker::new(config.tick_interval());
	tracing::info!(
		"supervisor started (pid {}, {} services, tick {:?})",
		std::process::id(),
		ctx.manager().len(),
		ticker.period()
	);

	loop {
		tokio::select! {
			_ = ticker.tick() => ctx.tick(),
			_ = tokio::signal::ctrl_c() => {
				tracing::info!("interrupted, shutting down");
				break;
			}
			_ = sigterm.recv() => {
				tracing::info!("terminated, shutting down");
				break;
			}
		}
	}

	tracing::info!("removing {}", ctx.connections().socket_path().display());
	// Dropping the context removes the socket file.
	drop(ctx);
	let _ = std::fs::remove_file(&pid_path);
}

/// Loads configuration and runs the supervisor in the foreground.
pub fn start(paths: &SupervisorPaths) {
	let config = config::load_global_config(paths);
	let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("failed to start runtime: {}", e);
			std::process::exit(1);
		}
	};
	runtime.block_on(run(paths, config));
}
