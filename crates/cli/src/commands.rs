use std::path::Path;

use anyhow::{Context, Result};
use tabrelay::{Relay, Settings};
use tracing::info;

use crate::cli::{Cli, Commands, ServeArgs};
use crate::server;

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command() {
		Commands::Serve(args) => {
			let settings = effective_settings(cli.config.as_deref(), &args)?;
			server::serve(Relay::new(settings)).await
		}
		Commands::CheckConfig => {
			let settings = effective_settings(cli.config.as_deref(), &ServeArgs::default())?;
			let path = Settings::resolve_path(cli.config.as_deref());
			info!(target = "tabrelay", path = ?path, "settings are valid");
			let rendered =
				serde_json::to_string_pretty(&settings.redacted()).context("Rendering settings")?;
			println!("{rendered}");
			Ok(())
		}
	}
}

/// Settings from file (or defaults) with command-line overrides applied, then validated.
pub fn effective_settings(config: Option<&Path>, args: &ServeArgs) -> Result<Settings> {
	let mut settings = Settings::load(config).context("Loading settings")?;
	if let Some(host) = &args.host {
		settings.server_host = host.clone();
	}
	if let Some(port) = args.port {
		settings.server_port = port;
	}
	settings.validate().context("Validating settings")?;
	Ok(settings)
}
