use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};

fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Yellow.on_default().bold())
		.usage(AnsiColor::Yellow.on_default().bold())
		.literal(AnsiColor::Green.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.error(AnsiColor::Red.on_default().bold())
}

#[derive(Parser, Debug)]
#[command(name = "tabrelay")]
#[command(about = "OpenAI-compatible relay to browser-resident chat sessions")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Settings file (defaults to $TABRELAY_CONFIG, then the user config directory)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Option<Commands>,
}

impl Cli {
	/// The subcommand to run; `serve` when none was given.
	pub fn command(&self) -> Commands {
		self.command
			.clone()
			.unwrap_or(Commands::Serve(ServeArgs::default()))
	}
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
	/// Run the HTTP API and session endpoint (default)
	Serve(ServeArgs),

	/// Load and validate the settings, then print the effective values
	CheckConfig,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ServeArgs {
	/// Address to bind, overriding the settings file
	#[arg(long, value_name = "HOST")]
	pub host: Option<String>,

	/// Port to bind, overriding the settings file
	#[arg(short, long, value_name = "PORT")]
	pub port: Option<u16>,
}
