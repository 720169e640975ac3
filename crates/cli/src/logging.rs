use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Maps `-v` occurrences to a default filter. `RUST_LOG` takes precedence when set.
pub fn default_filter(verbosity: u8) -> &'static str {
	// 0 = lifecycle only (startup, session connect/disconnect, failures)
	// 1 (-v) = per-request info
	// 2+ (-vv) = debug for tabrelay and HTTP tracing
	match verbosity {
		0 => "warn,tabrelay=info,tabrelay_cli=info",
		1 => "info,tower_http=info",
		_ => "debug,hyper=info,h2=info",
	}
}

pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
