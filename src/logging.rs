use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Transport mode for the MCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// stdio transport (default), for local MCP clients
    Stdio,
    /// Streamable HTTP transport, for remote/web access
    Stream,
}

/// Initialize logging based on transport mode.
///
/// stdio mode must not write to stderr unless a log file was requested:
/// stderr output during the handshake shows up as "connection closed" in
/// MCP clients. Stream mode always logs to stderr and optionally to a
/// file as well.
pub fn init_logging(
    mode: TransportMode,
    log_file: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    match (mode, log_file) {
        (TransportMode::Stdio, Some(filename)) => init_layers(Some(filename), false)?,
        (TransportMode::Stdio, None) => {} // no logging at all
        (TransportMode::Stream, filename) => init_layers(filename, true)?,
    }
    Ok(())
}

fn init_layers(
    log_file: Option<String>,
    console: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let file_layer = match log_file {
        Some(filename) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&filename)?;
            Some(fmt::layer().with_writer(file).with_ansi(false))
        }
        None => None,
    };

    let console_layer = console.then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();
    Ok(())
}
