//! Captcha Vision MCP Server entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use captcha_vision_mcp::config::{ConfigOverrides, ServerConfig};
use captcha_vision_mcp::context::ToolContext;
use captcha_vision_mcp::protocol::ProtocolHandler;
use captcha_vision_mcp::tools::ToolRegistry;
use captcha_vision_mcp::transport::StdioTransport;
use captcha_vision_mcp::types::InitializeResult;

#[derive(Parser)]
#[command(
    name = "captcha-vision-mcp",
    about = "MCP server for Captcha Vision: captcha recognition and image preprocessing tools",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Maximum decoded image size in bytes.
    /// Also reads from CAPTCHA_MCP_MAX_IMAGE_SIZE.
    #[arg(long, global = true)]
    max_image_size: Option<usize>,

    /// Maximum decoded image area in pixels (width * height).
    /// Also reads from CAPTCHA_MCP_MAX_IMAGE_PIXELS.
    #[arg(long, global = true)]
    max_image_pixels: Option<u64>,

    /// Recognition program: receives image bytes on stdin, prints text or
    /// {"text", "confidence"} JSON on stdout.
    /// Also reads from CAPTCHA_MCP_RECOGNIZER.
    #[arg(long, global = true)]
    recognizer: Option<String>,

    /// Extra argument for the recognition program (repeatable).
    #[arg(long = "recognizer-arg", global = true, allow_hyphen_values = true)]
    recognizer_args: Vec<String>,

    /// Recognition timeout in seconds.
    /// Also reads from CAPTCHA_MCP_TIMEOUT_SECS.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Attach internal error details to error responses.
    /// Also reads from CAPTCHA_MCP_DEBUG.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (default).
    Serve,

    /// Start MCP server over HTTP with Server-Sent Events.
    #[cfg(feature = "sse")]
    ServeHttp {
        /// Listen address (host:port).
        #[arg(long, default_value = "127.0.0.1:3100")]
        addr: String,
    },

    /// Print server capabilities as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   captcha-vision-mcp completions bash > ~/.local/share/bash-completion/completions/captcha-vision-mcp
    ///   captcha-vision-mcp completions zsh > ~/.zfunc/_captcha-vision-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode.
    Repl,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            max_image_size: self.max_image_size,
            max_image_pixels: self.max_image_pixels,
            recognizer: self.recognizer.clone(),
            recognizer_args: self.recognizer_args.clone(),
            timeout_secs: self.timeout_secs,
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::resolve(&cli.overrides());

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let max_frame_bytes = config.max_frame_bytes;
            let registry = Arc::new(ToolRegistry::new(&config));
            let context = Arc::new(ToolContext::from_config(config));
            tracing::info!(
                "Captcha Vision MCP server (stdio), recognizer: {}",
                context.recognition.name()
            );
            let handler = ProtocolHandler::new(registry, context);
            let transport = StdioTransport::new(handler, max_frame_bytes);
            transport.run().await?;
        }

        #[cfg(feature = "sse")]
        Commands::ServeHttp { addr } => {
            use captcha_vision_mcp::transport::SseTransport;

            let registry = Arc::new(ToolRegistry::new(&config));
            let context = Arc::new(ToolContext::from_config(config));
            tracing::info!(
                "Captcha Vision MCP server (SSE), recognizer: {}",
                context.recognition.name()
            );
            let transport = SseTransport::new(registry, context);
            transport.run(&addr).await?;
        }

        Commands::Info => {
            let registry = ToolRegistry::new(&config);
            let init = InitializeResult::with_tools(registry.list_tools());
            let info = serde_json::json!({
                "server": init.server_info,
                "protocol_version": init.protocol_version,
                "capabilities": init.capabilities,
                "tools": registry.names().collect::<Vec<_>>(),
                "tool_count": init.tools.len(),
                "recognizer": config.recognizer.as_ref().map(|r| r.program.clone()),
                "max_image_bytes": config.max_image_bytes,
                "max_image_pixels": config.max_image_pixels,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(
                shell,
                &mut cmd,
                "captcha-vision-mcp",
                &mut std::io::stdout(),
            );
        }

        Commands::Repl => {
            let registry = ToolRegistry::new(&config);
            let context = ToolContext::from_config(config);
            let runtime = tokio::runtime::Handle::current();
            tokio::task::spawn_blocking(move || {
                captcha_vision_mcp::repl::run(&registry, &context, &runtime)
            })
            .await??;
        }
    }

    Ok(())
}
