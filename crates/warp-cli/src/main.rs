use clap::{Parser, Subcommand, ValueEnum};

mod commands;
mod transport;

#[derive(Parser)]
#[command(
    name = "warp",
    about = "WarpGrid — resolve resources through a virtual loader",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a URI through the handler chain described by vfs.toml.
    ///
    /// Handlers are tried in file order; the first one that claims the URI
    /// produces the result. Exits non-zero when the request fails.
    Fetch {
        /// Resource URI (e.g. mem://hello.txt, asset://logo.png, file:///etc/hosts)
        uri: String,
        /// Loader configuration
        #[arg(short, long, default_value = "vfs.toml")]
        config: String,
        /// Request metadata entry, repeatable
        #[arg(short = 'H', long = "header", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,
        /// Request id used for correlation
        #[arg(long, default_value_t = 1)]
        id: u32,
        /// Dispatch asynchronously instead of blocking on the chain
        #[arg(long = "async")]
        r#async: bool,
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Write content to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate a vfs.toml and print the resulting handler chain
    Check {
        #[arg(short, long, default_value = "vfs.toml")]
        config: String,
    },
    /// Generate a vfs.toml scaffold
    Init {
        /// Directory to write vfs.toml into
        #[arg(short, long, default_value = ".")]
        path: String,
        /// Asset directory, relative to the config file
        #[arg(long, default_value = "assets")]
        asset_root: String,
        /// Overwrite an existing vfs.toml
        #[arg(long)]
        force: bool,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_ascii_lowercase(), value.to_string()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warp=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            uri,
            config,
            headers,
            id,
            r#async,
            format,
            output,
        } => commands::fetch::fetch(commands::fetch::FetchArgs {
            uri,
            config,
            headers: headers.into_iter().collect(),
            id,
            sync: !r#async,
            format,
            output,
        }),
        Commands::Check { config } => commands::check::check(&config),
        Commands::Init {
            path,
            asset_root,
            force,
        } => commands::init::init(&path, &asset_root, force),
    }
}
