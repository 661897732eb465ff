use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use session_core::Session;
use session_core::config::Config;
use session_core::dispatch::{ApiRequest, Reply, RequestContext};
use session_core::session::LoginCredentials;
use session_core::stream::StreamItem;

const DEFAULT_CONFIG: &str = "session-core.toml";

struct CliArgs {
    config_path: PathBuf,
    command: Command,
}

#[derive(Debug)]
enum Command {
    Login { username: String },
    Logout,
    Status,
    Get { path: String },
    Chat { path: String, message: String },
    Guard { path: String },
    Config,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = std::env::var_os("SESSION_CORE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("session-core {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
            _ => positional.push(arg),
        }
    }

    match parse_command(positional) {
        Ok(command) => CliArgs {
            config_path,
            command,
        },
        Err(message) => {
            eprintln!("Error: {message}");
            eprintln!("Run with --help for usage information.");
            std::process::exit(1);
        }
    }
}

fn parse_command(positional: Vec<String>) -> Result<Command, String> {
    let mut words = positional.into_iter();
    let Some(name) = words.next() else {
        return Ok(Command::Status);
    };
    let mut arg = |what: &str| words.next().ok_or_else(|| format!("{name} requires <{what}>"));

    let command = match name.as_str() {
        "login" => Command::Login {
            username: arg("username")?,
        },
        "logout" => Command::Logout,
        "status" => Command::Status,
        "get" => Command::Get { path: arg("path")? },
        "chat" => Command::Chat {
            path: arg("path")?,
            message: arg("message")?,
        },
        "guard" => Command::Guard { path: arg("path")? },
        "config" => Command::Config,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(command)
}

fn print_usage() {
    println!(
        "\
session-core {version} -- Session lifecycle command-line client

USAGE:
    session-core [OPTIONS] <COMMAND>

COMMANDS:
    login <username>         Log in (password from SESSION_CORE_PASSWORD)
    logout                   Clear the stored session
    status                   Show the session state [default]
    get <path>               Authorized GET, prints the reply
    chat <path> <message>    POST {{\"message\": ...}} and print the streamed reply
    guard <path>             Show the route guard decision for a path
    config                   Print the effective configuration

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: {default}]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG                Override log level (e.g. RUST_LOG=debug)
    SESSION_CORE_CONFIG     Alternative to --config flag
    SESSION_CORE_PASSWORD   Password for `login`
",
        version = env!("CARGO_PKG_VERSION"),
        default = DEFAULT_CONFIG,
    );
}

fn main() -> anyhow::Result<()> {
    let cli = parse_args();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?
        .block_on(run(cli))
}

async fn run(cli: CliArgs) -> anyhow::Result<()> {
    let config = Config::load(&cli.config_path)
        .with_context(|| format!("loading {}", cli.config_path.display()))?;
    init_tracing(&config);

    let session = Session::from_config(&config)?;
    info!(
        base_url = %config.api.base_url,
        storage = %config.storage.backend,
        "session-core ready"
    );

    match cli.command {
        Command::Login { username } => {
            let password = std::env::var("SESSION_CORE_PASSWORD")
                .context("SESSION_CORE_PASSWORD must be set for login")?;
            let user = session
                .manager
                .login(&LoginCredentials::new(username, password))
                .await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Logout => {
            session.manager.logout();
            println!("logged out");
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&session.manager.status())?);
        }
        Command::Get { path } => {
            let mut ctx = RequestContext::new();
            let reply = session
                .dispatcher
                .send_for_reply(&ApiRequest::get(path), &mut ctx)
                .await?;
            print_reply(reply).await?;
        }
        Command::Chat { path, message } => {
            let mut ctx = RequestContext::new();
            let request = ApiRequest::post(path).json(&serde_json::json!({ "message": message }))?;
            let reply = session.dispatcher.send_for_reply(&request, &mut ctx).await?;
            print_reply(reply).await?;
        }
        Command::Guard { path } => {
            let decision = session.guard.check(&path);
            match decision.location(&config.guard.login_path) {
                Some(location) => println!("redirect {location}"),
                None => println!("allow"),
            }
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            let mut overrides: Vec<_> = config.env_overrides.all().iter().collect();
            if !overrides.is_empty() {
                overrides.sort();
                println!("\n# Overridden by environment:");
                for (key, var) in overrides {
                    println!("#   {key} <- {var}");
                }
            }
        }
    }
    Ok(())
}

async fn print_reply(reply: Reply) -> anyhow::Result<()> {
    match reply {
        Reply::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Reply::Stream(mut stream) => {
            let mut stdout = std::io::stdout();
            while let Some(item) = stream.next().await {
                match item? {
                    StreamItem::Delta(text) => {
                        write!(stdout, "{text}")?;
                        stdout.flush()?;
                    }
                    StreamItem::Final(message) => {
                        writeln!(stdout)?;
                        if !message.produced {
                            println!("{}", message.text);
                        }
                        if let Some(id) = message.id {
                            println!("id: {id}");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("session_core={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
