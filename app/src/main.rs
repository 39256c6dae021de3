use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;
use zeroize::Zeroizing;

use librecrypt_companion_lib::{
    CommandOutcome, CompanionContext, EngineView, SharedCompanionContext,
};

const ENV_HOME: &str = "LIBRECRYPT_HOME";

const HELP: &str = "commands: connect | toggle | create | refresh | pin <digits> | cancel | dismiss <id> | state | quit";

fn data_dir() -> Result<PathBuf> {
    match std::env::var_os(ENV_HOME) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => std::env::current_dir().context("Failed to resolve working directory"),
    }
}

fn print_view(view: &EngineView) -> Result<()> {
    let json = serde_json::to_string(view).context("Failed to serialize engine view")?;
    println!("{}", json);
    Ok(())
}

/// Commands that may wait on a PIN run in the background so `pin`/`cancel`
/// can still be read from stdin.
fn spawn_command<F, Fut>(context: &SharedCompanionContext, name: &'static str, command: F)
where
    F: FnOnce(SharedCompanionContext) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = CommandOutcome> + Send + 'static,
{
    let context = context.clone();
    tokio::spawn(async move {
        let outcome = command(context.clone()).await;
        log::info!("{} finished: {:?}", name, outcome);
        if let Err(err) = print_view(&context.view()) {
            log::error!("{:#}", err);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let root = data_dir()?;
    let context = CompanionContext::initialize(root.clone())
        .with_context(|| format!("Failed to initialize engine in {}", root.display()))?;
    let context = SharedCompanionContext::new(context);
    context.start_polling();
    eprintln!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        // may carry a PIN
        let line = Zeroizing::new(line);
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let argument = parts.next();

        match command {
            "connect" => spawn_command(&context, "connect", |ctx| async move {
                ctx.connect().await
            }),
            "toggle" => spawn_command(&context, "toggle", |ctx| async move {
                ctx.toggle_lock().await
            }),
            "create" => spawn_command(&context, "create", |ctx| async move {
                ctx.create_wallet().await
            }),
            "refresh" => spawn_command(&context, "refresh", |ctx| async move {
                ctx.refresh().await
            }),
            "pin" => match argument {
                Some(digits) => {
                    if let Err(err) = context.submit_pin(digits) {
                        eprintln!("{}", err);
                    }
                }
                None => eprintln!("usage: pin <digits>"),
            },
            "cancel" => {
                if !context.cancel_pin() {
                    eprintln!("no PIN prompt is open");
                }
            }
            "dismiss" => match argument.map(Uuid::parse_str) {
                Some(Ok(id)) => {
                    if !context.dismiss_notification(id) {
                        eprintln!("no such notification");
                    }
                }
                _ => eprintln!("usage: dismiss <id>"),
            },
            "state" => {}
            "quit" | "exit" => break,
            other => {
                eprintln!("unknown command '{}'; {}", other, HELP);
                continue;
            }
        }
        print_view(&context.view())?;
    }

    context.shutdown().await;
    Ok(())
}
