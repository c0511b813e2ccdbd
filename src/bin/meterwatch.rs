//! meterwatch CLI
//!
//! Interactive administration menu over a JSON-backed coordinator, with the
//! discovery loop running in the background.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meterwatch::alerting::UnconfiguredTransport;
use meterwatch::source::{ContentExtractor, DiscoveryConfig, FilenameExtractor, ReadingExtractor, SourceRegistrar};
use meterwatch::{
    AlertRule, ConsoleObserver, Coordinator, DiscoveryLoop, FileStore, MeterResult, MonitorConfig, NewUser,
    RemoteNotifier, Role, Token, UserId, UserStore,
};

/// How readings are extracted from source snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Extractor {
    /// Parse the value from the file name (`00123.4.jpg`).
    Filename,
    /// Parse the value from the file contents, falling back to the name.
    Content,
}

impl Extractor {
    fn build(self) -> Arc<dyn ReadingExtractor> {
        match self {
            Self::Filename => Arc::new(FilenameExtractor),
            Self::Content => Arc::new(ContentExtractor),
        }
    }
}

/// `meterwatch` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "meterwatch", about = "Utility meter monitoring and alerting", version)]
struct Args {
    /// Directory holding the JSON store.
    #[arg(long, env = "METERWATCH_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    /// Directory scanned for `Medicoes_*` batches.
    #[arg(long, env = "METERWATCH_DISCOVERY_ROOT", default_value = ".")]
    discovery_root: PathBuf,
    /// Batch directory prefix.
    #[arg(long, env = "METERWATCH_DISCOVERY_PREFIX", default_value = "Medicoes_")]
    discovery_prefix: String,
    /// Seconds between discovery cycles.
    #[arg(long, env = "METERWATCH_DISCOVERY_INTERVAL", default_value_t = 5)]
    discovery_interval: u64,
    /// Directory receiving undelivered notifications.
    #[arg(long, env = "METERWATCH_OUTBOX_DIR", default_value = "outbox")]
    outbox_dir: PathBuf,
    /// Reading extraction strategy.
    #[arg(long, env = "METERWATCH_EXTRACTOR", value_enum, default_value_t = Extractor::Filename)]
    extractor: Extractor,
    /// Limit of the rule given to every new user, in cubic metres.
    #[arg(long, env = "METERWATCH_DEFAULT_LIMIT", default_value_t = meterwatch::config::DEFAULT_LIMIT)]
    default_limit: f64,
    /// User whose alerts are forwarded remotely.
    #[arg(long, env = "METERWATCH_NOTIFY_USER")]
    notify_user: Option<u64>,
    /// Recipient of forwarded alerts.
    #[arg(long, env = "METERWATCH_NOTIFY_RECIPIENT")]
    notify_recipient: Option<String>,
    /// Login of the administrator session.
    #[arg(long, env = "METERWATCH_ADMIN_LOGIN", default_value = "admin")]
    admin_login: String,
    /// Secret of the administrator session; seeds the account on first start.
    #[arg(long, env = "METERWATCH_ADMIN_SECRET", default_value = "admin")]
    admin_secret: String,
}

impl Args {
    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            data_dir: self.data_dir.clone(),
            discovery: DiscoveryConfig {
                root: self.discovery_root.clone(),
                prefix: self.discovery_prefix.clone(),
                interval: Duration::from_secs(self.discovery_interval),
            },
            outbox_dir: self.outbox_dir.clone(),
            default_limit: self.default_limit,
            notify_user: self.notify_user.map(UserId::new),
            notify_recipient: self.notify_recipient.clone(),
        }
    }
}

/// Line-oriented console used by the menu.
struct Console<R> {
    input: R,
}

impl<R: BufRead> Console<R> {
    /// Prints `label` and reads one trimmed line. `None` on end of input.
    fn ask(&mut self, label: &str) -> Option<String> {
        print!("{label}: ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn ask_id(&mut self, label: &str) -> Option<UserId> {
        let raw = self.ask(label)?;
        match raw.parse::<u64>() {
            Ok(id) => Some(UserId::new(id)),
            Err(_) => {
                println!("'{raw}' is not a user id");
                None
            }
        }
    }
}

fn print_menu() {
    println!();
    println!("=== meterwatch ===");
    println!("1. Create user");
    println!("2. List users");
    println!("3. Delete user");
    println!("4. Source status");
    println!("5. Link source to user");
    println!("6. Unlink source from user");
    println!("7. List alerts of a user");
    println!("0. Exit");
}

/// Ensures the administrator account exists and returns a token for it.
fn admin_session(store: &FileStore, coordinator: &Coordinator, args: &Args) -> MeterResult<Token> {
    if store.find_by_login(&args.admin_login)?.is_none() {
        let seeded = store.insert(NewUser::new(&args.admin_login, &args.admin_secret, "", Role::Admin))?;
        info!(user = %seeded.id, login = %seeded.login, "administrator account seeded");
    }
    coordinator.authenticate(&args.admin_login, &args.admin_secret)
}

fn create_user<R: BufRead>(console: &mut Console<R>, c: &Coordinator, admin: &Token, limit: f64) -> MeterResult<()> {
    let (Some(login), Some(secret), Some(email), Some(role)) = (
        console.ask("Login"),
        console.ask("Secret"),
        console.ask("Email"),
        console.ask("Role (admin/reader)"),
    ) else {
        return Ok(());
    };
    let role: Role = role.parse()?;
    let user = c.create_user(admin, NewUser::new(login, &secret, email, role))?;
    c.configure_rule(admin, user.id, AlertRule::fixed(limit))?;
    println!("User {} created with id {} (alert above {limit:.3} m3)", user.login, user.id);
    Ok(())
}

fn list_users(c: &Coordinator, admin: &Token) -> MeterResult<()> {
    let users = c.list_all_users(admin)?;
    if users.is_empty() {
        println!("No users.");
    }
    for user in users {
        let sources: Vec<&str> = user.sources.iter().map(String::as_str).collect();
        println!(
            "{:>4}  {:<16} {:<7} {:<24} [{}]",
            user.id,
            user.login,
            user.role,
            user.email,
            sources.join(", ")
        );
    }
    Ok(())
}

fn source_status(c: &Coordinator, admin: &Token) -> MeterResult<()> {
    for user in c.list_all_users(admin)? {
        let report = c.monitor(admin, user.id)?;
        println!(
            "{} ({}): {:.3} m3 from {} source(s), {} failed, {} alert(s)",
            user.login,
            user.id,
            report.total,
            report.sources_reported,
            report.sources_failed,
            report.alerts.len()
        );
    }
    println!();
    for status in c.source_status(admin)? {
        match status.owner {
            Some(owner) => println!("{:<20} user {:<4} {}", status.source_id, owner, status.state),
            None => println!("{:<20} {:<9} {}", status.source_id, "", status.state),
        }
    }
    Ok(())
}

fn link<R: BufRead>(console: &mut Console<R>, c: &Coordinator, admin: &Token) -> MeterResult<()> {
    println!("Detected sources: {}", c.detected_sources(admin)?.join(", "));
    let (Some(user), Some(source)) = (console.ask_id("User id"), console.ask("Source id")) else {
        return Ok(());
    };
    c.link_source(admin, user, &source)?;
    println!("Source {source} linked to user {user}");
    Ok(())
}

fn unlink<R: BufRead>(console: &mut Console<R>, c: &Coordinator, admin: &Token) -> MeterResult<()> {
    let (Some(user), Some(source)) = (console.ask_id("User id"), console.ask("Source id")) else {
        return Ok(());
    };
    if c.unlink_source(admin, user, &source)? {
        println!("Source {source} unlinked from user {user}");
    } else {
        println!("User {user} was not linked to {source}");
    }
    Ok(())
}

fn list_alerts<R: BufRead>(console: &mut Console<R>, c: &Coordinator, admin: &Token) -> MeterResult<()> {
    let Some(user) = console.ask_id("User id") else {
        return Ok(());
    };
    let alerts = c.alerts_for(admin, user)?;
    if alerts.is_empty() {
        println!("No alerts for user {user}.");
    }
    for alert in alerts {
        println!(
            "#{:<4} {}  {:.3} m3  {}",
            alert.id,
            meterwatch::time::iso_millis(alert.raised_at),
            alert.consumption,
            alert.message
        );
    }
    Ok(())
}

fn menu<R: BufRead>(console: &mut Console<R>, c: &Coordinator, admin: &Token, config: &MonitorConfig) {
    loop {
        print_menu();
        let Some(choice) = console.ask("Option") else {
            return;
        };
        let outcome = match choice.as_str() {
            "1" => create_user(console, c, admin, config.default_limit),
            "2" => list_users(c, admin),
            "3" => match console.ask_id("User id") {
                Some(id) => c.delete_user(admin, id).map(|()| println!("User {id} deleted")),
                None => Ok(()),
            },
            "4" => source_status(c, admin),
            "5" => link(console, c, admin),
            "6" => unlink(console, c, admin),
            "7" => list_alerts(console, c, admin),
            "0" => return,
            other => {
                println!("Unknown option '{other}'");
                Ok(())
            }
        };
        if let Err(err) = outcome {
            println!("error: {err}");
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.monitor_config();
    config.validate()?;

    let store = Arc::new(FileStore::open_in(&config.data_dir)?);
    info!(
        document = %store.path().display(),
        readings = %store.readings_path().display(),
        "store opened"
    );
    let coordinator = Arc::new(Coordinator::new(store.clone(), store.clone()));
    let admin = admin_session(&store, &coordinator, args)?;
    if args.extractor != Extractor::Filename {
        coordinator.set_extraction_strategy(&admin, args.extractor.build())?;
    }

    coordinator.register_observer(Arc::new(ConsoleObserver::stdout()))?;
    if let Some((user, recipient)) = config.notification_target() {
        coordinator.register_observer(Arc::new(RemoteNotifier::new(
            user,
            recipient,
            Arc::new(UnconfiguredTransport),
            &config.outbox_dir,
        )))?;
        info!(user = %user, recipient = %recipient, outbox = %config.outbox_dir.display(), "remote notifications enabled");
    }
    info!(observers = coordinator.engine().observer_count()?, "alert observers registered");
    coordinator.restore_rules(&admin)?;

    let mut discovery = DiscoveryLoop::spawn(Arc::clone(&coordinator) as Arc<dyn SourceRegistrar>, admin, config.discovery.clone())?;

    let stdin = io::stdin();
    let mut console = Console { input: stdin.lock() };
    menu(&mut console, &coordinator, &admin, &config);

    println!("Stopping discovery...");
    discovery.stop();
    Ok(())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "meterwatch=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            warn!(error = %err, "meterwatch terminated");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    const ADMIN: Token = Token::new(1, Role::Admin);

    fn console(lines: &str) -> Console<Cursor<Vec<u8>>> {
        Console {
            input: Cursor::new(lines.as_bytes().to_vec()),
        }
    }

    #[test]
    fn unknown_role_creates_nobody() {
        let c = Coordinator::in_memory();
        let err = create_user(&mut console("bob\npw\nbob@example.org\nroot\n"), &c, &ADMIN, 50.0).unwrap_err();
        assert!(err.is_invalid_configuration());
        assert!(c.list_all_users(&ADMIN).unwrap().is_empty());
    }

    #[test]
    fn role_answer_is_case_insensitive() {
        let c = Coordinator::in_memory();
        create_user(&mut console("bob\npw\nbob@example.org\nAdmin\n"), &c, &ADMIN, 50.0).unwrap();
        let users = c.list_all_users(&ADMIN).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, Role::Admin);
        assert_eq!(c.engine().rules_for(users[0].id).unwrap(), vec![AlertRule::fixed(50.0)]);
    }
}
