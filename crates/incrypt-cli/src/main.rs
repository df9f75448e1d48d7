use clap::{Parser, Subcommand};
use git2::RepositoryInitOptions;

use incrypt_core::crypto::keywrap::KeyTool;
use incrypt_core::meta::MetaData;
use incrypt_core::template;

#[derive(Parser)]
#[command(name = "git-incrypt", version, about = "Encrypted git remotes", after_help = "\
Creates the encrypted repository in the current directory. Use it as a
remote from any cleartext repository:

  git remote add origin incrypt::<url-of-the-encrypted-repository>

Environment variables:
  INCRYPT_GPG   Key-management program to invoke (default: gpg)")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an encrypted repository in the current directory
    Init {
        /// Name for the shared commit template
        #[arg(short = 'n', long, default_value = "incrypt")]
        name: String,

        /// Email for the shared commit template
        #[arg(short = 'e', long, default_value = "incrypt@localhost")]
        email: String,

        /// Template timestamp, `<epoch> <±HHMM>` or a bare epoch (default: now)
        #[arg(short = 'd', long)]
        date: Option<String>,

        /// Template message; may be given multiple times for paragraphs
        #[arg(short = 'm', long = "message")]
        messages: Vec<String>,

        /// Recipients the repository key is escrowed to
        #[arg(required = true, value_name = "KEY")]
        recipients: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Commands::Init {
        name,
        email,
        date,
        messages,
        recipients,
    } = cli.command;

    if let Err(e) = run_init(&name, &email, date.as_deref(), &messages, &recipients) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run_init(
    name: &str,
    email: &str,
    date: Option<&str>,
    messages: &[String],
    recipients: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let time = match date {
        Some(date) => {
            template::parse_date(date).ok_or_else(|| format!("invalid date: '{date}'"))?
        }
        None => git2::Time::new(chrono::Utc::now().timestamp(), 0),
    };

    let er = git2::Repository::init_opts(".", RepositoryInitOptions::new().bare(true))?;
    let default_branch = er
        .find_reference("HEAD")
        .ok()
        .and_then(|head| head.symbolic_target().map(str::to_string))
        .unwrap_or_else(|| "refs/heads/master".to_string());

    let body = template::build(name, email, &time, messages);
    let meta = MetaData::init(&er, recipients, body, default_branch, &KeyTool::from_env())?;

    eprintln!("Initialized encrypted repository; keep the raw key below somewhere safe.");
    println!("{}", hex::encode(meta.key.as_bytes()));
    Ok(())
}
