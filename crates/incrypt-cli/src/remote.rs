use clap::Parser;

use incrypt_core::helper::Helper;

/// Remote helper entry point, invoked by git itself. stdout carries the
/// helper protocol; all diagnostics go to stderr.
#[derive(Parser)]
#[command(name = "git-remote-incrypt", version)]
struct Cli {
    /// Remote name (or the URL again for anonymous remotes)
    remote: String,

    /// Remote URL, with or without the `incrypt::` prefix
    url: String,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(remote = %cli.remote, url = %cli.url, "helper started");

    let cr = match git2::Repository::open_from_env() {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("fatal: cannot open the local repository: {e}");
            std::process::exit(1);
        }
    };

    let result = Helper::new(cr, &cli.url)
        .and_then(|mut helper| helper.run(std::io::stdin().lock(), std::io::stdout().lock()));

    if let Err(e) = result {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}
