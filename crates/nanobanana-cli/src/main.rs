use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nanobanana_contracts::session::{FileCookieJar, SessionContext, SESSION_COOKIE_KEY};
use nanobanana_engine::config::AppConfig;
use nanobanana_engine::references::{
    image_dimensions, load_reference_bytes, resize_to_height, ReferenceCatalog, THUMBNAIL_HEIGHT,
};
use nanobanana_engine::Studio;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "nanobanana",
    version,
    about = "Prompt plus reference image in, generated image out"
)]
struct Cli {
    /// Secrets file (TOML).
    #[arg(long, global = true, env = "NANOBANANA_CONFIG")]
    config: Option<PathBuf>,
    /// Cookie file that remembers the login and session id.
    #[arg(long, global = true)]
    cookies: Option<PathBuf>,
    /// Run without a cookie file; nothing is remembered between invocations.
    #[arg(long, global = true, conflicts_with = "cookies")]
    no_cookies: bool,
    #[arg(long, global = true)]
    history_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    reference_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Login(LoginArgs),
    Logout,
    Whoami,
    References(ReferencesArgs),
    Generate(GenerateArgs),
    History(HistoryArgs),
}

#[derive(Debug, Parser)]
struct LoginArgs {
    #[arg(long, env = "NANOBANANA_USERNAME")]
    username: String,
    #[arg(long, env = "NANOBANANA_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Debug, Parser)]
struct ReferencesArgs {
    /// Write thumbnails scaled to the preview height into this directory.
    #[arg(long)]
    thumbnails: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    /// Reference image index or label (see `references`).
    #[arg(long, default_value = "0")]
    reference: String,
    #[arg(long, default_value = nanobanana_engine::DEFAULT_PROVIDER)]
    provider: String,
    /// Also write the generated image here.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Log in for this call when no login is remembered.
    #[arg(long, env = "NANOBANANA_USERNAME", requires = "password")]
    username: Option<String>,
    #[arg(long, env = "NANOBANANA_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    /// Write every stored image as `<id>.png` into this directory.
    #[arg(long)]
    export_dir: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nanobanana error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli);
    let catalog = ReferenceCatalog::scan(&config.reference_dir())?;
    let session = open_session(&cli);
    let mut studio = Studio::from_config(session, &config);

    match cli.command {
        Command::Login(args) => {
            if !config.auth_credentials().configured {
                tracing::warn!("no credentials configured; the built-in account is active");
            }
            if !studio.login(&args.username, &args.password) {
                eprintln!("invalid username or password");
                return Ok(1);
            }
            if !studio.session().has_cookies() {
                eprintln!("logged in, but no cookie file is available to remember it");
                return Ok(0);
            }
            println!("logged in");
            Ok(0)
        }
        Command::Logout => {
            studio.logout();
            println!("logged out");
            Ok(0)
        }
        Command::Whoami => {
            if !studio.is_authenticated() {
                println!("not logged in");
                return Ok(1);
            }
            let session_id = studio.session().cookie(SESSION_COOKIE_KEY);
            println!("logged in (session {})", session_id.as_deref().unwrap_or("-"));
            println!("history entries: {}", studio.history().len());
            Ok(0)
        }
        Command::References(args) => run_references(&catalog, args),
        Command::Generate(args) => run_generate(&mut studio, &catalog, args),
        Command::History(args) => run_history(&mut studio, args),
    }
}

fn load_config(cli: &Cli) -> AppConfig {
    let mut config = AppConfig::load(cli.config.as_deref());
    if let Some(dir) = cli.history_dir.as_ref() {
        config = config.with_override("HISTORY_DIR", dir.display().to_string());
    }
    if let Some(dir) = cli.reference_dir.as_ref() {
        config = config.with_override("REFERENCE_DIR", dir.display().to_string());
    }
    config
}

fn default_cookie_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".nanobanana").join("cookies.json"))
}

fn open_session(cli: &Cli) -> SessionContext {
    if cli.no_cookies {
        return SessionContext::without_cookies();
    }
    match cli.cookies.clone().or_else(default_cookie_path) {
        Some(path) => SessionContext::new(FileCookieJar::open(path)),
        None => {
            tracing::warn!("no home directory; running without a cookie file");
            SessionContext::without_cookies()
        }
    }
}

fn run_references(catalog: &ReferenceCatalog, args: ReferencesArgs) -> Result<i32> {
    if catalog.is_empty() {
        println!("no reference images found");
        return Ok(1);
    }
    if let Some(dir) = args.thumbnails.as_ref() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    for (index, reference) in catalog.entries().iter().enumerate() {
        let bytes = load_reference_bytes(&reference.path);
        let size = bytes
            .as_deref()
            .and_then(|bytes| image_dimensions(bytes).ok())
            .map(|(width, height)| format!("{width}x{height}"))
            .unwrap_or_else(|| "unreadable".to_string());
        println!(
            "{index}\t{}\t{size}\t{}",
            reference.label,
            reference.path.display()
        );
        if let (Some(dir), Some(bytes)) = (args.thumbnails.as_ref(), bytes.as_deref()) {
            write_thumbnail(dir, &reference.path, bytes);
        }
    }
    Ok(0)
}

fn write_thumbnail(dir: &Path, source: &Path, bytes: &[u8]) {
    let Some(name) = source.file_name() else {
        return;
    };
    let target = dir.join(name);
    let result = resize_to_height(bytes, THUMBNAIL_HEIGHT).and_then(|thumb| {
        fs::write(&target, thumb).with_context(|| format!("failed to write {}", target.display()))
    });
    if let Err(err) = result {
        tracing::warn!("thumbnail for {} skipped: {err:#}", source.display());
    }
}

fn run_generate(studio: &mut Studio, catalog: &ReferenceCatalog, args: GenerateArgs) -> Result<i32> {
    if !studio.is_authenticated() {
        let (Some(username), Some(password)) = (args.username.as_deref(), args.password.as_deref())
        else {
            eprintln!("not logged in; run `nanobanana login` or pass --username/--password");
            return Ok(1);
        };
        if !studio.login(username, password) {
            eprintln!("invalid username or password");
            return Ok(1);
        }
    }
    let Some(reference) = catalog.find(&args.reference).cloned() else {
        eprintln!("reference image '{}' is not available", args.reference);
        return Ok(1);
    };
    if let Err(err) = studio.select_provider(&args.provider) {
        eprintln!("{err} (available: {})", studio.provider_names().join(", "));
        return Ok(1);
    }

    let outcome = match studio.generate(&args.prompt, &reference) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("{err}");
            if let Some(guidance) = err.guidance() {
                eprintln!("{guidance}");
            }
            return Ok(1);
        }
    };

    for text in &outcome.texts {
        println!("{text}");
    }
    if let (Some(out), Some(image)) = (args.out.as_ref(), outcome.entry.image.as_deref()) {
        fs::write(out, image).with_context(|| format!("failed to write {}", out.display()))?;
        println!("saved {}", out.display());
    }
    match outcome.stored.as_ref() {
        Some(stored) => println!(
            "uploaded {}{}",
            stored.path,
            stored
                .url
                .as_deref()
                .map(|url| format!(" ({url})"))
                .unwrap_or_default()
        ),
        None => println!("not uploaded ({})", outcome.object_name),
    }
    println!("done: {}", outcome.entry.id);
    Ok(0)
}

fn run_history(studio: &mut Studio, args: HistoryArgs) -> Result<i32> {
    if !studio.is_authenticated() {
        eprintln!("not logged in");
        return Ok(1);
    }
    let entries = studio.history().to_vec();
    if entries.is_empty() {
        println!("no history");
        return Ok(0);
    }
    if let Some(dir) = args.export_dir.as_ref() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    for entry in &entries {
        let prompt = entry.prompt.trim();
        let prompt = if prompt.is_empty() { "(empty)" } else { prompt };
        let image = match (args.export_dir.as_ref(), entry.image.as_deref()) {
            (Some(dir), Some(bytes)) => {
                let path = dir.join(format!("{}.png", entry.id));
                fs::write(&path, bytes)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                path.display().to_string()
            }
            (None, Some(bytes)) => format!("{} bytes", bytes.len()),
            (_, None) => "no image".to_string(),
        };
        println!("{}\t{}\t{image}\t{prompt}", entry.id, entry.model);
    }
    Ok(0)
}
